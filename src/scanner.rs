//! Folder resolution and paginated collection of messages
//!
//! Every fetched message is appended to the fetch journal before it is added
//! to the in-memory result, so an interrupted scan loses at most the message
//! being fetched.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::client::GmailClient;
use crate::error::Result;
use crate::models::Message;
use crate::retry::CallPolicy;

/// Listing page size requested from the API
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Progress callback, called with the number of messages collected so far
pub type ProgressCallback = Arc<dyn Fn(usize) + Send + Sync>;

/// Find the label id for a folder name: case-insensitive exact match, first
/// match wins. A failed label listing resolves to `None`.
pub async fn resolve_folder_id(
    client: &dyn GmailClient,
    policy: &CallPolicy,
    folder_name: &str,
) -> Option<String> {
    let labels = policy.safe("labels.list", client.list_labels()).await?;
    let wanted = folder_name.to_lowercase();

    let found = labels.into_iter().find(|label| label.name.to_lowercase() == wanted);
    match &found {
        Some(label) => debug!("Resolved folder '{}' to label {}", folder_name, label.id),
        None => debug!("No label named '{}'", folder_name),
    }
    found.map(|label| label.id)
}

/// Messages collected by a scan
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub messages: Vec<Message>,
    /// Ids whose detail fetch failed with a non-retryable error
    pub failed_ids: Vec<String>,
    pub pages: usize,
}

/// Walks the message listing and fetches every message
pub struct EmailScanner {
    client: Arc<dyn GmailClient>,
    policy: CallPolicy,
    journal: Arc<dyn CheckpointStore<Message>>,
    page_size: u32,
    on_progress: Option<ProgressCallback>,
}

impl EmailScanner {
    pub fn new(
        client: Arc<dyn GmailClient>,
        policy: CallPolicy,
        journal: Arc<dyn CheckpointStore<Message>>,
    ) -> Self {
        Self {
            client,
            policy,
            journal,
            page_size: DEFAULT_PAGE_SIZE,
            on_progress: None,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_progress(mut self, on_progress: ProgressCallback) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    /// Collect all messages under `label_id`, or the whole mailbox when `None`.
    ///
    /// A failed listing call ends the scan with whatever was collected so far.
    /// A message whose fetch fails for a reason other than rate limiting is
    /// skipped. Journal write failures abort the scan.
    pub async fn collect(&self, label_id: Option<&str>) -> Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();
        let mut page_token = String::new();

        loop {
            let listing = self.client.list_messages(label_id, &page_token, self.page_size);
            let Some(page) = self.policy.safe("messages.list", listing).await else {
                warn!(
                    "Listing failed after {} pages; continuing with {} collected messages",
                    outcome.pages,
                    outcome.messages.len()
                );
                break;
            };
            outcome.pages += 1;

            if !page.ids.is_empty() {
                info!(
                    "Got {} messages (total so far: {})",
                    page.ids.len(),
                    outcome.messages.len()
                );
            }

            for id in &page.ids {
                let fetched = self
                    .policy
                    .retry("messages.get", || self.client.get_message(id))
                    .await;

                match fetched {
                    Ok(message) => {
                        self.journal.append(&message).await?;
                        outcome.messages.push(message);
                        if let Some(on_progress) = &self.on_progress {
                            on_progress(outcome.messages.len());
                        }
                    }
                    Err(e) => {
                        warn!("Skipping message {}: {}", id, e);
                        outcome.failed_ids.push(id.clone());
                    }
                }
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = token,
                _ => break,
            }
        }

        info!(
            "Scan complete: {} messages in {} pages ({} skipped)",
            outcome.messages.len(),
            outcome.pages,
            outcome.failed_ids.len()
        );
        Ok(outcome)
    }
}
