//! The resumable unsubscribe run
//!
//! A run moves through four phases:
//!
//! 1. **Collect**: load the fetch journal, or scan the folder when it is empty
//! 2. **Classify**: split messages into sender groups and the rest
//! 3. **Process**: delete the rest, then unsubscribe from and delete each group
//! 4. **Complete**: clear the durable records
//!
//! The seen set is appended after each group finishes, so a restarted run never
//! sends a second unsubscribe request to the same sender.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::classifier::classify_messages;
use crate::client::GmailClient;
use crate::deleter::{BulkDeleter, DeleteOutcome};
use crate::error::{GmailError, Result};
use crate::models::{Message, SenderGroup};
use crate::retry::CallPolicy;
use crate::scanner::{resolve_folder_id, EmailScanner, ProgressCallback, DEFAULT_PAGE_SIZE};
use crate::unsubscribe::{parse_directive, UnsubscribeEmail, UnsubscribeTarget, UrlVisitor};

/// Knobs for a run
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Name of the folder (label) to clean up
    pub folder: String,
    /// Address used as `From` on unsubscribe emails
    pub from_address: String,
    pub page_size: u32,
    pub chunk_size: usize,
    /// Collect and plan only; nothing is sent, visited or deleted
    pub dry_run: bool,
    pub send_emails: bool,
    pub visit_urls: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            folder: "Unsubscribe".to_string(),
            from_address: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            chunk_size: crate::client::MAX_IDS_PER_CALL,
            dry_run: false,
            send_emails: true,
            visit_urls: true,
        }
    }
}

/// Lifecycle of a sender group within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupState {
    #[default]
    Pending,
    /// Already in the seen set; no unsubscribe side effects
    Skipped,
    Unsubscribed,
    Deleted,
}

/// Result of processing one sender group
#[derive(Debug, Clone, Default)]
pub struct GroupOutcome {
    pub key: String,
    /// Last state reached; `Deleted` unless this was a dry run
    pub state: GroupState,
    pub skipped: bool,
    pub emails_sent: usize,
    pub email_failures: usize,
    pub urls_visited: usize,
    pub url_failures: usize,
    pub delete: DeleteOutcome,
}

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub dry_run: bool,
    /// The message set came from the fetch journal rather than a scan
    pub resumed: bool,
    pub messages_total: usize,
    pub messages_without_directive: usize,
    pub fetch_failures: usize,
    pub groups_total: usize,
    pub groups_skipped: usize,
    pub emails_sent: usize,
    pub email_failures: usize,
    pub urls_visited: usize,
    pub url_failures: usize,
    pub delete: DeleteOutcome,
    /// Durable records were cleared at completion
    pub state_cleared: bool,
}

impl RunReport {
    fn new(dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: now,
            completed_at: now,
            dry_run,
            resumed: false,
            messages_total: 0,
            messages_without_directive: 0,
            fetch_failures: 0,
            groups_total: 0,
            groups_skipped: 0,
            emails_sent: 0,
            email_failures: 0,
            urls_visited: 0,
            url_failures: 0,
            delete: DeleteOutcome::default(),
            state_cleared: false,
        }
    }

    fn record_group(&mut self, outcome: GroupOutcome) {
        if outcome.skipped {
            self.groups_skipped += 1;
        }
        self.emails_sent += outcome.emails_sent;
        self.email_failures += outcome.email_failures;
        self.urls_visited += outcome.urls_visited;
        self.url_failures += outcome.url_failures;
        self.delete.merge(outcome.delete);
    }

    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }
}

pub struct UnsubscribePipeline {
    client: Arc<dyn GmailClient>,
    policy: CallPolicy,
    journal: Arc<dyn CheckpointStore<Message>>,
    seen: Arc<dyn CheckpointStore<String>>,
    visitor: Arc<dyn UrlVisitor>,
    options: PipelineOptions,
    on_fetch: Option<ProgressCallback>,
}

impl UnsubscribePipeline {
    pub fn new(
        client: Arc<dyn GmailClient>,
        policy: CallPolicy,
        journal: Arc<dyn CheckpointStore<Message>>,
        seen: Arc<dyn CheckpointStore<String>>,
        visitor: Arc<dyn UrlVisitor>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            client,
            policy,
            journal,
            seen,
            visitor,
            options,
            on_fetch: None,
        }
    }

    /// Report the number of fetched messages while scanning
    pub fn with_fetch_progress(mut self, on_fetch: ProgressCallback) -> Self {
        self.on_fetch = Some(on_fetch);
        self
    }

    pub async fn run(&self) -> Result<RunReport> {
        let mut report = RunReport::new(self.options.dry_run);
        info!(
            "Starting run {} on folder '{}'{}",
            report.run_id,
            self.options.folder,
            if self.options.dry_run { " (dry run)" } else { "" }
        );

        let messages = self.load_or_collect(&mut report).await?;
        report.messages_total = messages.len();

        let classification = classify_messages(messages);
        report.messages_without_directive = classification.without_directive.len();
        report.groups_total = classification.groups.len();
        info!(
            "{} sender groups ({} messages), {} messages without an unsubscribe directive",
            classification.groups.len(),
            classification.grouped_message_count(),
            classification.without_directive.len()
        );

        let deleter = BulkDeleter::new(
            self.client.clone(),
            self.policy.clone(),
            self.options.chunk_size,
        );

        let plain_ids = classification.without_directive_ids();
        if self.options.dry_run {
            info!("[DRY RUN] Would delete {} messages without a directive", plain_ids.len());
        } else if !plain_ids.is_empty() {
            info!("Deleting {} messages without a directive", plain_ids.len());
            report.delete.merge(deleter.delete_all(&plain_ids).await);
        }

        let mut seen_keys: HashSet<String> = self.seen.load().await?.into_iter().collect();
        if !seen_keys.is_empty() {
            info!("{} senders already handled by an earlier run", seen_keys.len());
        }

        for (index, group) in classification.groups.iter().enumerate() {
            debug!(
                "Group {}/{}: '{}' ({} messages)",
                index + 1,
                classification.groups.len(),
                group.key,
                group.len()
            );
            let outcome = self.process_group(group, &deleter, &mut seen_keys).await?;
            report.record_group(outcome);
        }

        if self.options.dry_run {
            info!("[DRY RUN] Keeping fetch journal; nothing was changed");
        } else if !report.delete.is_complete() {
            warn!(
                "{} messages could not be deleted; keeping checkpoint records for the next run",
                report.delete.failed_ids.len()
            );
        } else {
            self.journal.clear().await?;
            self.seen.clear().await?;
            report.state_cleared = true;
            debug!("Checkpoint records cleared");
        }

        report.completed_at = Utc::now();
        info!(
            "Run {} finished in {}s",
            report.run_id,
            report.duration().num_seconds()
        );
        Ok(report)
    }

    /// Restore the message set from the journal, or scan the folder when the
    /// journal is empty
    async fn load_or_collect(&self, report: &mut RunReport) -> Result<Vec<Message>> {
        let journaled = self.journal.load().await?;
        if !journaled.is_empty() {
            info!(
                "Resuming from fetch journal with {} messages",
                journaled.len()
            );
            report.resumed = true;
            return Ok(journaled);
        }

        let label_id = resolve_folder_id(self.client.as_ref(), &self.policy, &self.options.folder)
            .await
            .ok_or_else(|| GmailError::FolderNotFound(self.options.folder.clone()))?;
        info!("Collecting messages from '{}'", self.options.folder);

        let mut scanner = EmailScanner::new(
            self.client.clone(),
            self.policy.clone(),
            self.journal.clone(),
        )
        .with_page_size(self.options.page_size);
        if let Some(on_fetch) = &self.on_fetch {
            scanner = scanner.with_progress(on_fetch.clone());
        }

        let scan = scanner.collect(Some(&label_id)).await?;
        report.fetch_failures = scan.failed_ids.len();
        Ok(scan.messages)
    }

    /// Take one group from Pending to Deleted, unsubscribing on the way
    /// unless its sender was already handled
    pub async fn process_group(
        &self,
        group: &SenderGroup,
        deleter: &BulkDeleter,
        seen_keys: &mut HashSet<String>,
    ) -> Result<GroupOutcome> {
        let mut outcome = GroupOutcome {
            key: group.key.clone(),
            ..Default::default()
        };

        let mut state = GroupState::Pending;
        loop {
            let next = match state {
                GroupState::Pending if seen_keys.contains(&group.key) => {
                    info!("Skipping unsubscribe for '{}': already handled", group.key);
                    outcome.skipped = true;
                    GroupState::Skipped
                }
                GroupState::Pending => {
                    self.unsubscribe(group, &mut outcome).await;
                    GroupState::Unsubscribed
                }
                GroupState::Skipped | GroupState::Unsubscribed if self.options.dry_run => {
                    info!(
                        "[DRY RUN] Would delete {} messages from '{}'",
                        group.len(),
                        group.key
                    );
                    break;
                }
                GroupState::Skipped => {
                    outcome.delete = deleter.delete_all(&group.message_ids()).await;
                    GroupState::Deleted
                }
                GroupState::Unsubscribed => {
                    outcome.delete = deleter.delete_all(&group.message_ids()).await;
                    // The one unsubscribe attempt has happened, whatever the delete did
                    self.seen.append(&group.key).await?;
                    seen_keys.insert(group.key.clone());
                    GroupState::Deleted
                }
                GroupState::Deleted => break,
            };
            debug!("'{}': {:?} -> {:?}", group.key, state, next);
            state = next;
        }

        outcome.state = state;
        Ok(outcome)
    }

    /// Act on every target of the group's directive. Failures are counted,
    /// never propagated.
    async fn unsubscribe(&self, group: &SenderGroup, outcome: &mut GroupOutcome) {
        // Senders share one directive; the first message stands for the group
        let Some(directive) = group.messages.first().and_then(Message::list_unsubscribe) else {
            return;
        };

        for target in parse_directive(directive) {
            match &target {
                UnsubscribeTarget::Mailto(mailto) => {
                    if !self.options.send_emails {
                        debug!("Email sending disabled, ignoring {}", mailto);
                        continue;
                    }
                    self.send_unsubscribe_email(mailto, outcome).await;
                }
                UnsubscribeTarget::Url(url) => {
                    if !self.options.visit_urls {
                        debug!("URL visits disabled, ignoring {}", url);
                        continue;
                    }
                    self.visit_url(url, outcome).await;
                }
            }
        }
    }

    async fn send_unsubscribe_email(&self, mailto: &str, outcome: &mut GroupOutcome) {
        let email = UnsubscribeEmail::for_target(&self.options.from_address, mailto);
        if self.options.dry_run {
            info!("[DRY RUN] Would email {} (subject: {:?})", email.to, email.subject);
            outcome.emails_sent += 1;
            return;
        }

        let raw = email.to_raw();
        match self
            .policy
            .retry("messages.send", || self.client.send_message(&raw))
            .await
        {
            Ok(sent_id) => {
                info!("Sent unsubscribe email to {} ({})", email.to, sent_id);
                outcome.emails_sent += 1;
            }
            Err(e) => {
                warn!("Unsubscribe email to {} failed: {}", email.to, e);
                outcome.email_failures += 1;
            }
        }
    }

    async fn visit_url(&self, url: &str, outcome: &mut GroupOutcome) {
        if self.options.dry_run {
            info!("[DRY RUN] Would visit {}", url);
            outcome.urls_visited += 1;
            return;
        }

        match self.visitor.visit(url).await {
            Ok(status) => {
                info!("Visited {} ({})", url, status);
                outcome.urls_visited += 1;
            }
            Err(e) => {
                warn!("Unsubscribe URL failed: {}", e);
                outcome.url_failures += 1;
            }
        }
    }
}
