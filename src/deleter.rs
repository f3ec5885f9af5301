//! Chunked bulk delete
//!
//! `messages.batchDelete` takes at most 1000 ids, so arbitrary id lists are
//! split into consecutive chunks and deleted one call per chunk, in order.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::{GmailClient, MAX_IDS_PER_CALL};
use crate::retry::CallPolicy;

/// What happened to a bulk delete request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub requested: usize,
    pub deleted: usize,
    pub calls: usize,
    /// Ids in chunks whose delete call failed
    pub failed_ids: Vec<String>,
}

impl DeleteOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed_ids.is_empty()
    }

    pub fn merge(&mut self, other: DeleteOutcome) {
        self.requested += other.requested;
        self.deleted += other.deleted;
        self.calls += other.calls;
        self.failed_ids.extend(other.failed_ids);
    }
}

/// Split ids into consecutive chunks of at most `chunk_size`
pub fn chunk_ids(ids: &[String], chunk_size: usize) -> std::slice::Chunks<'_, String> {
    ids.chunks(chunk_size.clamp(1, MAX_IDS_PER_CALL))
}

pub struct BulkDeleter {
    client: Arc<dyn GmailClient>,
    policy: CallPolicy,
    chunk_size: usize,
}

impl BulkDeleter {
    pub fn new(client: Arc<dyn GmailClient>, policy: CallPolicy, chunk_size: usize) -> Self {
        Self {
            client,
            policy,
            chunk_size: chunk_size.clamp(1, MAX_IDS_PER_CALL),
        }
    }

    /// Delete every id. A failed chunk is logged and its ids reported in
    /// [`DeleteOutcome::failed_ids`]; later chunks are still attempted.
    pub async fn delete_all(&self, ids: &[String]) -> DeleteOutcome {
        let mut outcome = DeleteOutcome {
            requested: ids.len(),
            ..Default::default()
        };

        let total_chunks = (ids.len() + self.chunk_size - 1) / self.chunk_size;
        for (index, chunk) in chunk_ids(ids, self.chunk_size).enumerate() {
            outcome.calls += 1;
            debug!(
                "Deleting chunk {}/{} ({} ids)",
                index + 1,
                total_chunks,
                chunk.len()
            );

            let result = self
                .policy
                .retry("messages.batchDelete", || self.client.batch_delete(chunk))
                .await;

            match result {
                Ok(()) => outcome.deleted += chunk.len(),
                Err(e) => {
                    warn!(
                        "Failed to delete chunk {}/{} ({} ids): {}",
                        index + 1,
                        total_chunks,
                        chunk.len(),
                        e
                    );
                    outcome.failed_ids.extend(chunk.iter().cloned());
                }
            }
        }

        if outcome.requested > 0 {
            info!(
                "Deleted {}/{} messages in {} calls",
                outcome.deleted, outcome.requested, outcome.calls
            );
        }
        outcome
    }
}
