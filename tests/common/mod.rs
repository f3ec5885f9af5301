//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use gmail_unsubscribe::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use gmail_unsubscribe::client::GmailClient;
use gmail_unsubscribe::error::{GmailError, Result};
use gmail_unsubscribe::models::{Header, LabelInfo, Message, MessagePage};
use gmail_unsubscribe::unsubscribe::UrlVisitor;
use mockall::mock;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

pub const FOLDER_LABEL_ID: &str = "Label_42";

/// Shared, ordered record of side effects across fakes
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Fixed "now" for retry-instant arithmetic
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// A rate-limit error asking to retry `secs` seconds after [`test_now`]
pub fn rate_limit_after(secs: i64) -> GmailError {
    let at = test_now() + chrono::Duration::seconds(secs);
    GmailError::RateLimitExceeded {
        message: format!(
            "User-rate limit exceeded.  Retry after {} (Too many requests)",
            at.format("%Y-%m-%dT%H:%M:%S%.3fZ")
        ),
    }
}

/// Create a test message with the given headers
pub fn create_test_message(id: &str, headers: &[(&str, &str)]) -> Message {
    Message {
        id: id.to_string(),
        thread_id: format!("thread_{}", id),
        label_ids: vec![FOLDER_LABEL_ID.to_string()],
        headers: headers.iter().map(|(n, v)| Header::new(*n, *v)).collect(),
    }
}

/// Mailing-list message from `from` carrying `directive`
pub fn create_newsletter_message(id: &str, from: &str, directive: &str) -> Message {
    create_test_message(
        id,
        &[
            ("From", from),
            ("Subject", "Weekly Newsletter"),
            ("List-Unsubscribe", directive),
        ],
    )
}

/// Message without any unsubscribe directive
pub fn create_plain_message(id: &str, from: &str) -> Message {
    create_test_message(id, &[("From", from), ("Subject", "Hello")])
}

pub fn create_test_label_info(id: &str, name: &str) -> LabelInfo {
    LabelInfo {
        id: id.to_string(),
        name: name.to_string(),
    }
}

/// Scripted failures for [`FakeMailbox`]
#[derive(Default)]
pub struct Faults {
    /// Errors returned by successive send calls before they succeed
    pub send_errors: VecDeque<GmailError>,
    /// Ids whose fetch fails with 404
    pub missing_ids: HashSet<String>,
    /// Listing calls beyond this many fail
    pub listing_budget: Option<usize>,
    /// Delete calls containing any of these ids fail with 500
    pub undeletable_ids: HashSet<String>,
}

/// In-memory mailbox that serves one folder and records every call.
///
/// Listing pages are cut at `page_size` and page tokens are the offset of the
/// next page.
pub struct FakeMailbox {
    labels: Vec<LabelInfo>,
    messages: Vec<Message>,
    page_size: usize,
    events: EventLog,
    pub faults: Mutex<Faults>,
    pub list_tokens: Mutex<Vec<String>>,
    pub fetched: Mutex<Vec<String>>,
    /// Decoded RFC 822 text of every sent message
    pub sent: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<Vec<String>>>,
}

impl FakeMailbox {
    pub fn new(messages: Vec<Message>, events: EventLog) -> Self {
        Self {
            labels: vec![
                create_test_label_info("INBOX", "INBOX"),
                create_test_label_info(FOLDER_LABEL_ID, "Unsubscribe"),
            ],
            messages,
            page_size: 1000,
            events,
            faults: Mutex::new(Faults::default()),
            list_tokens: Mutex::new(Vec::new()),
            fetched: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_faults(self, faults: Faults) -> Self {
        *self.faults.lock().unwrap() = faults;
        self
    }

    pub fn listing_calls(&self) -> usize {
        self.list_tokens.lock().unwrap().len()
    }

    pub fn deleted_ids(&self) -> Vec<Vec<String>> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn sent_messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl GmailClient for FakeMailbox {
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Ok(self.labels.clone())
    }

    async fn list_messages(
        &self,
        label_id: Option<&str>,
        page_token: &str,
        page_size: u32,
    ) -> Result<MessagePage> {
        let calls = {
            let mut tokens = self.list_tokens.lock().unwrap();
            tokens.push(page_token.to_string());
            tokens.len()
        };
        if let Some(budget) = self.faults.lock().unwrap().listing_budget {
            if calls > budget {
                return Err(GmailError::ApiError {
                    status: 500,
                    message: "listing backend error".to_string(),
                });
            }
        }

        let in_folder: Vec<&Message> = self
            .messages
            .iter()
            .filter(|m| label_id.map_or(true, |label| m.label_ids.iter().any(|l| l == label)))
            .collect();

        let start: usize = if page_token.is_empty() {
            0
        } else {
            page_token.parse().map_err(|_| GmailError::ApiError {
                status: 400,
                message: format!("bad page token {}", page_token),
            })?
        };
        let end = (start + self.page_size.min(page_size as usize)).min(in_folder.len());

        Ok(MessagePage {
            ids: in_folder[start..end].iter().map(|m| m.id.clone()).collect(),
            next_page_token: (end < in_folder.len()).then(|| end.to_string()),
        })
    }

    async fn get_message(&self, id: &str) -> Result<Message> {
        self.fetched.lock().unwrap().push(id.to_string());
        if self.faults.lock().unwrap().missing_ids.contains(id) {
            return Err(GmailError::ApiError {
                status: 404,
                message: "Requested entity was not found.".to_string(),
            });
        }
        self.messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| GmailError::ApiError {
                status: 404,
                message: "Requested entity was not found.".to_string(),
            })
    }

    async fn send_message(&self, raw: &str) -> Result<String> {
        if let Some(error) = self.faults.lock().unwrap().send_errors.pop_front() {
            return Err(error);
        }
        let bytes = STANDARD.decode(raw).map_err(|e| {
            GmailError::InvalidMessageFormat(format!("raw message is not base64: {}", e))
        })?;
        let text = String::from_utf8_lossy(&bytes).to_string();

        let to = text
            .lines()
            .find_map(|line| line.strip_prefix("To: "))
            .unwrap_or_default()
            .to_string();
        self.record(format!("send:{}", to));

        let mut sent = self.sent.lock().unwrap();
        sent.push(text);
        Ok(format!("sent_{}", sent.len()))
    }

    async fn batch_delete(&self, ids: &[String]) -> Result<()> {
        let blocked = {
            let faults = self.faults.lock().unwrap();
            ids.iter().any(|id| faults.undeletable_ids.contains(id))
        };
        if blocked {
            self.record(format!("delete-failed:{}", ids.join(",")));
            return Err(GmailError::ApiError {
                status: 500,
                message: "Backend Error".to_string(),
            });
        }
        self.record(format!("delete:{}", ids.join(",")));
        self.deleted.lock().unwrap().push(ids.to_vec());
        Ok(())
    }

    async fn profile_email(&self) -> Result<String> {
        Ok("me@example.com".to_string())
    }
}

/// Seen-set store that logs each append into the shared event log
pub struct RecordingSeenStore {
    inner: MemoryCheckpointStore<String>,
    events: EventLog,
}

impl RecordingSeenStore {
    pub fn new(events: EventLog) -> Self {
        Self::with_records(Vec::new(), events)
    }

    pub fn with_records(records: Vec<String>, events: EventLog) -> Self {
        Self {
            inner: MemoryCheckpointStore::with_records(records),
            events,
        }
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.inner.snapshot().await
    }
}

#[async_trait]
impl CheckpointStore<String> for RecordingSeenStore {
    async fn load(&self) -> Result<Vec<String>> {
        self.inner.load().await
    }

    async fn append(&self, record: &String) -> Result<()> {
        self.events.lock().unwrap().push(format!("seen:{}", record));
        self.inner.append(record).await
    }

    async fn clear(&self) -> Result<()> {
        self.events.lock().unwrap().push("seen-cleared".to_string());
        self.inner.clear().await
    }
}

// Mock implementation of UrlVisitor for testing
mock! {
    pub UrlVisitor {}

    #[async_trait::async_trait]
    impl UrlVisitor for UrlVisitor {
        async fn visit(&self, url: &str) -> Result<u16>;
    }
}

/// A visitor that must never be called
pub fn no_visits() -> MockUrlVisitor {
    let mut visitor = MockUrlVisitor::new();
    visitor.expect_visit().never();
    visitor
}
