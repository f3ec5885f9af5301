//! Gmail API client: the remote capability surface the pipeline consumes

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use google_gmail1::api::{BatchDeleteMessagesRequest, Message as GmailMessage};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::{GmailHub, FULL_ACCESS_SCOPE};
use crate::error::{GmailError, Result};
use crate::models::{Header, LabelInfo, Message, MessagePage};

/// Gmail API limit on ids per batchDelete call and on listing page size
pub const MAX_IDS_PER_CALL: usize = 1000;

/// Remote mailbox operations, as a trait for easier testing
#[async_trait]
pub trait GmailClient: Send + Sync {
    /// List all labels in the account
    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;

    /// List one page of message ids, optionally restricted to a label.
    /// An empty `page_token` requests the first page.
    async fn list_messages(
        &self,
        label_id: Option<&str>,
        page_token: &str,
        page_size: u32,
    ) -> Result<MessagePage>;

    /// Get message metadata (headers, thread, labels)
    async fn get_message(&self, id: &str) -> Result<Message>;

    /// Send a base64-encoded RFC 822 message; returns the sent message id
    async fn send_message(&self, raw: &str) -> Result<String>;

    /// Permanently delete up to [`MAX_IDS_PER_CALL`] messages
    async fn batch_delete(&self, ids: &[String]) -> Result<()>;

    /// Email address of the authenticated account
    async fn profile_email(&self) -> Result<String>;
}

/// Production Gmail client backed by the generated Gmail hub
pub struct ProductionGmailClient {
    hub: GmailHub,
    user_id: String,
    request_timeout: Duration,
}

impl ProductionGmailClient {
    pub fn new(hub: GmailHub, user_id: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            hub,
            user_id: user_id.into(),
            request_timeout,
        }
    }

    /// Bound a Gmail call by the request timeout. A timeout is transient.
    async fn timed<T, Fut>(&self, operation_name: &str, call: Fut) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, google_gmail1::Error>>,
    {
        debug!("Calling Gmail API: {}", operation_name);
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result.map_err(GmailError::from),
            Err(_) => {
                warn!(
                    "Gmail API {} call timed out after {:?}",
                    operation_name, self.request_timeout
                );
                Err(GmailError::Transient(format!(
                    "{} timed out after {:?}",
                    operation_name, self.request_timeout
                )))
            }
        }
    }
}

/// Convert a Gmail API message into our journal record
pub(crate) fn parse_gmail_message(msg: GmailMessage) -> Result<Message> {
    let id = msg
        .id
        .ok_or_else(|| GmailError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let headers = msg
        .payload
        .and_then(|p| p.headers)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|h| match (h.name, h.value) {
            (Some(name), Some(value)) => Some(Header { name, value }),
            _ => None,
        })
        .collect();

    Ok(Message {
        id,
        thread_id: msg.thread_id.unwrap_or_default(),
        label_ids: msg.label_ids.unwrap_or_default(),
        headers,
    })
}

#[async_trait]
impl GmailClient for ProductionGmailClient {
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        let call = self
            .hub
            .users()
            .labels_list(&self.user_id)
            .add_scope(FULL_ACCESS_SCOPE)
            .doit();
        let (_, response) = self.timed("labels.list", call).await?;

        Ok(response
            .labels
            .unwrap_or_default()
            .into_iter()
            .filter_map(|label| match (label.id, label.name) {
                (Some(id), Some(name)) => Some(LabelInfo { id, name }),
                _ => None,
            })
            .collect())
    }

    async fn list_messages(
        &self,
        label_id: Option<&str>,
        page_token: &str,
        page_size: u32,
    ) -> Result<MessagePage> {
        let mut call = self
            .hub
            .users()
            .messages_list(&self.user_id)
            .max_results(page_size)
            .add_scope(FULL_ACCESS_SCOPE);

        if let Some(label_id) = label_id {
            call = call.add_label_ids(label_id);
        }
        if !page_token.is_empty() {
            call = call.page_token(page_token);
        }

        let (_, response) = self.timed("messages.list", call.doit()).await?;

        let ids = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();

        Ok(MessagePage {
            ids,
            next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn get_message(&self, id: &str) -> Result<Message> {
        let call = self
            .hub
            .users()
            .messages_get(&self.user_id, id)
            .format("metadata")
            .add_scope(FULL_ACCESS_SCOPE)
            .doit();
        let (_, msg) = self.timed("messages.get", call).await?;
        parse_gmail_message(msg)
    }

    async fn send_message(&self, raw: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(raw)
            .map_err(|e| GmailError::InvalidMessageFormat(format!("Invalid raw message: {}", e)))?;
        let mime_type: mime::Mime = "message/rfc822"
            .parse()
            .map_err(|e| GmailError::InvalidMessageFormat(format!("Invalid mime type: {}", e)))?;

        let call = self
            .hub
            .users()
            .messages_send(GmailMessage::default(), &self.user_id)
            .add_scope(FULL_ACCESS_SCOPE)
            .upload(std::io::Cursor::new(bytes), mime_type);
        let (_, sent) = self.timed("messages.send", call).await?;

        Ok(sent.id.unwrap_or_default())
    }

    async fn batch_delete(&self, ids: &[String]) -> Result<()> {
        if ids.len() > MAX_IDS_PER_CALL {
            return Err(GmailError::ApiError {
                status: 400,
                message: format!(
                    "batchDelete accepts at most {} ids, got {}",
                    MAX_IDS_PER_CALL,
                    ids.len()
                ),
            });
        }

        let request = BatchDeleteMessagesRequest {
            ids: Some(ids.to_vec()),
        };
        let call = self
            .hub
            .users()
            .messages_batch_delete(request, &self.user_id)
            .add_scope(FULL_ACCESS_SCOPE)
            .doit();
        self.timed("messages.batchDelete", call).await?;
        Ok(())
    }

    async fn profile_email(&self) -> Result<String> {
        let call = self
            .hub
            .users()
            .get_profile(&self.user_id)
            .add_scope(FULL_ACCESS_SCOPE)
            .doit();
        let (_, profile) = self.timed("getProfile", call).await?;

        profile
            .email_address
            .ok_or_else(|| GmailError::AuthError("Profile has no email address".to_string()))
    }
}
