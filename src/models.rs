use serde::{Deserialize, Serialize};

pub const LIST_UNSUBSCRIBE_HEADER: &str = "List-Unsubscribe";
pub const FROM_HEADER: &str = "From";
pub const REPLY_TO_HEADER: &str = "Reply-To";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A fetched message, metadata only. One of these is one line of the fetch journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
}

impl Message {
    /// First header with the given name, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    pub fn list_unsubscribe(&self) -> Option<&str> {
        self.header(LIST_UNSUBSCRIBE_HEADER)
    }

    /// Sender identity used for grouping: From, else Reply-To, else empty
    pub fn sender_key(&self) -> &str {
        self.header(FROM_HEADER)
            .or_else(|| self.header(REPLY_TO_HEADER))
            .unwrap_or("")
    }
}

/// Label info returned from Gmail API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// One page of a message listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Messages with an unsubscribe directive that share a sender identity,
/// kept in journal order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderGroup {
    pub key: String,
    pub messages: Vec<Message>,
}

impl SenderGroup {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn message_ids(&self) -> Vec<String> {
        self.messages.iter().map(|m| m.id.clone()).collect()
    }
}
