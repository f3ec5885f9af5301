//! `List-Unsubscribe` directives and the side effects they trigger
//!
//! A directive is a comma-separated list of bracketed entries such as
//! `<mailto:list@example.com?subject=unsubscribe>, <https://example.com/u/123>`.
//! Mailto targets are answered with a minimal email sent through the mailbox,
//! anything else is visited with a plain HTTP GET.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::time::Duration;
use tracing::debug;

use crate::error::{GmailError, Result};

const MAILTO_PREFIX: &str = "mailto";
const SUBJECT_PARAM: &str = "subject=";

/// One entry of an unsubscribe directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeTarget {
    /// `mailto:` target, kept whole (including any `?subject=` fragment)
    Mailto(String),
    /// Anything else, treated as a URL to GET
    Url(String),
}

impl UnsubscribeTarget {
    pub fn from_raw(raw: &str) -> Self {
        if raw.starts_with(MAILTO_PREFIX) {
            UnsubscribeTarget::Mailto(raw.to_string())
        } else {
            UnsubscribeTarget::Url(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            UnsubscribeTarget::Mailto(s) | UnsubscribeTarget::Url(s) => s,
        }
    }
}

/// The text strictly between the first `<` and the first `>` after it.
/// Entries without such a pair yield `None`.
pub fn extract_target(entry: &str) -> Option<&str> {
    let start = entry.find('<')?;
    let rest = &entry[start + 1..];
    let end = rest.find('>')?;
    Some(&rest[..end])
}

/// Split a directive on commas and parse every entry, skipping malformed and empty ones
pub fn parse_directive(header_value: &str) -> Vec<UnsubscribeTarget> {
    header_value
        .split(',')
        .filter_map(extract_target)
        .map(str::trim)
        .filter(|target| !target.is_empty())
        .map(UnsubscribeTarget::from_raw)
        .collect()
}

/// Recipient and subject of a `mailto:` target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailtoTarget {
    pub recipient: String,
    pub subject: String,
}

/// Split a mailto target into recipient and subject.
///
/// Everything after `subject=` is the subject, verbatim: no further
/// query-parameter splitting and no percent-decoding.
pub fn parse_mailto(target: &str) -> MailtoTarget {
    let address = target
        .split_once(':')
        .map(|(_, rest)| rest)
        .unwrap_or(target);

    match address.split_once('?') {
        Some((recipient, query)) => {
            let subject = query
                .find(SUBJECT_PARAM)
                .map(|pos| &query[pos + SUBJECT_PARAM.len()..])
                .unwrap_or("");
            MailtoTarget {
                recipient: recipient.to_string(),
                subject: subject.to_string(),
            }
        }
        None => MailtoTarget {
            recipient: address.to_string(),
            subject: String::new(),
        },
    }
}

/// A minimal RFC 822 unsubscribe request with an empty body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
}

impl UnsubscribeEmail {
    pub fn for_target(from: &str, target: &str) -> Self {
        let mailto = parse_mailto(target);
        Self {
            from: from.to_string(),
            to: mailto.recipient,
            subject: mailto.subject,
        }
    }

    pub fn to_rfc822(&self) -> String {
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\n\r\n",
            self.from, self.to, self.subject
        )
    }

    /// Base64 of the RFC 822 text, the form the send call takes
    pub fn to_raw(&self) -> String {
        STANDARD.encode(self.to_rfc822())
    }
}

/// Performs the HTTP side of unsubscribing
#[async_trait]
pub trait UrlVisitor: Send + Sync {
    /// GET the URL; returns the response status on success
    async fn visit(&self, url: &str) -> Result<u16>;
}

pub struct HttpUrlVisitor {
    client: reqwest::Client,
}

impl HttpUrlVisitor {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("unsubscribe-me/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GmailError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UrlVisitor for HttpUrlVisitor {
    async fn visit(&self, url: &str) -> Result<u16> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GmailError::UnsubscribeError(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        debug!("GET {} -> {}", url, status);
        if status.is_client_error() || status.is_server_error() {
            return Err(GmailError::UnsubscribeError(format!(
                "GET {} returned {}",
                url, status
            )));
        }
        Ok(status.as_u16())
    }
}
