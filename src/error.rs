use thiserror::Error;

/// Type alias for Result with GmailError
pub type Result<T> = std::result::Result<T, GmailError>;

/// HTTP status the Gmail API uses for per-user rate limiting
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Error types for the unsubscribe pipeline
#[derive(Error, Debug)]
pub enum GmailError {
    /// Gmail API returned a non-success status that is not a rate limit
    #[error("Gmail API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Per-user rate limit hit. The message is kept verbatim because it carries
    /// the earliest instant at which the call may be retried.
    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded { message: String },

    /// Cancellation, timeout or connection failure; safe to retry right away
    #[error("Transient failure: {0}")]
    Transient(String),

    /// A rate-limit message did not carry a parseable retry instant
    #[error("Invalid retry time in rate-limit message: {0}")]
    InvalidRetryTime(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// The requested folder does not exist in the mailbox
    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    /// Invalid message format or parsing error
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Visiting an unsubscribe URL failed
    #[error("Unsubscribe failed: {0}")]
    UnsubscribeError(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Checkpoint store errors
    #[error("State error: {0}")]
    StateError(String),
}

impl GmailError {
    /// HTTP-equivalent status of the failure, when one is known
    pub fn status(&self) -> Option<u16> {
        match self {
            GmailError::ApiError { status, .. } => Some(*status),
            GmailError::RateLimitExceeded { .. } => Some(TOO_MANY_REQUESTS),
            _ => None,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, GmailError::RateLimitExceeded { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, GmailError::Transient(_))
    }
}

/// Map a Google JSON error body (`{"error": {"code": 429, "message": ...}}`)
fn from_error_body(body: &serde_json::Value) -> GmailError {
    let error = body.get("error");
    let status = error
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_u64())
        .and_then(|c| u16::try_from(c).ok())
        .unwrap_or(400);
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(|m| m.to_string())
        .unwrap_or_else(|| body.to_string());

    if status == TOO_MANY_REQUESTS {
        GmailError::RateLimitExceeded { message }
    } else {
        GmailError::ApiError { status, message }
    }
}

impl From<google_gmail1::Error> for GmailError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            // The generated client returns the decoded JSON body when it has one
            google_gmail1::Error::BadRequest(ref body) => from_error_body(body),
            // Non-success response without a JSON body
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let message = format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                );
                if status.as_u16() == TOO_MANY_REQUESTS {
                    GmailError::RateLimitExceeded { message }
                } else {
                    GmailError::ApiError {
                        status: status.as_u16(),
                        message,
                    }
                }
            }
            google_gmail1::Error::Cancelled => {
                GmailError::Transient("Request cancelled".to_string())
            }
            google_gmail1::Error::HttpError(ref err) => {
                GmailError::Transient(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => GmailError::Transient(err.to_string()),
            google_gmail1::Error::MissingToken(err) => GmailError::AuthError(err.to_string()),
            other => GmailError::ApiError {
                status: 0,
                message: other.to_string(),
            },
        }
    }
}
