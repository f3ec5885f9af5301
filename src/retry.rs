//! Fault-tolerant call wrapper
//!
//! Every remote call goes through one of two policies:
//!
//! - [`CallPolicy::safe`] (lenient): any failure is logged and becomes `None`.
//!   Used for advisory reads where the caller has a fallback.
//! - [`CallPolicy::retry`] (persistent): rate-limit failures are retried after
//!   waiting until the instant the server names, transient failures are
//!   retried a bounded number of times with a doubling delay, anything else is
//!   logged and returned to the caller.
//!
//! The Gmail API reports *when* a call may be retried as an absolute timestamp
//! inside the error message, e.g.
//! `User-rate limit exceeded.  Retry after 2024-01-01T00:00:05.000Z (Too many requests)`.
//! The token immediately before the first `(` is that instant, formatted as
//! [`RETRY_TIME_FORMAT`]. There is no exponential backoff.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{GmailError, Result};

/// `yyyy-MM-ddTHH:mm:ss.fffZ`
pub const RETRY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub const DEFAULT_MAX_TRANSIENT_RETRIES: u32 = 5;

const TRANSIENT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const TRANSIENT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Source of the current time, so retry delays can be computed against a fixed clock in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that never moves
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Extract the retry instant from a rate-limit error message.
///
/// The instant is the last whitespace-separated token before the first `(`.
/// A message without `(` or with a token that does not match
/// [`RETRY_TIME_FORMAT`] is an error.
pub fn parse_retry_instant(message: &str) -> Result<DateTime<Utc>> {
    let Some((before, _)) = message.split_once('(') else {
        return Err(GmailError::InvalidRetryTime(message.to_string()));
    };

    let token = before
        .split_whitespace()
        .last()
        .ok_or_else(|| GmailError::InvalidRetryTime(message.to_string()))?;

    NaiveDateTime::parse_from_str(token, RETRY_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| GmailError::InvalidRetryTime(format!("{}: {}", token, e)))
}

/// What the retry driver should do with a failed attempt
#[derive(Debug)]
pub enum Disposition {
    /// Wait this long, then try again
    Retryable(Duration),
    /// The server's retry instant has already passed; try again right away
    RetryNow,
    /// Connection-level failure; try again after a backoff, up to the retry budget
    Transient(GmailError),
    /// Give up and surface the error
    Fatal(GmailError),
}

/// Classify a failure against the current time
pub fn classify(error: GmailError, now: DateTime<Utc>) -> Disposition {
    match error {
        GmailError::RateLimitExceeded { message } => match parse_retry_instant(&message) {
            Ok(retry_at) => match (retry_at - now).to_std() {
                Ok(delay) if !delay.is_zero() => Disposition::Retryable(delay),
                // Negative or zero: the instant has already passed
                _ => Disposition::RetryNow,
            },
            Err(e) => Disposition::Fatal(e),
        },
        transient @ GmailError::Transient(_) => Disposition::Transient(transient),
        other => Disposition::Fatal(other),
    }
}

/// Executes remote calls under the lenient or persistent-retry policy
#[derive(Clone)]
pub struct CallPolicy {
    clock: Arc<dyn Clock>,
    max_transient_retries: u32,
}

impl CallPolicy {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            max_transient_retries: DEFAULT_MAX_TRANSIENT_RETRIES,
        }
    }

    pub fn with_max_transient_retries(mut self, max_retries: u32) -> Self {
        self.max_transient_retries = max_retries;
        self
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Run once; on failure log it and return `None`
    pub async fn safe<T, Fut>(&self, operation_name: &str, operation: Fut) -> Option<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match operation.await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("{} failed, continuing without a result: {}", operation_name, e);
                None
            }
        }
    }

    /// Run until success, a fatal failure, or an exhausted transient budget.
    ///
    /// Rate limits are retried indefinitely; the calling task sleeps until the
    /// server's retry instant, which stalls the whole sequential pipeline.
    /// Transient failures sleep 1s, 2s, 4s and so on (capped at 30s) between
    /// attempts and give up after `max_transient_retries` retries.
    pub async fn retry<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts: u32 = 0;
        let mut transient_retries: u32 = 0;
        let mut transient_delay = TRANSIENT_INITIAL_DELAY;

        loop {
            attempts += 1;
            let error = match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!("{} succeeded after {} attempts", operation_name, attempts);
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            match classify(error, self.clock.now()) {
                Disposition::Retryable(delay) => {
                    info!(
                        "{}: user-rate limit exceeded, retrying after {:.3} seconds",
                        operation_name,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
                Disposition::RetryNow => {
                    info!(
                        "{}: user-rate limit exceeded, but the retry time has already passed",
                        operation_name
                    );
                }
                Disposition::Transient(e) if transient_retries < self.max_transient_retries => {
                    transient_retries += 1;
                    warn!(
                        "{} failed (retry {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        transient_retries,
                        self.max_transient_retries,
                        e,
                        transient_delay
                    );
                    tokio::time::sleep(transient_delay).await;
                    transient_delay = std::cmp::min(transient_delay * 2, TRANSIENT_MAX_DELAY);
                }
                Disposition::Transient(e) => {
                    error!(
                        "{} failed after {} transient retries: {}",
                        operation_name, transient_retries, e
                    );
                    return Err(e);
                }
                Disposition::Fatal(e) => {
                    error!("{} failed: {}", operation_name, e);
                    return Err(e);
                }
            }
        }
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::system()
    }
}
