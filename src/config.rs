use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::MAX_IDS_PER_CALL;
use crate::error::{GmailError, Result};
use crate::retry::DEFAULT_MAX_TRANSIENT_RETRIES;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub delete: DeleteConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub unsubscribe: UnsubscribeConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    #[serde(default = "default_folder")]
    pub folder: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    /// `From` address for unsubscribe emails; the account's own address when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_address: Option<String>,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            folder: default_folder(),
            user_id: default_user_id(),
            from_address: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ScanConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for DeleteConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,
    #[serde(default = "default_seen_path")]
    pub seen_path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            journal_path: default_journal_path(),
            seen_path: default_seen_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeConfig {
    #[serde(default = "default_true")]
    pub send_emails: bool,
    #[serde(default = "default_true")]
    pub visit_urls: bool,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for UnsubscribeConfig {
    fn default() -> Self {
        Self {
            send_emails: true,
            visit_urls: true,
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl UnsubscribeConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub dry_run: bool,

    /// Retries for a connection-level failure before the call is given up
    #[serde(default = "default_max_transient_retries")]
    pub max_transient_retries: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_transient_retries: default_max_transient_retries(),
        }
    }
}

fn default_max_transient_retries() -> u32 {
    DEFAULT_MAX_TRANSIENT_RETRIES
}

fn default_folder() -> String {
    "Unsubscribe".to_string()
}

fn default_user_id() -> String {
    "me".to_string()
}

fn default_page_size() -> u32 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    MAX_IDS_PER_CALL
}

fn default_journal_path() -> PathBuf {
    PathBuf::from(".unsubscribe-me/messages.jsonl")
}

fn default_seen_path() -> PathBuf {
    PathBuf::from(".unsubscribe-me/seen.txt")
}

fn default_true() -> bool {
    true
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| GmailError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GmailError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.mailbox.folder.trim().is_empty() {
            return Err(GmailError::ConfigError(
                "mailbox.folder cannot be empty".to_string(),
            ));
        }
        if self.mailbox.user_id.trim().is_empty() {
            return Err(GmailError::ConfigError(
                "mailbox.user_id cannot be empty".to_string(),
            ));
        }
        if let Some(from) = &self.mailbox.from_address {
            if !from.contains('@') {
                return Err(GmailError::ConfigError(format!(
                    "mailbox.from_address '{}' is not an email address",
                    from
                )));
            }
        }

        // Both limits are the Gmail API's per-call maximum
        if self.scan.page_size == 0 {
            return Err(GmailError::ConfigError(
                "scan.page_size must be at least 1".to_string(),
            ));
        }
        if self.scan.page_size as usize > MAX_IDS_PER_CALL {
            return Err(GmailError::ConfigError(format!(
                "scan.page_size cannot exceed {}",
                MAX_IDS_PER_CALL
            )));
        }
        if self.scan.request_timeout_secs == 0 {
            return Err(GmailError::ConfigError(
                "scan.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.delete.chunk_size == 0 {
            return Err(GmailError::ConfigError(
                "delete.chunk_size must be at least 1".to_string(),
            ));
        }
        if self.delete.chunk_size > MAX_IDS_PER_CALL {
            return Err(GmailError::ConfigError(format!(
                "delete.chunk_size cannot exceed {}",
                MAX_IDS_PER_CALL
            )));
        }

        if self.state.journal_path == self.state.seen_path {
            return Err(GmailError::ConfigError(
                "state.journal_path and state.seen_path must differ".to_string(),
            ));
        }

        if self.unsubscribe.http_timeout_secs == 0 {
            return Err(GmailError::ConfigError(
                "unsubscribe.http_timeout_secs must be greater than 0".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
