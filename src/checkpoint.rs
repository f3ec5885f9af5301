//! Durable checkpoint records
//!
//! A run keeps two append-only records: the fetch journal (one JSON message per
//! line) and the seen set (one sender identity per line). Both sit behind
//! [`CheckpointStore`] so the pipeline never touches files directly.
//!
//! An append is committed once its line, including the trailing newline, has
//! been flushed and synced. On load, a final line without a newline is the
//! remnant of an interrupted append and is dropped.

use async_trait::async_trait;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{GmailError, Result};
use crate::models::Message;

/// A record that serializes to exactly one line
pub trait LineRecord: Sized + Send + Sync {
    /// Whether an empty line is a record rather than padding
    const BLANK_LINES_ARE_RECORDS: bool = false;

    fn to_line(&self) -> Result<String>;
    fn from_line(line: &str) -> Result<Self>;
}

impl LineRecord for Message {
    fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

/// Sender identities are stored verbatim. The empty identity is a real key.
impl LineRecord for String {
    const BLANK_LINES_ARE_RECORDS: bool = true;

    fn to_line(&self) -> Result<String> {
        if self.contains(['\n', '\r']) {
            return Err(GmailError::StateError(format!(
                "Record contains a line break: {:?}",
                self
            )));
        }
        Ok(self.clone())
    }

    fn from_line(line: &str) -> Result<Self> {
        Ok(line.to_string())
    }
}

#[async_trait]
pub trait CheckpointStore<T>: Send + Sync {
    /// All committed records, in append order. Missing storage loads as empty.
    async fn load(&self) -> Result<Vec<T>>;

    /// Durably append one record
    async fn append(&self, record: &T) -> Result<()>;

    /// Remove every record
    async fn clear(&self) -> Result<()>;
}

/// Line-per-record file store
pub struct FileCheckpointStore<T> {
    path: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T> FileCheckpointStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse file contents into records, dropping a torn final line
fn parse_lines<T: LineRecord>(content: &str, path: &Path) -> Result<Vec<T>> {
    let mut lines: Vec<&str> = content.lines().collect();

    if !content.is_empty() && !content.ends_with('\n') {
        if let Some(torn) = lines.pop() {
            warn!(
                "Dropping incomplete final record in {:?} ({} bytes)",
                path,
                torn.len()
            );
        }
    }

    let mut records = Vec::with_capacity(lines.len());
    for (index, line) in lines.into_iter().enumerate() {
        if line.is_empty() && !T::BLANK_LINES_ARE_RECORDS {
            continue;
        }
        let record = T::from_line(line).map_err(|e| {
            GmailError::StateError(format!("{:?} line {}: {}", path, index + 1, e))
        })?;
        records.push(record);
    }
    Ok(records)
}

#[async_trait]
impl<T: LineRecord + 'static> CheckpointStore<T> for FileCheckpointStore<T> {
    async fn load(&self) -> Result<Vec<T>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let records = parse_lines(&content, &self.path)?;

        // Cut the torn line off so the next append starts on a fresh line
        if !content.is_empty() && !content.ends_with('\n') {
            let committed = content.rfind('\n').map_or(0, |pos| pos + 1);
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .open(&self.path)
                .await?;
            file.set_len(committed as u64).await?;
            file.sync_data().await?;
        }

        debug!("Loaded {} records from {:?}", records.len(), self.path);
        Ok(records)
    }

    async fn append(&self, record: &T) -> Result<()> {
        let mut line = record.to_line()?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Removed {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore<T> {
    records: Mutex<Vec<T>>,
}

impl<T: Clone> MemoryCheckpointStore<T> {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn with_records(records: Vec<T>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub async fn snapshot(&self) -> Vec<T> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> CheckpointStore<T> for MemoryCheckpointStore<T> {
    async fn load(&self) -> Result<Vec<T>> {
        Ok(self.records.lock().await.clone())
    }

    async fn append(&self, record: &T) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.records.lock().await.clear();
        Ok(())
    }
}
