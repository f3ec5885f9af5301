//! Gmail bulk unsubscribe
//!
//! Empties a Gmail folder of mailing-list traffic: every sender that offers a
//! `List-Unsubscribe` directive is unsubscribed from once, then all of the
//! folder's messages are permanently deleted.
//!
//! # Overview
//!
//! - **Authentication**: OAuth2 installed-app flow with token caching
//! - **Scanning**: Paginated collection, journaled message by message
//! - **Classification**: Grouping by sender identity
//! - **Unsubscribing**: Mailto requests sent from the mailbox, URL visits over HTTP
//! - **Deletion**: Chunked `batchDelete` calls
//! - **Checkpointing**: Fetch journal and seen set, so an interrupted run resumes
//!   without re-fetching or emailing a sender twice
//!
//! Every Gmail call goes through [`retry::CallPolicy`], which waits out per-user
//! rate limits until the instant the server names.
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_unsubscribe::{auth, config::Config, Message};
//! use gmail_unsubscribe::checkpoint::FileCheckpointStore;
//! use gmail_unsubscribe::client::ProductionGmailClient;
//! use gmail_unsubscribe::pipeline::{PipelineOptions, UnsubscribePipeline};
//! use gmail_unsubscribe::retry::CallPolicy;
//! use gmail_unsubscribe::unsubscribe::HttpUrlVisitor;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let hub = auth::initialize_gmail_hub(
//!         "credentials.json".as_ref(),
//!         ".unsubscribe-me/token.json".as_ref(),
//!     )
//!     .await?;
//!     let client = Arc::new(ProductionGmailClient::new(
//!         hub,
//!         "me",
//!         config.scan.request_timeout(),
//!     ));
//!
//!     let pipeline = UnsubscribePipeline::new(
//!         client,
//!         CallPolicy::system(),
//!         Arc::new(FileCheckpointStore::<Message>::new(&config.state.journal_path)),
//!         Arc::new(FileCheckpointStore::<String>::new(&config.state.seen_path)),
//!         Arc::new(HttpUrlVisitor::new(config.unsubscribe.http_timeout())?),
//!         PipelineOptions {
//!             from_address: "me@example.com".to_string(),
//!             ..Default::default()
//!         },
//!     );
//!     let report = pipeline.run().await?;
//!     println!("Deleted {} messages", report.delete.deleted);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`client`] - Gmail API client trait and production implementation
//! - [`retry`] - Lenient and persistent-retry call policies
//! - [`checkpoint`] - Durable fetch journal and seen set
//! - [`scanner`] - Folder resolution and paginated collection
//! - [`classifier`] - Partitioning and grouping by sender
//! - [`unsubscribe`] - Directive parsing, unsubscribe emails and URL visits
//! - [`deleter`] - Chunked bulk delete
//! - [`pipeline`] - The resumable run
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`models`] - Core data structures

pub mod auth;
pub mod checkpoint;
pub mod classifier;
pub mod cli;
pub mod client;
pub mod config;
pub mod deleter;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod scanner;
pub mod unsubscribe;

// Re-export commonly used types for convenience
pub use error::{GmailError, Result};

// Core data models
pub use models::{Header, LabelInfo, Message, MessagePage, SenderGroup};

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use classifier::{classify_messages, Classification};
pub use client::{GmailClient, ProductionGmailClient};
pub use config::Config;
pub use deleter::{BulkDeleter, DeleteOutcome};
pub use pipeline::{PipelineOptions, RunReport, UnsubscribePipeline};
pub use retry::CallPolicy;
pub use scanner::EmailScanner;
pub use unsubscribe::{HttpUrlVisitor, UnsubscribeTarget, UrlVisitor};

// CLI types (for binary usage)
pub use cli::{Cli, Commands, ProgressReporter};
