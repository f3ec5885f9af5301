//! Command-line interface

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::auth;
use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::client::{GmailClient, ProductionGmailClient};
use crate::config::Config;
use crate::error::Result;
use crate::models::Message;
use crate::pipeline::{PipelineOptions, RunReport, UnsubscribePipeline};
use crate::retry::CallPolicy;
use crate::unsubscribe::HttpUrlVisitor;

#[derive(Parser, Debug)]
#[command(name = "unsubscribe-me")]
#[command(version)]
#[command(
    about = "Unsubscribe from every sender in a Gmail folder, then delete the folder's mail",
    long_about = None
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".unsubscribe-me/token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Unsubscribe from and delete everything in the folder, resuming an
    /// interrupted run if one left checkpoint records behind
    Run {
        /// Folder (label) to process, overriding the config file
        #[arg(long)]
        folder: Option<String>,

        /// Dry run mode (collect and report, change nothing)
        #[arg(long)]
        dry_run: bool,
    },

    /// Show checkpoint records left by an interrupted run
    Status,

    /// Discard checkpoint records so the next run starts from scratch
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }

    /// Share a MultiProgress with the log writer so logs print above the spinners
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi,
            spinner_style,
        }
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// The two durable checkpoint records named by the config
pub struct CheckpointFiles {
    pub journal: Arc<FileCheckpointStore<Message>>,
    pub seen: Arc<FileCheckpointStore<String>>,
}

impl CheckpointFiles {
    pub fn from_config(config: &Config) -> Self {
        Self {
            journal: Arc::new(FileCheckpointStore::new(&config.state.journal_path)),
            seen: Arc::new(FileCheckpointStore::new(&config.state.seen_path)),
        }
    }
}

/// Load config and apply command-line overrides
pub async fn load_config(cli: &Cli, folder: Option<&str>, dry_run: bool) -> Result<Config> {
    let mut config = Config::load(&cli.config).await?;
    if let Some(folder) = folder {
        config.mailbox.folder = folder.to_string();
    }
    if dry_run {
        config.execution.dry_run = true;
    }
    config.validate()?;
    Ok(config)
}

/// Wire the production collaborators together and run the pipeline
pub async fn run_pipeline(
    cli: &Cli,
    folder: Option<&str>,
    dry_run: bool,
    multi: MultiProgress,
) -> Result<RunReport> {
    let reporter = ProgressReporter::with_multi_progress(multi);

    let config_spinner = reporter.add_spinner("Loading configuration...");
    let config = load_config(cli, folder, dry_run).await?;
    reporter.finish_spinner(
        &config_spinner,
        &format!("Configuration loaded from {:?}", cli.config),
    );

    let auth_spinner = reporter.add_spinner("Authenticating with Gmail API...");
    let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
    let client: Arc<dyn GmailClient> = Arc::new(ProductionGmailClient::new(
        hub,
        config.mailbox.user_id.clone(),
        config.scan.request_timeout(),
    ));
    let from_address = match &config.mailbox.from_address {
        Some(address) => address.clone(),
        None => client.profile_email().await?,
    };
    reporter.finish_spinner(
        &auth_spinner,
        &format!("Authenticated as {}", from_address),
    );

    let files = CheckpointFiles::from_config(&config);
    let visitor = Arc::new(HttpUrlVisitor::new(config.unsubscribe.http_timeout())?);

    let options = PipelineOptions {
        folder: config.mailbox.folder.clone(),
        from_address,
        page_size: config.scan.page_size,
        chunk_size: config.delete.chunk_size,
        dry_run: config.execution.dry_run,
        send_emails: config.unsubscribe.send_emails,
        visit_urls: config.unsubscribe.visit_urls,
    };

    let run_spinner = reporter.add_spinner(&format!(
        "Processing folder '{}'...",
        config.mailbox.folder
    ));
    let fetch_spinner = run_spinner.clone();
    let pipeline = UnsubscribePipeline::new(
        client,
        CallPolicy::system().with_max_transient_retries(config.execution.max_transient_retries),
        files.journal,
        files.seen,
        visitor,
        options,
    )
    .with_fetch_progress(Arc::new(move |fetched| {
        fetch_spinner.set_message(format!("Fetched {} messages...", fetched));
    }));

    let report = pipeline.run().await?;
    reporter.finish_spinner(
        &run_spinner,
        &format!("Processed {} messages", report.messages_total),
    );

    Ok(report)
}

/// Counts of records an interrupted run left behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointStatus {
    pub journaled_messages: usize,
    pub seen_senders: usize,
}

impl CheckpointStatus {
    pub fn is_clean(&self) -> bool {
        self.journaled_messages == 0 && self.seen_senders == 0
    }
}

pub async fn checkpoint_status(
    journal: &dyn CheckpointStore<Message>,
    seen: &dyn CheckpointStore<String>,
) -> Result<CheckpointStatus> {
    Ok(CheckpointStatus {
        journaled_messages: journal.load().await?.len(),
        seen_senders: seen.load().await?.len(),
    })
}

pub async fn reset_checkpoints(
    journal: &dyn CheckpointStore<Message>,
    seen: &dyn CheckpointStore<String>,
) -> Result<()> {
    journal.clear().await?;
    seen.clear().await?;
    tracing::info!("Checkpoint records cleared");
    Ok(())
}

/// Render the end-of-run summary
pub fn format_report(report: &RunReport) -> String {
    let mut lines = vec![
        "========================================".to_string(),
        if report.dry_run {
            "Unsubscribe Run Summary (DRY RUN)".to_string()
        } else {
            "Unsubscribe Run Summary".to_string()
        },
        "========================================".to_string(),
        format!("Run ID: {}", report.run_id),
        format!("Duration: {} seconds", report.duration().num_seconds()),
        format!(
            "Messages: {}{}",
            report.messages_total,
            if report.resumed {
                " (resumed from journal)"
            } else {
                ""
            }
        ),
    ];

    if report.fetch_failures > 0 {
        lines.push(format!("Messages skipped while fetching: {}", report.fetch_failures));
    }

    let (emails, urls) = if report.dry_run {
        ("Emails that would be sent", "URLs that would be visited")
    } else {
        ("Unsubscribe emails sent", "Unsubscribe URLs visited")
    };
    lines.push(format!(
        "Sender groups: {} ({} already handled)",
        report.groups_total, report.groups_skipped
    ));
    lines.push(format!("{}: {} ({} failed)", emails, report.emails_sent, report.email_failures));
    lines.push(format!("{}: {} ({} failed)", urls, report.urls_visited, report.url_failures));

    if report.dry_run {
        lines.push(format!(
            "Messages that would be deleted: {}",
            report.messages_total
        ));
    } else {
        lines.push(format!(
            "Messages deleted: {} of {}",
            report.delete.deleted, report.delete.requested
        ));
        if !report.delete.is_complete() {
            lines.push(format!(
                "Delete failures: {} (checkpoint records kept; run again to retry)",
                report.delete.failed_ids.len()
            ));
        }
    }
    lines.push("========================================".to_string());
    lines.join("\n")
}

/// Prompt user for confirmation
pub fn confirm_action(prompt: &str) -> Result<bool> {
    print!("{} [y/N]: ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().to_lowercase() == "y")
}
