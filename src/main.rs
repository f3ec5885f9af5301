use anyhow::Result;
use clap::Parser;
use gmail_unsubscribe::auth::{self, FULL_ACCESS_SCOPE};
use gmail_unsubscribe::cli::{self, CheckpointFiles, Cli, Commands};
use gmail_unsubscribe::config::Config;
use gmail_unsubscribe::error::GmailError;
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log buffer poisoned"))?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log buffer poisoned"))?;
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        display_error(&e);
        eprintln!("\nFor help, run: unsubscribe-me --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Both google-gmail1 and reqwest pull in rustls; pick the provider once.
    // aws-lc-rs needs NASM/CMake on Windows, so use ring there.
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_unsubscribe=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_unsubscribe=info,warn"))
    };

    // Logs print above the spinners instead of tearing them
    let multi_progress = Arc::new(MultiProgress::new());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(MultiProgressMakeWriter {
            multi: Arc::clone(&multi_progress),
        })
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match cli.command {
        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");

            if let Some(parent) = cli.token_cache.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            if force && cli.token_cache.exists() {
                tokio::fs::remove_file(&cli.token_cache).await?;
                tracing::info!("Removed existing token cache");
            }

            let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);

            // Must request the same scope as the token or the flow starts over
            let (_, profile) = hub
                .users()
                .get_profile("me")
                .add_scope(FULL_ACCESS_SCOPE)
                .doit()
                .await?;
            println!(
                "Connected to account: {}",
                profile.email_address.unwrap_or_default()
            );

            Ok(())
        }

        Commands::Run {
            ref folder,
            dry_run,
        } => {
            if dry_run {
                println!("Running in DRY RUN mode - no changes will be made");
            }

            let report =
                cli::run_pipeline(&cli, folder.as_deref(), dry_run, (*multi_progress).clone())
                    .await?;

            println!("\n{}", cli::format_report(&report));
            Ok(())
        }

        Commands::Status => {
            let config = Config::load(&cli.config).await?;
            let files = CheckpointFiles::from_config(&config);
            let status =
                cli::checkpoint_status(files.journal.as_ref(), files.seen.as_ref()).await?;

            println!("\n========================================");
            println!("Checkpoint Status");
            println!("========================================");
            if status.is_clean() {
                println!("No interrupted run found.");
            } else {
                println!(
                    "Journaled messages: {} ({:?})",
                    status.journaled_messages,
                    files.journal.path()
                );
                println!(
                    "Senders already unsubscribed: {} ({:?})",
                    status.seen_senders,
                    files.seen.path()
                );
                println!("\nThe next `run` resumes from these records.");
            }
            println!("========================================");

            Ok(())
        }

        Commands::Reset { force } => {
            let config = Config::load(&cli.config).await?;
            let files = CheckpointFiles::from_config(&config);
            let status =
                cli::checkpoint_status(files.journal.as_ref(), files.seen.as_ref()).await?;

            if status.is_clean() {
                println!("Nothing to reset.");
                return Ok(());
            }

            if !force {
                println!(
                    "This discards {} journaled messages and {} handled senders.",
                    status.journaled_messages, status.seen_senders
                );
                println!("Senders already unsubscribed may be contacted again.");
                if !cli::confirm_action("Reset checkpoint records?")? {
                    println!("Aborted.");
                    return Ok(());
                }
            }

            cli::reset_checkpoints(files.journal.as_ref(), files.seen.as_ref()).await?;
            println!("Checkpoint records cleared.");
            Ok(())
        }

        Commands::InitConfig { ref output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !force {
                return Err(GmailError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nPlease edit this file to customize your settings.");
            println!("Key settings to review:");
            println!("  - mailbox.folder: Folder whose senders you want to leave");
            println!("  - mailbox.from_address: Sender address for unsubscribe emails");
            println!("  - unsubscribe.send_emails / visit_urls: Which unsubscribe methods to use");
            println!("  - execution.dry_run: Preview without changing anything");

            Ok(())
        }
    }
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(gmail_err) = error.downcast_ref::<GmailError>() {
        match gmail_err {
            GmailError::AuthError(_) => {
                eprintln!("\nHint: Make sure your credentials.json file is valid.");
                eprintln!("      You can download it from Google Cloud Console.");
                eprintln!("      Try running: unsubscribe-me auth --force");
            }
            GmailError::FolderNotFound(_) => {
                eprintln!("\nHint: Folder names must match a Gmail label (case is ignored).");
                eprintln!("      Pass another one with: unsubscribe-me run --folder <NAME>");
            }
            GmailError::InvalidRetryTime(_) => {
                eprintln!("\nHint: Gmail sent a rate-limit response without a retry time.");
                eprintln!("      Run again later; progress so far has been saved.");
            }
            GmailError::StateError(_) => {
                eprintln!("\nHint: A checkpoint file is damaged.");
                eprintln!("      Inspect it, or discard it with: unsubscribe-me reset");
            }
            GmailError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: unsubscribe-me init-config --force");
            }
            _ => {}
        }
    }
}
