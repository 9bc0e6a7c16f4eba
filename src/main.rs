//! archive-sweep command line
//!
//! Extracts every ZIP and RAR archive in a directory into a sibling folder
//! named after the archive, then deletes the archive unless `--keep` is given.

use anyhow::{Context, Result};
use archive_sweep::{
    CollisionPolicy, Config, DirectoryExtractor, Event, ProcessingOutcome, RunSummary,
    run_with_shutdown,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "archive-sweep")]
#[command(version)]
#[command(about = "Extract every ZIP and RAR archive in a directory", long_about = None)]
struct Cli {
    /// Directory to scan (defaults to the current directory)
    directory: Option<PathBuf>,

    /// Candidate password for encrypted archives (repeatable, tried in order)
    #[arg(short = 'p', long = "password", value_name = "PASSWORD")]
    passwords: Vec<String>,

    /// File with one candidate password per line
    #[arg(long, value_name = "FILE")]
    password_file: Option<PathBuf>,

    /// Also try the empty password after all candidates
    #[arg(long)]
    try_empty: bool,

    /// Keep archives after successful extraction
    #[arg(short, long)]
    keep: bool,

    /// What to do when an extracted path already exists: skip, overwrite or rename
    #[arg(short, long, value_name = "POLICY")]
    collision: Option<CollisionPolicy>,

    /// JSON configuration file; command line flags take precedence
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log file (appended to)
    #[arg(long, value_name = "FILE", default_value = "archive_extraction.log")]
    log_file: PathBuf,

    /// Never wait for Enter before exiting
    #[arg(long)]
    no_pause: bool,
}

impl Cli {
    /// Load the config file (if any) and apply command line overrides
    fn build_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => Config::default(),
        };

        if !self.passwords.is_empty() {
            let mut passwords = self.passwords.clone();
            passwords.append(&mut config.passwords.passwords);
            config.passwords.passwords = passwords;
        }
        if let Some(file) = &self.password_file {
            config.passwords.password_file = Some(file.clone());
        }
        if self.try_empty {
            config.passwords.try_empty = true;
        }
        if self.keep {
            config.extraction.keep_originals = true;
        }
        if let Some(policy) = self.collision {
            config.extraction.collision = policy;
        }

        Ok(config)
    }
}

fn init_logging(log_file: &Path) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .init();
    Ok(())
}

/// Render byte progress for large archives and one line per finished archive
fn spawn_progress(mut events: broadcast::Receiver<Event>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut bar: Option<ProgressBar> = None;
        loop {
            match events.recv().await {
                Ok(Event::Extracting {
                    archive,
                    bytes_done,
                    bytes_total,
                }) => {
                    let pb = bar.get_or_insert_with(|| new_bar(&archive, bytes_total));
                    pb.set_position(bytes_done);
                }
                Ok(Event::ArchiveFinished { archive, outcome }) => {
                    if let Some(pb) = bar.take() {
                        pb.finish_and_clear();
                    }
                    println!("{}: {}", file_name(&archive), describe(outcome));
                }
                Ok(Event::RunFinished { .. }) | Err(RecvError::Closed) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            }
        }
        if let Some(pb) = bar {
            pb.finish_and_clear();
        }
    })
}

fn new_bar(archive: &Path, total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );
    pb.set_message(file_name(archive));
    pb
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn describe(outcome: ProcessingOutcome) -> &'static str {
    match outcome {
        ProcessingOutcome::Succeeded => "extracted",
        ProcessingOutcome::Skipped => "skipped",
        ProcessingOutcome::FailedCorrupt => "failed (corrupt archive)",
        ProcessingOutcome::FailedNoPassword => "failed (no working password)",
        ProcessingOutcome::FailedVerification => "failed (verification mismatch)",
        ProcessingOutcome::FailedIo => "failed (I/O error)",
    }
}

fn print_summary(directory: &Path, summary: &RunSummary) {
    if !summary.found_any {
        println!(
            "No supported archive files (.zip, .rar) found in {}",
            directory.display()
        );
        return;
    }
    println!(
        "Done: {} processed, {} failed, {} skipped",
        summary.processed, summary.failed, summary.skipped
    );
}

fn pause_if_interactive(no_pause: bool) {
    if no_pause || !std::io::stdin().is_terminal() {
        return;
    }
    println!("Press Enter to exit...");
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).ok();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli.log_file)?;

    let directory = match &cli.directory {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("failed to determine the current directory")?,
    };
    let config = cli.build_config()?;
    let extractor = DirectoryExtractor::new(config).context("invalid configuration")?;

    let progress = spawn_progress(extractor.subscribe());
    let result = run_with_shutdown(&extractor, &directory).await;
    drop(extractor);
    progress.await.ok();

    let summary = result.with_context(|| format!("cannot process {}", directory.display()))?;
    print_summary(&directory, &summary);
    pause_if_interactive(cli.no_pause);

    Ok(if summary.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
