//! # archive-sweep
//!
//! Transactional bulk extraction of ZIP and RAR archives.
//!
//! Every supported archive in a directory is validated, unlocked with a
//! candidate password if it is encrypted, extracted into a hidden staging
//! directory, reconciled into a destination named after the archive under a
//! collision policy, and verified against the archive's manifest. Only then
//! is the source archive deleted.
//!
//! ## Quick Start
//!
//! ```no_run
//! use archive_sweep::{Config, DirectoryExtractor};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.passwords.passwords = vec!["secret".to_string()];
//!
//!     let extractor = DirectoryExtractor::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = extractor.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = extractor.run(Path::new("/downloads")).await?;
//!     println!("{} processed, {} failed", summary.processed, summary.failed);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Archive readers and staged extraction
pub mod extraction;
/// Directory-level orchestration
pub mod orchestrator;
/// Retry logic for transient failures
pub mod retry;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

use std::path::Path;

// Re-export commonly used types
pub use config::{CollisionPolicy, Config};
pub use error::{Error, ExtractionError, Result};
pub use orchestrator::DirectoryExtractor;
pub use types::{ArchiveFormat, ArchiveHandle, Event, ProcessingOutcome, RunSummary};

/// Process a directory, stopping cleanly on a termination signal
///
/// On SIGTERM or SIGINT (Ctrl+C elsewhere) the archive in progress is
/// finished and the remaining archives are left untouched.
///
/// # Example
///
/// ```no_run
/// use archive_sweep::{Config, DirectoryExtractor, run_with_shutdown};
/// use std::path::Path;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let extractor = DirectoryExtractor::new(Config::default())?;
///     let summary = run_with_shutdown(&extractor, Path::new(".")).await?;
///     println!("{} archive(s) processed", summary.processed);
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(
    extractor: &DirectoryExtractor,
    directory: &Path,
) -> Result<RunSummary> {
    let run = extractor.run(directory);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => return result,
        _ = wait_for_signal() => {
            tracing::warn!("finishing the current archive before stopping");
            extractor.request_stop();
        }
    }

    run.await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            if tokio::signal::ctrl_c().await.is_err() {
                // Without any signal source, never interrupt the run
                std::future::pending::<()>().await;
            }
            tracing::info!("Received Ctrl+C signal");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}
