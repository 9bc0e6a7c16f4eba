//! Directory-level orchestration
//!
//! [`DirectoryExtractor`] enumerates a directory, classifies every file and
//! drives each supported archive through validation, password resolution,
//! the disk-space estimate and retried staged extraction. Archives are
//! processed strictly one at a time; blocking archive work runs on the
//! blocking thread pool.

use crate::config::Config;
use crate::error::{Error, ExtractionError, Result};
use crate::extraction::{
    ArchiveOpener, DefaultOpener, ExtractionReport, IntegrityStatus, PasswordList, SpaceCheck,
    StagedExtractor, check_disk_space, resolve_password, validate_integrity,
};
use crate::retry::with_retry;
use crate::types::{ArchiveHandle, Event, ExtractionAttempt, ProcessingOutcome, RunSummary};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio::task::spawn_blocking;
use tracing::{debug, error, info, warn};

/// Extracts every supported archive in a directory
///
/// Holds the run context shared by all stages: configuration, the reader
/// opener and the event channel.
pub struct DirectoryExtractor {
    config: Arc<Config>,
    opener: Arc<dyn ArchiveOpener>,
    event_tx: broadcast::Sender<Event>,
    stop: Arc<AtomicBool>,
}

impl DirectoryExtractor {
    /// Create an extractor using the built-in ZIP and RAR readers
    pub fn new(config: Config) -> Result<Self> {
        Self::with_opener(config, Arc::new(DefaultOpener))
    }

    /// Create an extractor with a custom reader opener
    pub fn with_opener(config: Config, opener: Arc<dyn ArchiveOpener>) -> Result<Self> {
        config.validate()?;
        // Buffer sized for per-member progress on large archives
        let (event_tx, _) = broadcast::channel(1000);
        Ok(Self {
            config: Arc::new(config),
            opener,
            event_tx,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The validated configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Finish the archive in progress, then leave the rest untouched
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Process every supported archive directly inside `directory`
    ///
    /// Fails only when the directory cannot be enumerated; per-archive
    /// failures are recorded in the returned summary.
    pub async fn run(&self, directory: &Path) -> Result<RunSummary> {
        info!(?directory, "scanning directory for archives");

        let archives = self.discover(directory).await?;
        let passwords = PasswordList::collect(&self.config.passwords).await;

        let mut summary = RunSummary::default();
        for handle in archives {
            summary.found_any = true;
            if self.stop.load(Ordering::SeqCst) {
                warn!(archive = %handle.name(), "stop requested, leaving remaining archives");
                break;
            }
            let outcome = self.process_archive(&handle, &passwords).await;
            summary.record(handle.path(), outcome);
            self.emit(Event::ArchiveFinished {
                archive: handle.path().to_path_buf(),
                outcome,
            });
        }

        if !summary.found_any {
            info!(?directory, "no supported archive files found");
        }
        info!(
            processed = summary.processed,
            failed = summary.failed,
            skipped = summary.skipped,
            "run finished"
        );
        self.emit(Event::RunFinished {
            summary: summary.clone(),
        });

        Ok(summary)
    }

    /// Supported archives directly inside `directory`, sorted by name
    async fn discover(&self, directory: &Path) -> Result<Vec<ArchiveHandle>> {
        let unavailable = |e: std::io::Error| Error::DirectoryUnavailable {
            path: directory.to_path_buf(),
            reason: e.to_string(),
        };

        let mut entries = tokio::fs::read_dir(directory).await.map_err(unavailable)?;
        let mut archives = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
            let path = entry.path();
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!(?path, error = %e, "cannot stat directory entry, skipping");
                    continue;
                }
            }

            let handle = ArchiveHandle::classify(path);
            if handle.format().is_supported() {
                archives.push(handle);
            } else {
                debug!(file = %handle.name(), "not a supported archive, skipping");
            }
        }

        archives.sort_by(|a, b| a.path().cmp(b.path()));
        debug!("found {} supported archive(s)", archives.len());
        Ok(archives)
    }

    /// Run one archive through the whole pipeline and report its outcome
    pub async fn process_archive(
        &self,
        handle: &ArchiveHandle,
        passwords: &PasswordList,
    ) -> ProcessingOutcome {
        if handle.is_continuation_volume() {
            info!(archive = %handle.name(), "continuation volume, processed with the first part");
            return ProcessingOutcome::Skipped;
        }

        info!(archive = %handle.name(), format = ?handle.format(), "processing archive");
        self.emit(Event::ArchiveStarted {
            archive: handle.path().to_path_buf(),
        });

        let destination = handle
            .path()
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(handle.stem());

        match self.extract_archive(handle, &destination, passwords).await {
            Ok(report) => {
                info!(
                    archive = %handle.name(),
                    destination = ?report.destination,
                    bytes = report.bytes_extracted,
                    "archive processed"
                );
                if !self.config.extraction.keep_originals {
                    remove_source(handle).await;
                }
                ProcessingOutcome::Succeeded
            }
            Err(e) => {
                let outcome = e.outcome();
                error!(
                    archive = %handle.name(),
                    error = %e,
                    code = e.error_code(),
                    ?outcome,
                    "archive failed"
                );
                outcome
            }
        }
    }

    async fn extract_archive(
        &self,
        handle: &ArchiveHandle,
        destination: &Path,
        passwords: &PasswordList,
    ) -> Result<ExtractionReport> {
        let password = self.unlock(handle, passwords).await?;
        self.preflight(handle, password.as_deref(), destination)
            .await?;

        let extractor = Arc::new(StagedExtractor::new(
            Arc::clone(&self.opener),
            self.config.extraction.clone(),
            self.event_tx.clone(),
        ));
        let collision = self.config.extraction.collision;

        with_retry(
            &self.config.retry,
            |attempt| {
                let extractor = Arc::clone(&extractor);
                let run = ExtractionAttempt {
                    archive: handle.clone(),
                    destination: destination.to_path_buf(),
                    password: password.clone(),
                    collision,
                    attempt,
                };
                async move {
                    debug!(archive = %run.archive.name(), attempt, "starting extraction attempt");
                    let archive = run.archive.path().to_path_buf();
                    run_blocking(&archive, move || extractor.run(&run)).await
                }
            },
            |attempt, delay, _| {
                self.emit(Event::RetryScheduled {
                    archive: handle.path().to_path_buf(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                })
            },
        )
        .await
    }

    /// Validate the archive and, if it is encrypted, find its password
    async fn unlock(
        &self,
        handle: &ArchiveHandle,
        passwords: &PasswordList,
    ) -> Result<Option<String>> {
        let opener = Arc::clone(&self.opener);
        let probe = handle.clone();
        let status = run_blocking(handle.path(), move || {
            validate_integrity(opener.as_ref(), &probe, None)
        })
        .await?;

        match status {
            IntegrityStatus::Valid => Ok(None),
            IntegrityStatus::Invalid { reason } => {
                Err(Error::Extraction(ExtractionError::CorruptArchive {
                    archive: handle.path().to_path_buf(),
                    reason,
                }))
            }
            IntegrityStatus::PasswordRequired => {
                if passwords.is_empty() {
                    return Err(Error::Extraction(ExtractionError::NoPasswordsAvailable {
                        archive: handle.path().to_path_buf(),
                    }));
                }

                info!(
                    archive = %handle.name(),
                    password_count = passwords.len(),
                    "archive is encrypted, trying passwords"
                );
                let opener = Arc::clone(&self.opener);
                let probe = handle.clone();
                let candidates = passwords.clone();
                let found = run_blocking(handle.path(), move || {
                    resolve_password(opener.as_ref(), &probe, &candidates)
                })
                .await?;

                match found {
                    Some(password) => {
                        info!(archive = %handle.name(), "password found");
                        self.emit(Event::PasswordResolved {
                            archive: handle.path().to_path_buf(),
                        });
                        Ok(Some(password))
                    }
                    None => Err(Error::Extraction(ExtractionError::AllPasswordsFailed {
                        archive: handle.path().to_path_buf(),
                        count: passwords.len(),
                    })),
                }
            }
        }
    }

    /// Estimate free space; blocks the archive only when configured to
    ///
    /// An archive whose size cannot be read is let through.
    async fn preflight(
        &self,
        handle: &ArchiveHandle,
        password: Option<&str>,
        destination: &Path,
    ) -> Result<()> {
        let settings = &self.config.disk_space;
        if !settings.enabled {
            return Ok(());
        }

        let opener = Arc::clone(&self.opener);
        let probe = handle.clone();
        let password = password.map(str::to_string);
        let target = destination.to_path_buf();
        let margin = settings.safety_margin;
        let estimate = run_blocking(handle.path(), move || {
            let mut reader = opener.open(&probe)?;
            reader.set_password(password.as_deref());
            let manifest = reader.list_entries()?;
            Ok(check_disk_space(&manifest, &target, margin))
        })
        .await;

        let check = match estimate {
            Ok(check) => check,
            Err(e) => {
                warn!(
                    archive = %handle.name(),
                    error = %e,
                    "cannot estimate extracted size, proceeding without a space check"
                );
                return Ok(());
            }
        };

        if let SpaceCheck::Insufficient {
            required,
            available,
        } = check
        {
            if settings.block_on_insufficient {
                return Err(Error::InsufficientSpace {
                    required,
                    available,
                });
            }
            warn!(
                archive = %handle.name(),
                required,
                available,
                "continuing despite insufficient disk space"
            );
        }
        Ok(())
    }
}

/// Run blocking archive work off the async runtime
async fn run_blocking<T, F>(archive: &Path, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(work).await.map_err(|e| {
        Error::Extraction(ExtractionError::ExtractionFailed {
            archive: archive.to_path_buf(),
            reason: format!("extraction task panicked: {}", e),
        })
    })?
}

/// Delete a successfully processed archive; failure is logged only
async fn remove_source(handle: &ArchiveHandle) {
    let path: PathBuf = handle.path().to_path_buf();
    match tokio::fs::remove_file(&path).await {
        Ok(()) => info!(archive = %handle.name(), "deleted original archive"),
        Err(e) => error!(archive = %handle.name(), error = %e, "failed to delete original archive"),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
