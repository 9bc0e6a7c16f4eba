//! Staged extraction: extract into a private staging directory, reconcile
//! into the destination under the collision policy, then verify the
//! destination against a freshly read manifest.
//!
//! The staging directory is a [`tempfile::TempDir`], so it is removed on
//! every exit path, including early returns and unwinding.

use crate::config::{CollisionPolicy, ExtractionConfig};
use crate::error::{Error, ExtractionError, Result};
use crate::types::{
    ArchiveHandle, CollisionDecision, EntryManifest, Event, ExtractionAttempt, ManifestEntry,
};
use crate::utils::{move_file, path_exists, remove_path};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::collision::resolve_collision;
use super::reader::{ArchiveOpener, ArchiveReader, ensure_dir};

/// Stages of one extraction attempt, in order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Opening a read session
    Open,
    /// Applying the resolved password
    PasswordSet,
    /// Extracting every member into staging
    ExtractToStaging,
    /// Moving staged items into the destination
    Reconcile,
    /// Checking the destination against the manifest
    Verify,
    /// Finished successfully
    Done,
}

/// A member that could not be extracted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberFailure {
    /// Entry path inside the archive
    pub path: String,
    /// What went wrong
    pub reason: String,
}

/// Where every staged item ended up
#[derive(Clone, Debug, Default)]
pub struct ReconcileReport {
    /// Files placed in the destination, keyed by entry path
    pub placed: BTreeMap<String, PathBuf>,
    /// Files left in staging because the destination already had them
    pub skipped: BTreeSet<String>,
    /// Items moved under a new name
    pub renamed: Vec<(String, PathBuf)>,
    /// Items that replaced an existing destination item
    pub overwritten: Vec<String>,
    /// Items that could not be placed
    pub failed: Vec<(String, String)>,
}

impl ReconcileReport {
    /// True when every staged item was placed or deliberately skipped
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// New path of a renamed item, if it was renamed
    pub fn renamed_to(&self, rel: &str) -> Option<PathBuf> {
        self.renamed
            .iter()
            .rev()
            .find(|(item, _)| item == rel)
            .map(|(_, path)| path.clone())
    }

    /// Fold in what a later reconcile placed
    fn absorb(&mut self, later: &ReconcileReport) {
        self.placed
            .extend(later.placed.iter().map(|(rel, path)| (rel.clone(), path.clone())));
        for (rel, path) in &later.renamed {
            if self.renamed_to(rel).as_ref() != Some(path) {
                self.renamed.push((rel.clone(), path.clone()));
            }
        }
    }
}

/// Size disagreement found during verification
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SizeMismatch {
    /// Entry path inside the archive
    pub path: String,
    /// Size recorded in the manifest
    pub expected: u64,
    /// Size found on disk
    pub actual: u64,
}

/// Destination checked against the manifest
#[derive(Clone, Debug, Default)]
pub struct VerificationReport {
    /// Files found with the expected size
    pub verified: usize,
    /// Files excluded because the collision policy kept the existing item
    pub skipped: Vec<String>,
    /// Files checked at a renamed path
    pub renamed: Vec<(String, PathBuf)>,
    /// Files absent from the destination
    pub missing: Vec<String>,
    /// Files present with the wrong size
    pub mismatched: Vec<SizeMismatch>,
}

impl VerificationReport {
    /// No missing or mismatched files
    pub fn is_success(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty()
    }
}

/// Everything one successful attempt did
#[derive(Clone, Debug)]
pub struct ExtractionReport {
    /// The archive that was extracted
    pub archive: PathBuf,
    /// Where its contents were reconciled
    pub destination: PathBuf,
    /// Bytes written into staging
    pub bytes_extracted: u64,
    /// Members that failed without aborting extraction
    pub member_failures: Vec<MemberFailure>,
    /// Result of the reconcile stage
    pub reconcile: ReconcileReport,
    /// Result of the verify stage
    pub verification: VerificationReport,
}

/// Runs one [`ExtractionAttempt`] through every [`Stage`]
///
/// Blocking; call it from `spawn_blocking` inside async code.
///
/// One extractor serves every attempt at the same archive. Items an earlier
/// attempt placed are replaced at the same path by later attempts instead of
/// going through the collision policy again.
pub struct StagedExtractor {
    opener: Arc<dyn ArchiveOpener>,
    config: ExtractionConfig,
    event_tx: broadcast::Sender<Event>,
    placed_earlier: Mutex<ReconcileReport>,
}

impl StagedExtractor {
    /// Create an extractor that reports progress on `event_tx`
    pub fn new(
        opener: Arc<dyn ArchiveOpener>,
        config: ExtractionConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            opener,
            config,
            event_tx,
            placed_earlier: Mutex::new(ReconcileReport::default()),
        }
    }

    /// Extract, reconcile and verify one archive
    ///
    /// Fails with [`ExtractionError::VerificationMismatch`] when the
    /// destination does not match the manifest afterwards.
    pub fn run(&self, attempt: &ExtractionAttempt) -> Result<ExtractionReport> {
        let handle = &attempt.archive;
        let archive = handle.path();

        self.enter(handle, Stage::Open);
        let mut reader = self.opener.open(handle)?;
        if let Some(password) = attempt.password.as_deref() {
            self.enter(handle, Stage::PasswordSet);
            reader.set_password(Some(password));
        }
        let manifest = reader.list_entries()?;

        ensure_dir(archive, &attempt.destination)?;
        let staging = self.create_staging(handle, &attempt.destination)?;

        self.enter(handle, Stage::ExtractToStaging);
        let (bytes_extracted, member_failures) =
            self.extract_to_staging(reader.as_mut(), handle, &manifest, staging.path())?;
        drop(reader);

        self.enter(handle, Stage::Reconcile);
        self.event_tx
            .send(Event::Reconciling {
                archive: archive.to_path_buf(),
                destination: attempt.destination.clone(),
            })
            .ok();
        let reconcile = {
            let mut earlier = self
                .placed_earlier
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let report = self.reconcile_after(
                staging.path(),
                &attempt.destination,
                attempt.collision,
                &earlier,
            );
            earlier.absorb(&report);
            report
        };
        if !reconcile.is_complete() {
            warn!(
                archive = %handle.name(),
                failed = reconcile.failed.len(),
                "reconciliation incomplete"
            );
        }

        self.enter(handle, Stage::Verify);
        self.event_tx
            .send(Event::Verifying {
                archive: archive.to_path_buf(),
            })
            .ok();
        let mut verifier = self.opener.open(handle)?;
        verifier.set_password(attempt.password.as_deref());
        let fresh_manifest = verifier.list_entries()?;
        drop(verifier);
        let verification = verify_destination(&fresh_manifest, &attempt.destination, &reconcile);

        if let Err(e) = staging.close() {
            warn!(archive = %handle.name(), error = %e, "failed to remove staging directory");
        }

        if !verification.is_success() {
            error!(
                archive = %handle.name(),
                missing = ?verification.missing,
                mismatched = verification.mismatched.len(),
                "verification failed"
            );
            return Err(Error::Extraction(ExtractionError::VerificationMismatch {
                archive: archive.to_path_buf(),
                missing: verification.missing.len(),
                mismatched: verification.mismatched.len(),
            }));
        }

        self.enter(handle, Stage::Done);
        info!(
            archive = %handle.name(),
            destination = ?attempt.destination,
            verified = verification.verified,
            skipped = verification.skipped.len(),
            renamed = verification.renamed.len(),
            "archive extracted and verified"
        );

        Ok(ExtractionReport {
            archive: archive.to_path_buf(),
            destination: attempt.destination.clone(),
            bytes_extracted,
            member_failures,
            reconcile,
            verification,
        })
    }

    fn enter(&self, handle: &ArchiveHandle, stage: Stage) {
        debug!(archive = %handle.name(), ?stage, "entering stage");
    }

    /// Hidden staging directory beside the destination (or under `staging_dir`)
    fn create_staging(&self, handle: &ArchiveHandle, destination: &Path) -> Result<TempDir> {
        let parent = self
            .config
            .staging_dir
            .clone()
            .or_else(|| destination.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| destination.to_path_buf());
        ensure_dir(handle.path(), &parent)?;

        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}-staging-", handle.stem()))
            .tempdir_in(&parent)
            .map_err(|e| {
                Error::extraction_io(
                    handle.path(),
                    format!("failed to create staging directory: {}", e),
                )
            })?;
        debug!(archive = %handle.name(), staging = ?staging.path(), "created staging directory");
        Ok(staging)
    }

    fn extract_to_staging(
        &self,
        reader: &mut dyn ArchiveReader,
        handle: &ArchiveHandle,
        manifest: &EntryManifest,
        staging: &Path,
    ) -> Result<(u64, Vec<MemberFailure>)> {
        let bytes_total = manifest.total_size();
        let report_progress = bytes_total > self.config.progress_threshold;
        let continue_on_error = self.config.continue_on_member_error;
        let archive = handle.path().to_path_buf();

        let mut bytes_done = 0u64;
        let mut failures = Vec::new();
        let mut observer = |entry: &ManifestEntry, result: &Result<u64>| match result {
            Ok(bytes) => {
                bytes_done = bytes_done.saturating_add(*bytes);
                if report_progress {
                    self.event_tx
                        .send(Event::Extracting {
                            archive: archive.clone(),
                            bytes_done,
                            bytes_total,
                        })
                        .ok();
                }
                ControlFlow::Continue(())
            }
            Err(Error::Extraction(e)) if continue_on_error && !e.is_fatal_io() => {
                warn!(archive = %handle.name(), entry = %entry.path, error = %e, "member failed, continuing");
                failures.push(MemberFailure {
                    path: entry.path.clone(),
                    reason: e.to_string(),
                });
                ControlFlow::Continue(())
            }
            Err(e) => {
                error!(archive = %handle.name(), entry = %entry.path, error = %e, "extraction aborted");
                ControlFlow::Break(())
            }
        };
        reader.extract_all(staging, &mut observer)?;

        debug!(
            archive = %handle.name(),
            bytes = bytes_done,
            failed_members = failures.len(),
            "extracted to staging"
        );
        Ok((bytes_done, failures))
    }

    /// Move everything under `staging` into `destination`
    pub fn reconcile(
        &self,
        staging: &Path,
        destination: &Path,
        policy: CollisionPolicy,
    ) -> ReconcileReport {
        self.reconcile_after(staging, destination, policy, &ReconcileReport::default())
    }

    /// Reconcile again after `earlier`, reusing the paths it placed
    pub fn reconcile_after(
        &self,
        staging: &Path,
        destination: &Path,
        policy: CollisionPolicy,
        earlier: &ReconcileReport,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        self.reconcile_dir(staging, destination, "", policy, earlier, &mut report);
        report
    }

    fn reconcile_dir(
        &self,
        staged_dir: &Path,
        dest_dir: &Path,
        rel: &str,
        policy: CollisionPolicy,
        earlier: &ReconcileReport,
        report: &mut ReconcileReport,
    ) {
        let mut children = match std::fs::read_dir(staged_dir)
            .and_then(|entries| entries.collect::<std::io::Result<Vec<_>>>())
        {
            Ok(children) => children,
            Err(e) => {
                report.failed.push((rel.to_string(), e.to_string()));
                return;
            }
        };
        children.sort_by_key(|child| child.file_name());

        for child in children {
            let name = child.file_name();
            let child_rel = join_rel(rel, &name.to_string_lossy());
            let source = child.path();
            let target = dest_dir.join(&name);

            if child.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                self.reconcile_subdir(&source, &target, &child_rel, policy, earlier, report);
            } else {
                self.reconcile_file(&source, &target, &child_rel, policy, earlier, report);
            }
        }
    }

    fn reconcile_subdir(
        &self,
        source: &Path,
        target: &Path,
        rel: &str,
        policy: CollisionPolicy,
        earlier: &ReconcileReport,
        report: &mut ReconcileReport,
    ) {
        if let Some(renamed) = earlier.renamed_to(rel).filter(|path| path.is_dir()) {
            report.renamed.push((rel.to_string(), renamed.clone()));
            self.reconcile_dir(source, &renamed, rel, policy, earlier, report);
            return;
        }

        let existing = match std::fs::symlink_metadata(target) {
            Ok(meta) => meta,
            Err(_) => {
                if let Err(e) = std::fs::create_dir_all(target) {
                    report.failed.push((rel.to_string(), e.to_string()));
                    return;
                }
                self.reconcile_dir(source, target, rel, policy, earlier, report);
                return;
            }
        };

        // Directory onto directory merges; existing directories are never replaced
        if existing.is_dir() {
            self.reconcile_dir(source, target, rel, policy, earlier, report);
            return;
        }

        match resolve_collision(target, policy, self.config.rename_attempts) {
            Ok(CollisionDecision::SkipExisting) => {
                warn!(?target, "file in place of staged directory, skipping subtree");
                report.skipped.extend(files_under(source, rel));
            }
            Ok(CollisionDecision::OverwriteExisting) => {
                if let Err(e) = remove_path(target).and_then(|_| std::fs::create_dir(target)) {
                    report.failed.push((rel.to_string(), e.to_string()));
                    return;
                }
                report.overwritten.push(rel.to_string());
                self.reconcile_dir(source, target, rel, policy, earlier, report);
            }
            Ok(CollisionDecision::RenameTo(renamed)) => {
                if let Err(e) = std::fs::create_dir(&renamed) {
                    report.failed.push((rel.to_string(), e.to_string()));
                    return;
                }
                report.renamed.push((rel.to_string(), renamed.clone()));
                self.reconcile_dir(source, &renamed, rel, policy, earlier, report);
            }
            Err(e) => {
                warn!(?target, error = %e, "could not place directory");
                report.failed.push((rel.to_string(), e.to_string()));
            }
        }
    }

    fn reconcile_file(
        &self,
        source: &Path,
        target: &Path,
        rel: &str,
        policy: CollisionPolicy,
        earlier: &ReconcileReport,
        report: &mut ReconcileReport,
    ) {
        if let Some(previous) = earlier.placed.get(rel) {
            replace_earlier(source, target, previous, rel, report);
            return;
        }

        if !path_exists(target) {
            place(source, target, rel, report);
            return;
        }

        match resolve_collision(target, policy, self.config.rename_attempts) {
            Ok(CollisionDecision::SkipExisting) => {
                warn!(?target, "destination exists, skipping");
                report.skipped.insert(rel.to_string());
            }
            Ok(CollisionDecision::OverwriteExisting) => {
                if let Err(e) = remove_path(target) {
                    warn!(?target, error = %e, "failed to remove existing item");
                    report.failed.push((rel.to_string(), e.to_string()));
                    return;
                }
                if place(source, target, rel, report) {
                    report.overwritten.push(rel.to_string());
                }
            }
            Ok(CollisionDecision::RenameTo(renamed)) => {
                if place(source, &renamed, rel, report) {
                    warn!(?target, ?renamed, "destination exists, renamed");
                    report.renamed.push((rel.to_string(), renamed));
                }
            }
            Err(e) => {
                warn!(?target, error = %e, "could not place file");
                report.failed.push((rel.to_string(), e.to_string()));
            }
        }
    }
}

/// Put a staged file where an earlier attempt already placed it
fn replace_earlier(
    source: &Path,
    target: &Path,
    previous: &Path,
    rel: &str,
    report: &mut ReconcileReport,
) {
    if path_exists(previous)
        && let Err(e) = remove_path(previous)
    {
        warn!(?previous, error = %e, "failed to remove earlier attempt's file");
        report.failed.push((rel.to_string(), e.to_string()));
        return;
    }
    debug!(?previous, "replacing file placed by an earlier attempt");
    if place(source, previous, rel, report) && previous != target {
        report.renamed.push((rel.to_string(), previous.to_path_buf()));
    }
}

/// Move one staged file; records the outcome and returns whether it landed
fn place(source: &Path, target: &Path, rel: &str, report: &mut ReconcileReport) -> bool {
    match move_file(source, target) {
        Ok(()) => {
            report.placed.insert(rel.to_string(), target.to_path_buf());
            true
        }
        Err(e) => {
            warn!(?source, ?target, error = %e, "failed to move staged file");
            report.failed.push((rel.to_string(), e.to_string()));
            false
        }
    }
}

fn join_rel(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Entry paths of every file below a staged directory
fn files_under(dir: &Path, rel: &str) -> Vec<String> {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| !entry.file_type().is_dir())
        .filter_map(|entry| {
            let inner = entry.path().strip_prefix(dir).ok()?;
            let inner = inner
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            Some(join_rel(rel, &inner))
        })
        .collect()
}

/// Compare the destination with the manifest, scoped to what reconciliation did
///
/// Files kept out by the collision policy form their own category and are
/// not failures. Renamed files are checked at their new path.
pub fn verify_destination(
    manifest: &EntryManifest,
    destination: &Path,
    reconcile: &ReconcileReport,
) -> VerificationReport {
    let mut report = VerificationReport::default();

    for entry in manifest.files() {
        if reconcile.skipped.contains(&entry.path) {
            report.skipped.push(entry.path.clone());
            continue;
        }
        let Some(actual_path) = reconcile.placed.get(&entry.path) else {
            report.missing.push(entry.path.clone());
            continue;
        };

        match std::fs::metadata(actual_path) {
            Ok(meta) if meta.is_file() && meta.len() == entry.size => {
                report.verified += 1;
                if crate::utils::safe_join(destination, &entry.path).as_deref()
                    != Some(actual_path.as_path())
                {
                    report
                        .renamed
                        .push((entry.path.clone(), actual_path.clone()));
                }
            }
            Ok(meta) => report.mismatched.push(SizeMismatch {
                path: entry.path.clone(),
                expected: entry.size,
                actual: meta.len(),
            }),
            Err(_) => report.missing.push(entry.path.clone()),
        }
    }
    report
}
