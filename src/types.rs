//! Core types for archive-sweep

use crate::config::CollisionPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Container format detected by file extension
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// ZIP archive (.zip)
    Zip,
    /// RAR archive (.rar)
    Rar,
    /// Anything else
    Unsupported,
}

impl ArchiveFormat {
    /// Detect the format from a path's extension (case-insensitive)
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("zip") => ArchiveFormat::Zip,
            Some("rar") => ArchiveFormat::Rar,
            _ => ArchiveFormat::Unsupported,
        }
    }

    /// True for formats a reader exists for
    pub fn is_supported(&self) -> bool {
        !matches!(self, ArchiveFormat::Unsupported)
    }
}

/// One archive file, classified once and never re-inspected
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveHandle {
    path: PathBuf,
    format: ArchiveFormat,
}

impl ArchiveHandle {
    /// Classify a path by its extension
    pub fn classify(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = ArchiveFormat::from_path(&path);
        Self { path, format }
    }

    /// Path of the archive file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Detected format
    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// File name for log messages
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Archive name without its extension (`a.zip` -> `a`, `set.part1.rar` -> `set`)
    pub fn stem(&self) -> String {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());

        if self.format == ArchiveFormat::Rar
            && let Some((base, _)) = split_volume_suffix(&stem)
        {
            return base.to_string();
        }
        stem
    }

    /// True for `name.partN.rar` with N > 1; only the first volume is an entry point
    pub fn is_continuation_volume(&self) -> bool {
        if self.format != ArchiveFormat::Rar {
            return false;
        }
        let Some(stem) = self.path.file_stem().and_then(|s| s.to_str()) else {
            return false;
        };
        matches!(split_volume_suffix(stem), Some((_, n)) if n > 1)
    }
}

/// Split `name.part03` into (`name`, 3)
fn split_volume_suffix(stem: &str) -> Option<(&str, u32)> {
    let (base, suffix) = stem.rsplit_once('.')?;
    let digits = suffix.to_ascii_lowercase().strip_prefix("part")?.to_string();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|n| (base, n))
}

/// One entry of an archive's manifest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Relative path with `/` separators
    pub path: String,
    /// Uncompressed size in bytes (0 for directories)
    pub size: u64,
    /// Directory entry
    pub is_dir: bool,
}

impl ManifestEntry {
    /// Build an entry, normalizing separators and stripping leading `./` and `/`
    pub fn new(raw_path: &str, size: u64, is_dir: bool) -> Self {
        Self {
            path: crate::utils::normalize_entry_path(raw_path),
            size: if is_dir { 0 } else { size },
            is_dir,
        }
    }
}

/// Ordered, read-only list of an archive's entries
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryManifest {
    entries: Vec<ManifestEntry>,
}

impl EntryManifest {
    /// Wrap entries in archive order
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter()
    }

    /// Iterate over non-directory entries
    pub fn files(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| !e.is_dir)
    }

    /// First non-directory entry, used for password probing
    pub fn first_file(&self) -> Option<&ManifestEntry> {
        self.files().next()
    }

    /// Sum of uncompressed sizes (directories contribute zero)
    pub fn total_size(&self) -> u64 {
        self.files().map(|e| e.size).fold(0u64, u64::saturating_add)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No entries at all
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything one pass of the staged extractor needs; not persisted
#[derive(Clone, Debug)]
pub struct ExtractionAttempt {
    /// The archive to extract
    pub archive: ArchiveHandle,
    /// Directory the archive's contents are reconciled into
    pub destination: PathBuf,
    /// Password resolved by the password resolver, if the archive needed one
    pub password: Option<String>,
    /// Collision policy for reconciliation
    pub collision: CollisionPolicy,
    /// 1-based attempt number within the retry cycle
    pub attempt: u32,
}

/// What to do with one destination path that already exists
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollisionDecision {
    /// Leave the existing item, do not move the staged one
    SkipExisting,
    /// Remove the existing item, then move
    OverwriteExisting,
    /// Move to this unused path instead
    RenameTo(PathBuf),
}

/// Per-archive result recorded in the run summary
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingOutcome {
    /// Extracted, reconciled and verified
    Succeeded,
    /// Not processed (unsupported or continuation volume)
    Skipped,
    /// Structural corruption
    FailedCorrupt,
    /// Encrypted and no candidate password worked
    FailedNoPassword,
    /// Destination did not match the manifest
    FailedVerification,
    /// I/O failure, retries exhausted
    FailedIo,
}

impl ProcessingOutcome {
    /// True for any failed-* outcome
    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            ProcessingOutcome::Succeeded | ProcessingOutcome::Skipped
        )
    }
}

/// Counts aggregated over one run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// At least one supported archive was present
    pub found_any: bool,
    /// Archives that succeeded
    pub processed: usize,
    /// Archives that failed
    pub failed: usize,
    /// Archives skipped without an attempt
    pub skipped: usize,
    /// Outcome per archive, in processing order
    pub outcomes: Vec<(PathBuf, ProcessingOutcome)>,
}

impl RunSummary {
    /// Record one archive's outcome and update the counters
    pub fn record(&mut self, archive: &Path, outcome: ProcessingOutcome) {
        match outcome {
            ProcessingOutcome::Succeeded => self.processed += 1,
            ProcessingOutcome::Skipped => self.skipped += 1,
            _ => self.failed += 1,
        }
        self.outcomes.push((archive.to_path_buf(), outcome));
    }

    /// Outcome recorded for an archive, if any
    pub fn outcome_of(&self, archive: &Path) -> Option<ProcessingOutcome> {
        self.outcomes
            .iter()
            .find(|(path, _)| path == archive)
            .map(|(_, outcome)| *outcome)
    }
}

/// Event emitted during a run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Processing of an archive began
    ArchiveStarted {
        /// Archive path
        archive: PathBuf,
    },

    /// A candidate password unlocked the archive
    PasswordResolved {
        /// Archive path
        archive: PathBuf,
    },

    /// Byte progress while extracting a large archive into staging
    Extracting {
        /// Archive path
        archive: PathBuf,
        /// Bytes written so far
        bytes_done: u64,
        /// Total uncompressed bytes
        bytes_total: u64,
    },

    /// Staged files are being moved into the destination
    Reconciling {
        /// Archive path
        archive: PathBuf,
        /// Destination directory
        destination: PathBuf,
    },

    /// Destination is being checked against the manifest
    Verifying {
        /// Archive path
        archive: PathBuf,
    },

    /// A transient failure will be retried after a delay
    RetryScheduled {
        /// Archive path
        archive: PathBuf,
        /// The attempt that just failed (1-based)
        attempt: u32,
        /// Delay before the next attempt, in milliseconds
        delay_ms: u64,
    },

    /// Processing of an archive ended
    ArchiveFinished {
        /// Archive path
        archive: PathBuf,
        /// Final outcome
        outcome: ProcessingOutcome,
    },

    /// The whole directory has been processed
    RunFinished {
        /// Aggregated counters
        summary: RunSummary,
    },
}
