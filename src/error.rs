//! Error types for archive-sweep
//!
//! This module provides the error taxonomy for the extraction pipeline:
//! - Run-level errors (configuration, unreadable target directory, I/O)
//! - Archive-level errors ([`ExtractionError`]) that decide whether an archive
//!   is retried, skipped or reported as failed
//! - Machine-readable error codes for structured log fields

use crate::types::ProcessingOutcome;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for archive-sweep operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for archive-sweep
///
/// Each variant includes contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "retry.max_attempts")
        key: Option<String>,
    },

    /// Archive extraction error (open, password, extract, reconcile, verify)
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The target directory cannot be enumerated; aborts the whole run
    #[error("cannot read directory {path}: {reason}")]
    DirectoryUnavailable {
        /// The directory that was requested
        path: PathBuf,
        /// Why it could not be read
        reason: String,
    },

    /// Insufficient disk space
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the operation
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Archive-level errors raised by readers, the password resolver and the
/// staged extractor
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// File extension or signature is not a supported container
    #[error("unsupported archive format: {archive}")]
    UnsupportedFormat {
        /// The archive that could not be classified
        archive: PathBuf,
    },

    /// Structural corruption (bad headers, unreadable central directory)
    #[error("corrupt archive {archive}: {reason}")]
    CorruptArchive {
        /// The corrupt archive
        archive: PathBuf,
        /// What the reader reported
        reason: String,
    },

    /// The archive needs a password before it can be read or tested
    #[error("password required for archive {archive}")]
    PasswordRequired {
        /// The encrypted archive
        archive: PathBuf,
    },

    /// A password was supplied but did not decrypt the archive
    #[error("wrong password for encrypted archive {archive}")]
    WrongPassword {
        /// The encrypted archive that could not be opened
        archive: PathBuf,
    },

    /// Every candidate password was rejected
    #[error("all {count} passwords failed for archive {archive}")]
    AllPasswordsFailed {
        /// The encrypted archive that could not be opened
        archive: PathBuf,
        /// The number of passwords that were tried
        count: usize,
    },

    /// The archive is encrypted and no candidate passwords were supplied
    #[error("no passwords available for encrypted archive {archive}")]
    NoPasswordsAvailable {
        /// The encrypted archive that requires a password
        archive: PathBuf,
    },

    /// I/O failure while extracting or moving (disk full, permission denied)
    #[error("I/O failure while extracting {archive}: {reason}")]
    ExtractionIo {
        /// The archive being extracted
        archive: PathBuf,
        /// The underlying failure
        reason: String,
    },

    /// A single destination item could not be placed (per-item, never aborts a run)
    #[error("collision at {path}: {reason}")]
    MoveCollision {
        /// The destination path where the collision occurred
        path: PathBuf,
        /// Why the item could not be placed
        reason: String,
    },

    /// Post-extraction verification found missing or size-mismatched entries
    #[error("verification failed for {archive}: {missing} missing, {mismatched} size mismatches")]
    VerificationMismatch {
        /// The archive whose contents did not verify
        archive: PathBuf,
        /// Number of entries absent from the destination
        missing: usize,
        /// Number of entries present with a different size
        mismatched: usize,
    },

    /// A single member failed to extract (CRC error in one entry, unsafe name)
    #[error("extraction failed for {archive}: {reason}")]
    ExtractionFailed {
        /// The archive being extracted
        archive: PathBuf,
        /// The reason extraction failed
        reason: String,
    },
}

impl ExtractionError {
    /// True for password-related failures (required, wrong, exhausted, none available)
    pub fn is_password_error(&self) -> bool {
        matches!(
            self,
            ExtractionError::PasswordRequired { .. }
                | ExtractionError::WrongPassword { .. }
                | ExtractionError::AllPasswordsFailed { .. }
                | ExtractionError::NoPasswordsAvailable { .. }
        )
    }

    /// True when a single-member failure must abort the whole extraction stage
    pub fn is_fatal_io(&self) -> bool {
        matches!(self, ExtractionError::ExtractionIo { .. })
    }
}

impl Error {
    /// Get the machine-readable error code used in structured log fields
    pub fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Extraction(e) => match e {
                ExtractionError::UnsupportedFormat { .. } => "unsupported_format",
                ExtractionError::CorruptArchive { .. } => "corrupt_archive",
                ExtractionError::PasswordRequired { .. } => "password_required",
                ExtractionError::WrongPassword { .. } => "wrong_password",
                ExtractionError::AllPasswordsFailed { .. } => "all_passwords_failed",
                ExtractionError::NoPasswordsAvailable { .. } => "no_passwords_available",
                ExtractionError::ExtractionIo { .. } => "extraction_io",
                ExtractionError::MoveCollision { .. } => "move_collision",
                ExtractionError::VerificationMismatch { .. } => "verification_mismatch",
                ExtractionError::ExtractionFailed { .. } => "extraction_failed",
            },
            Error::Io(_) => "io_error",
            Error::DirectoryUnavailable { .. } => "directory_unavailable",
            Error::InsufficientSpace { .. } => "insufficient_space",
            Error::Serialization(_) => "serialization_error",
        }
    }

    /// Map a per-archive failure to the outcome recorded in the run summary
    pub fn outcome(&self) -> ProcessingOutcome {
        match self {
            Error::Extraction(e) => match e {
                ExtractionError::UnsupportedFormat { .. } => ProcessingOutcome::Skipped,
                ExtractionError::CorruptArchive { .. } => ProcessingOutcome::FailedCorrupt,
                ExtractionError::PasswordRequired { .. }
                | ExtractionError::WrongPassword { .. }
                | ExtractionError::AllPasswordsFailed { .. }
                | ExtractionError::NoPasswordsAvailable { .. } => {
                    ProcessingOutcome::FailedNoPassword
                }
                ExtractionError::VerificationMismatch { .. } => {
                    ProcessingOutcome::FailedVerification
                }
                ExtractionError::ExtractionIo { .. }
                | ExtractionError::MoveCollision { .. }
                | ExtractionError::ExtractionFailed { .. } => ProcessingOutcome::FailedIo,
            },
            Error::InsufficientSpace { .. } => ProcessingOutcome::FailedIo,
            Error::Io(_) | Error::DirectoryUnavailable { .. } => {
                ProcessingOutcome::FailedIo
            }
            Error::Config { .. } | Error::Serialization(_) => {
                ProcessingOutcome::FailedIo
            }
        }
    }

    /// Shorthand for building an [`ExtractionError::ExtractionIo`] from an I/O error
    pub(crate) fn extraction_io(archive: &std::path::Path, e: impl std::fmt::Display) -> Self {
        Error::Extraction(ExtractionError::ExtractionIo {
            archive: archive.to_path_buf(),
            reason: e.to_string(),
        })
    }
}
