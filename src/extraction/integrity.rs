use crate::error::{Error, ExtractionError, Result};
use crate::types::ArchiveHandle;
use tracing::{debug, warn};

use super::reader::ArchiveOpener;

/// Result of the pre-extraction integrity check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntegrityStatus {
    /// Every member passed the format's checksum test
    Valid,
    /// Structural corruption or a failed member checksum
    Invalid {
        /// What failed
        reason: String,
    },
    /// Validity cannot be judged without a password
    PasswordRequired,
}

/// Open the archive and run its checksum test
///
/// Corruption is reported as [`IntegrityStatus::Invalid`] rather than an
/// error. Password failures, including a supplied password that does not
/// unlock the archive, yield [`IntegrityStatus::PasswordRequired`]. I/O
/// failures and unsupported formats are returned as errors.
pub fn validate_integrity(
    opener: &dyn ArchiveOpener,
    handle: &ArchiveHandle,
    password: Option<&str>,
) -> Result<IntegrityStatus> {
    let status = match run_check(opener, handle, password) {
        Ok(true) => IntegrityStatus::Valid,
        Ok(false) => IntegrityStatus::Invalid {
            reason: "member failed checksum test".to_string(),
        },
        Err(Error::Extraction(e)) if e.is_password_error() => IntegrityStatus::PasswordRequired,
        Err(Error::Extraction(ExtractionError::CorruptArchive { reason, .. })) => {
            IntegrityStatus::Invalid { reason }
        }
        Err(e) => return Err(e),
    };

    match &status {
        IntegrityStatus::Valid => debug!(archive = %handle.name(), "integrity check passed"),
        IntegrityStatus::Invalid { reason } => {
            warn!(archive = %handle.name(), %reason, "integrity check failed")
        }
        IntegrityStatus::PasswordRequired => {
            debug!(archive = %handle.name(), "archive is encrypted")
        }
    }
    Ok(status)
}

fn run_check(
    opener: &dyn ArchiveOpener,
    handle: &ArchiveHandle,
    password: Option<&str>,
) -> Result<bool> {
    let mut reader = opener.open(handle)?;
    reader.set_password(password);
    reader.list_entries()?;
    reader.test_integrity()
}
