//! Archive reading and staged extraction
//!
//! This module covers everything done to a single archive: opening it with
//! the right reader, checking integrity, finding a password, estimating disk
//! space and extracting through a staging directory into the destination.

mod collision;
mod integrity;
mod password;
mod preflight;
mod rar;
mod reader;
mod staged;
mod zip;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod test_helpers;


// Re-exports
pub use collision::resolve_collision;
pub use integrity::{IntegrityStatus, validate_integrity};
pub use password::{PasswordList, resolve_password};
pub use preflight::{SpaceCheck, assess, check_disk_space, required_space};
pub use rar::RarReader;
pub use reader::{ArchiveOpener, ArchiveReader, DefaultOpener, MemberObserver, open_archive};
pub use staged::{
    ExtractionReport, MemberFailure, ReconcileReport, SizeMismatch, Stage, StagedExtractor,
    VerificationReport, verify_destination,
};
pub use zip::ZipReader;
