use crate::types::EntryManifest;
use crate::utils::get_available_space;
use std::path::Path;
use tracing::{debug, warn};

/// Outcome of the free-space estimate for one extraction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpaceCheck {
    /// Enough room for the uncompressed contents plus margin
    Sufficient {
        /// Bytes needed including the safety margin
        required: u64,
        /// Bytes free at the destination
        available: u64,
    },
    /// Not enough room
    Insufficient {
        /// Bytes needed including the safety margin
        required: u64,
        /// Bytes free at the destination
        available: u64,
    },
    /// Free space could not be determined
    Unknown {
        /// Why the query failed
        reason: String,
    },
}

impl SpaceCheck {
    /// True only for [`SpaceCheck::Insufficient`]
    pub fn is_insufficient(&self) -> bool {
        matches!(self, SpaceCheck::Insufficient { .. })
    }
}

/// Bytes to reserve for `manifest`: total uncompressed size times `1 + margin`
pub fn required_space(manifest: &EntryManifest, safety_margin: f64) -> u64 {
    let total = manifest.total_size() as f64;
    // float-to-int `as` saturates, so absurd sizes clamp to u64::MAX
    (total * (1.0 + safety_margin)).ceil() as u64
}

/// Compare the requirement against a known amount of free space
pub fn assess(manifest: &EntryManifest, available: u64, safety_margin: f64) -> SpaceCheck {
    let required = required_space(manifest, safety_margin);
    if available >= required {
        SpaceCheck::Sufficient {
            required,
            available,
        }
    } else {
        SpaceCheck::Insufficient {
            required,
            available,
        }
    }
}

/// Estimate whether `destination` has room for the archive's contents
///
/// Never fails: an unreadable free-space figure yields [`SpaceCheck::Unknown`].
pub fn check_disk_space(
    manifest: &EntryManifest,
    destination: &Path,
    safety_margin: f64,
) -> SpaceCheck {
    let check = match get_available_space(destination) {
        Ok(available) => assess(manifest, available, safety_margin),
        Err(e) => SpaceCheck::Unknown {
            reason: e.to_string(),
        },
    };

    match &check {
        SpaceCheck::Sufficient {
            required,
            available,
        } => debug!(?destination, required, available, "disk space sufficient"),
        SpaceCheck::Insufficient {
            required,
            available,
        } => warn!(?destination, required, available, "insufficient disk space for extraction"),
        SpaceCheck::Unknown { reason } => {
            warn!(?destination, %reason, "could not determine free disk space")
        }
    }
    check
}
