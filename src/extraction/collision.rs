use crate::config::CollisionPolicy;
use crate::error::{Error, ExtractionError, Result};
use crate::types::CollisionDecision;
use crate::utils::path_exists;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Decide what to do with `dest`, which already exists
///
/// Decided per path at move time and never cached, so an item placed
/// earlier in the same reconciliation is seen as existing.
///
/// Under [`CollisionPolicy::Rename`] the candidate is `base_N.ext` for the
/// smallest unused `N >= 1`, where `ext` is the last extension only
/// (`a.tar.gz` becomes `a.tar_1.gz`). Exhausting `max_attempts` is a
/// per-item [`ExtractionError::MoveCollision`].
///
/// # Examples
///
/// ```no_run
/// use archive_sweep::config::CollisionPolicy;
/// use archive_sweep::extraction::resolve_collision;
/// use std::path::Path;
///
/// let decision = resolve_collision(Path::new("/tmp/out/x.txt"), CollisionPolicy::Rename, 999).unwrap();
/// // If /tmp/out/x_1.txt is free: CollisionDecision::RenameTo("/tmp/out/x_1.txt")
/// ```
pub fn resolve_collision(
    dest: &Path,
    policy: CollisionPolicy,
    max_attempts: u32,
) -> Result<CollisionDecision> {
    match policy {
        CollisionPolicy::Skip => Ok(CollisionDecision::SkipExisting),
        CollisionPolicy::Overwrite => Ok(CollisionDecision::OverwriteExisting),
        CollisionPolicy::Rename => {
            for n in 1..=max_attempts {
                let candidate = renamed_path(dest, n);
                if !path_exists(&candidate) {
                    return Ok(CollisionDecision::RenameTo(candidate));
                }
            }
            Err(Error::Extraction(ExtractionError::MoveCollision {
                path: dest.to_path_buf(),
                reason: format!("no unused name after {} attempts", max_attempts),
            }))
        }
    }
}

/// `dir/base.ext` -> `dir/base_N.ext`; names without an extension get `_N` appended
pub(crate) fn renamed_path(path: &Path, n: u32) -> PathBuf {
    let mut name: OsString = path
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    name.push(format!("_{}", n));
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}
