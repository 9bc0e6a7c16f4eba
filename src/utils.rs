//! Filesystem helpers: free space, entry-path normalization, moves

use std::io;
use std::path::{Component, Path, PathBuf};

/// Normalize an archive entry name to a relative, `/`-separated path
///
/// Backslashes become `/`, leading `./` and `/` are removed, and trailing
/// separators (directory markers) are dropped.
pub fn normalize_entry_path(raw: &str) -> String {
    let unified = raw.replace('\\', "/");
    unified
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve a normalized entry path under `root`, refusing anything that escapes it
///
/// Returns `None` for absolute paths, `..` components, or empty names.
pub fn safe_join(root: &Path, entry_path: &str) -> Option<PathBuf> {
    let relative = Path::new(entry_path);
    let mut clean = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        return None;
    }
    Some(root.join(clean))
}

/// Existence check that does not follow symlinks
pub fn path_exists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

/// Move a file, falling back to copy + remove when `rename` crosses filesystems
pub fn move_file(source: &Path, dest: &Path) -> io::Result<()> {
    match std::fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            std::fs::copy(source, dest)?;
            std::fs::remove_file(source)
        }
        Err(e) => Err(e),
    }
}

/// Remove a file or a directory tree
pub fn remove_path(path: &Path) -> io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Get available disk space for a given path
///
/// Uses platform-specific APIs to query filesystem statistics:
/// - Unix: statvfs
/// - Windows: GetDiskFreeSpaceExW
///
/// If `path` does not exist yet, the nearest existing ancestor is queried,
/// since a destination directory may only be created later in the pipeline.
pub fn get_available_space(path: &Path) -> io::Result<u64> {
    let probe = path
        .ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .unwrap_or_else(|| Path::new("."));
    free_bytes(probe)
}

#[cfg(unix)]
fn free_bytes(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: c_path is a valid NUL-terminated string, stat is zero-initialized
    // and only read after statvfs reports success.
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(io::Error::last_os_error());
        }
        // f_bavail: blocks available to unprivileged users, f_frsize: fragment size
        #[allow(clippy::unnecessary_cast)]
        Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
    }
}

#[cfg(windows)]
fn free_bytes(path: &Path) -> io::Result<u64> {
    use std::os::windows::ffi::OsStrExt;
    use winapi::um::fileapi::GetDiskFreeSpaceExW;

    let wide_path: Vec<u16> = path
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    // SAFETY: wide_path is NUL-terminated and every out-pointer refers to a
    // live, aligned u64 that is only read after a successful call.
    unsafe {
        let mut free_bytes_available: u64 = 0;
        let mut total_bytes: u64 = 0;
        let mut total_free_bytes: u64 = 0;

        if GetDiskFreeSpaceExW(
            wide_path.as_ptr(),
            &mut free_bytes_available as *mut u64 as *mut _,
            &mut total_bytes as *mut u64 as *mut _,
            &mut total_free_bytes as *mut u64 as *mut _,
        ) == 0
        {
            return Err(io::Error::last_os_error());
        }

        Ok(free_bytes_available)
    }
}

#[cfg(not(any(unix, windows)))]
fn free_bytes(_path: &Path) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Disk space checking is not supported on this platform",
    ))
}
