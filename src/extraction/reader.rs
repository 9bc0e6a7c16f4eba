//! Archive reader capability
//!
//! Every supported container is exposed through [`ArchiveReader`]. The concrete
//! reader is chosen once, when the archive is opened, from the handle's
//! [`ArchiveFormat`]; callers never inspect the variant afterwards.
//!
//! Failures are returned as explicit [`ExtractionError`] kinds so callers can
//! branch on "needs a password" versus "wrong password" versus "corrupt"
//! without guessing from message text.

use crate::error::{Error, ExtractionError, Result};
use crate::types::{ArchiveFormat, ArchiveHandle, EntryManifest, ManifestEntry};
use std::io::{self, Read, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use super::rar::RarReader;
use super::zip::ZipReader;

/// Callback invoked by [`ArchiveReader::extract_all`] after every member
///
/// Receives the member and either the number of bytes written or the
/// member's failure. Returning `ControlFlow::Break` stops extraction; if the
/// member had failed, that failure becomes the result of `extract_all`.
pub type MemberObserver<'a> = dyn FnMut(&ManifestEntry, &Result<u64>) -> ControlFlow<()> + 'a;

/// One open read session over an archive
pub trait ArchiveReader: Send {
    /// Path of the archive file
    fn archive_path(&self) -> &Path;

    /// Use `password` for every following operation (`None` clears it)
    fn set_password(&mut self, password: Option<&str>);

    /// List entries in archive order, paths normalized to `/`
    ///
    /// Entries whose names would escape the extraction root are omitted.
    fn list_entries(&mut self) -> Result<EntryManifest>;

    /// Run the format's checksum test over every member
    ///
    /// `Ok(false)` means a member failed its checksum for reasons unrelated
    /// to the password. Password problems are reported as
    /// [`ExtractionError::PasswordRequired`] or [`ExtractionError::WrongPassword`].
    fn test_integrity(&mut self) -> Result<bool>;

    /// Whether [`test_integrity`](Self::test_integrity) detects a wrong password
    fn integrity_test_checks_password(&self) -> bool;

    /// Extract every member under `dest`, reporting each one to `observer`
    fn extract_all(&mut self, dest: &Path, observer: &mut MemberObserver<'_>) -> Result<()>;

    /// Extract a single member under `dest`, returning the written path
    fn extract_one(&mut self, entry: &ManifestEntry, dest: &Path) -> Result<PathBuf>;

    /// Read one member fully into memory
    fn read_entry(&mut self, entry: &ManifestEntry) -> Result<Vec<u8>>;
}

/// Opens fresh read sessions; the seam that lets tests substitute readers
pub trait ArchiveOpener: Send + Sync {
    /// Open a new session for `handle`
    fn open(&self, handle: &ArchiveHandle) -> Result<Box<dyn ArchiveReader>>;
}

/// Opener backed by the real ZIP and RAR readers
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultOpener;

impl ArchiveOpener for DefaultOpener {
    fn open(&self, handle: &ArchiveHandle) -> Result<Box<dyn ArchiveReader>> {
        open_archive(handle)
    }
}

/// Open `handle` with the reader matching its format
pub fn open_archive(handle: &ArchiveHandle) -> Result<Box<dyn ArchiveReader>> {
    match handle.format() {
        ArchiveFormat::Zip => Ok(Box::new(ZipReader::open(handle.path())?)),
        ArchiveFormat::Rar => Ok(Box::new(RarReader::open(handle.path())?)),
        ArchiveFormat::Unsupported => Err(Error::Extraction(ExtractionError::UnsupportedFormat {
            archive: handle.path().to_path_buf(),
        })),
    }
}

/// Which side of a member copy failed
#[derive(Debug)]
pub(crate) enum CopyFailure {
    /// Decoding the member (checksum, decompression, decryption)
    Read(io::Error),
    /// Writing the output file
    Write(io::Error),
}

/// Copy a member's decoded bytes, keeping read and write failures apart
pub(crate) fn copy_member<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
) -> std::result::Result<u64, CopyFailure> {
    let mut buf = [0u8; 64 * 1024];
    let mut written = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyFailure::Read(e)),
        };
        writer.write_all(&buf[..n]).map_err(CopyFailure::Write)?;
        written += n as u64;
    }
    writer.flush().map_err(CopyFailure::Write)?;
    Ok(written)
}

/// Create `dir` and its parents, reporting failure as a fatal extraction I/O error
pub(crate) fn ensure_dir(archive: &Path, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        Error::extraction_io(
            archive,
            format!("failed to create directory {}: {}", dir.display(), e),
        )
    })
}
