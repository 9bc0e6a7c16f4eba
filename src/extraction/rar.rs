use crate::error::{Error, ExtractionError, Result};
use crate::types::{EntryManifest, ManifestEntry};
use crate::utils::safe_join;
use std::cell::OnceCell;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use unrar::error::{Code, UnrarError};

use super::reader::{ArchiveReader, MemberObserver, ensure_dir};

const RAR4_SIGNATURE: &[u8] = b"Rar!\x1a\x07\x00";
const RAR5_SIGNATURE: &[u8] = b"Rar!\x1a\x07\x01\x00";

/// Where an unrar failure happened; decides how `BadData` is read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    /// Opening the archive or reading a header
    Header,
    /// Decoding one member's data
    Member {
        /// The member is encrypted
        encrypted: bool,
    },
}

/// Reader for RAR archives (RAR4 and RAR5, multi-volume from the first part)
///
/// unrar sessions are single-pass cursors, so every operation reopens the
/// archive from its path.
pub struct RarReader {
    path: PathBuf,
    password: Option<String>,
    plain_headers: OnceCell<bool>,
}

impl RarReader {
    /// Check the signature and prepare a reader
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path).map_err(|e| {
            Error::extraction_io(path, format!("failed to open RAR archive: {}", e))
        })?;
        let mut magic = [0u8; 8];
        let mut filled = 0;
        while filled < magic.len() {
            match file.read(&mut magic[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => return Err(Error::extraction_io(path, e)),
            }
        }
        let magic = &magic[..filled];
        if !magic.starts_with(RAR4_SIGNATURE) && !magic.starts_with(RAR5_SIGNATURE) {
            return Err(Error::Extraction(ExtractionError::CorruptArchive {
                archive: path.to_path_buf(),
                reason: "missing RAR signature".to_string(),
            }));
        }

        debug!(archive = ?path, "opened RAR archive");

        Ok(Self {
            path: path.to_path_buf(),
            password: None,
            plain_headers: OnceCell::new(),
        })
    }

    fn archive(&self) -> unrar::Archive<'_> {
        match &self.password {
            Some(password) => unrar::Archive::with_password(&self.path, password.as_bytes()),
            None => unrar::Archive::new(&self.path),
        }
    }

    /// Whether every header lists without a password
    ///
    /// Only archives with encrypted headers need the password to list them.
    fn headers_readable_without_password(&self) -> bool {
        *self.plain_headers.get_or_init(|| {
            match unrar::Archive::new(&self.path).open_for_listing() {
                Ok(mut listing) => listing.all(|header| header.is_ok()),
                Err(_) => false,
            }
        })
    }

    /// Convert an unrar error to our error type by its code
    fn convert_unrar_error(&self, e: UnrarError, stage: Stage) -> Error {
        let archive = self.path.clone();
        let has_password = self.password.is_some();
        let err = match e.code {
            Code::MissingPassword => ExtractionError::PasswordRequired { archive },
            Code::BadPassword if has_password => ExtractionError::WrongPassword { archive },
            Code::BadPassword => ExtractionError::PasswordRequired { archive },
            Code::BadData => match stage {
                Stage::Member { encrypted: true } if has_password => {
                    ExtractionError::WrongPassword { archive }
                }
                Stage::Member { .. } => ExtractionError::ExtractionFailed {
                    archive,
                    reason: format!("member data failed checksum: {}", e),
                },
                // Headers that list in the clear cannot be spoiled by a wrong password
                Stage::Header if has_password && !self.headers_readable_without_password() => {
                    ExtractionError::WrongPassword { archive }
                }
                Stage::Header => ExtractionError::CorruptArchive {
                    archive,
                    reason: e.to_string(),
                },
            },
            Code::EOpen | Code::ERead | Code::ECreate | Code::EWrite | Code::EClose => {
                ExtractionError::ExtractionIo {
                    archive,
                    reason: e.to_string(),
                }
            }
            _ => ExtractionError::CorruptArchive {
                archive,
                reason: e.to_string(),
            },
        };
        Error::Extraction(err)
    }

    fn unsafe_path_error(&self, entry: &ManifestEntry) -> Error {
        Error::Extraction(ExtractionError::ExtractionFailed {
            archive: self.path.clone(),
            reason: format!("unsafe entry path: {}", entry.path),
        })
    }

    /// Walk headers until `wanted` and hand its cursor to `action`
    fn with_member<T>(
        &self,
        wanted: &ManifestEntry,
        action: impl FnOnce(
            unrar::OpenArchive<unrar::Process, unrar::CursorBeforeFile>,
            bool,
        ) -> std::result::Result<T, UnrarError>,
    ) -> Result<T> {
        let mut cursor = self
            .archive()
            .open_for_processing()
            .map_err(|e| self.convert_unrar_error(e, Stage::Header))?;
        loop {
            let at_file = match cursor.read_header() {
                Ok(Some(at_file)) => at_file,
                Ok(None) => {
                    return Err(Error::Extraction(ExtractionError::ExtractionFailed {
                        archive: self.path.clone(),
                        reason: format!("entry not found: {}", wanted.path),
                    }));
                }
                Err(e) => return Err(self.convert_unrar_error(e, Stage::Header)),
            };
            let header = at_file.entry();
            let entry = entry_from_header(header);
            let encrypted = header.is_encrypted();

            if entry.path == wanted.path && !entry.is_dir {
                return action(at_file, encrypted)
                    .map_err(|e| self.convert_unrar_error(e, Stage::Member { encrypted }));
            }
            cursor = at_file
                .skip()
                .map_err(|e| self.convert_unrar_error(e, Stage::Header))?;
        }
    }
}

fn entry_from_header(header: &unrar::FileHeader) -> ManifestEntry {
    ManifestEntry::new(
        &header.filename.to_string_lossy(),
        header.unpacked_size,
        header.is_directory(),
    )
}

impl ArchiveReader for RarReader {
    fn archive_path(&self) -> &Path {
        &self.path
    }

    fn set_password(&mut self, password: Option<&str>) {
        self.password = password.map(str::to_string);
    }

    fn list_entries(&mut self) -> Result<EntryManifest> {
        let listing = self
            .archive()
            .open_for_listing()
            .map_err(|e| self.convert_unrar_error(e, Stage::Header))?;

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for header in listing {
            let header = header.map_err(|e| self.convert_unrar_error(e, Stage::Header))?;
            let entry = entry_from_header(&header);

            if safe_join(Path::new(""), &entry.path).is_none() {
                warn!(archive = ?self.path, entry = ?header.filename, "skipping entry with unsafe path");
                continue;
            }
            // Split members repeat their header in every volume
            if seen.insert(entry.path.clone()) {
                entries.push(entry);
            }
        }
        Ok(EntryManifest::new(entries))
    }

    fn test_integrity(&mut self) -> Result<bool> {
        let mut cursor = self
            .archive()
            .open_for_processing()
            .map_err(|e| self.convert_unrar_error(e, Stage::Header))?;
        loop {
            let at_file = match cursor.read_header() {
                Ok(Some(at_file)) => at_file,
                Ok(None) => return Ok(true),
                Err(e) => return Err(self.convert_unrar_error(e, Stage::Header)),
            };
            let header = at_file.entry();
            if header.is_directory() {
                cursor = at_file
                    .skip()
                    .map_err(|e| self.convert_unrar_error(e, Stage::Header))?;
                continue;
            }
            let name = header.filename.clone();
            let encrypted = header.is_encrypted();

            cursor = match at_file.test() {
                Ok(next) => next,
                Err(e) => {
                    return match self.convert_unrar_error(e, Stage::Member { encrypted }) {
                        Error::Extraction(ExtractionError::ExtractionFailed { reason, .. }) => {
                            warn!(archive = ?self.path, entry = ?name, %reason, "member failed checksum test");
                            Ok(false)
                        }
                        other => Err(other),
                    };
                }
            };
        }
    }

    fn integrity_test_checks_password(&self) -> bool {
        false
    }

    fn extract_all(&mut self, dest: &Path, observer: &mut MemberObserver<'_>) -> Result<()> {
        // After a member failure the cursor is gone; reopen and skip past it
        let mut resume_at = 0usize;
        'session: loop {
            let mut cursor = self
                .archive()
                .open_for_processing()
                .map_err(|e| self.convert_unrar_error(e, Stage::Header))?;
            let mut index = 0usize;

            loop {
                let at_file = match cursor.read_header() {
                    Ok(Some(at_file)) => at_file,
                    Ok(None) => break 'session,
                    Err(e) => return Err(self.convert_unrar_error(e, Stage::Header)),
                };
                let header = at_file.entry();
                let entry = entry_from_header(header);
                let encrypted = header.is_encrypted();

                if index < resume_at {
                    cursor = at_file
                        .skip()
                        .map_err(|e| self.convert_unrar_error(e, Stage::Header))?;
                    index += 1;
                    continue;
                }

                let Some(target) = safe_join(dest, &entry.path) else {
                    warn!(archive = ?self.path, entry = %entry.path, "skipping entry with unsafe path");
                    cursor = at_file
                        .skip()
                        .map_err(|e| self.convert_unrar_error(e, Stage::Header))?;
                    index += 1;
                    continue;
                };

                if entry.is_dir {
                    let result = ensure_dir(&self.path, &target).map(|_| 0);
                    if observer(&entry, &result).is_break() {
                        return result.map(|_| ());
                    }
                    cursor = at_file
                        .skip()
                        .map_err(|e| self.convert_unrar_error(e, Stage::Header))?;
                    index += 1;
                    continue;
                }

                if let Some(parent) = target.parent()
                    && let Err(e) = ensure_dir(&self.path, parent)
                {
                    let result: Result<u64> = Err(e);
                    let _ = observer(&entry, &result);
                    return result.map(|_| ());
                }

                match at_file.extract_to(&target) {
                    Ok(next) => {
                        let result = Ok(entry.size);
                        if observer(&entry, &result).is_break() {
                            return Ok(());
                        }
                        cursor = next;
                        index += 1;
                    }
                    Err(e) => {
                        let _ = std::fs::remove_file(&target);
                        let result: Result<u64> =
                            Err(self.convert_unrar_error(e, Stage::Member { encrypted }));
                        if observer(&entry, &result).is_break() {
                            return result.map(|_| ());
                        }
                        resume_at = index + 1;
                        continue 'session;
                    }
                }
            }
        }
        Ok(())
    }

    fn extract_one(&mut self, entry: &ManifestEntry, dest: &Path) -> Result<PathBuf> {
        let target = safe_join(dest, &entry.path).ok_or_else(|| self.unsafe_path_error(entry))?;
        if let Some(parent) = target.parent() {
            ensure_dir(&self.path, parent)?;
        }
        self.with_member(entry, |at_file, _| at_file.extract_to(&target).map(|_| ()))?;
        Ok(target)
    }

    fn read_entry(&mut self, entry: &ManifestEntry) -> Result<Vec<u8>> {
        self.with_member(entry, |at_file, _| at_file.read().map(|(data, _)| data))
    }
}
