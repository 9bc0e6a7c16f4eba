use crate::error::{Error, ExtractionError, Result};
use crate::types::{EntryManifest, ManifestEntry};
use crate::utils::safe_join;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::ZipArchive;
use zip::read::ZipFile;
use zip::result::ZipError;

use super::reader::{ArchiveReader, CopyFailure, MemberObserver, copy_member, ensure_dir};

/// Reader for ZIP archives
pub struct ZipReader {
    path: PathBuf,
    archive: ZipArchive<File>,
    password: Option<String>,
}

impl ZipReader {
    /// Open a ZIP archive and read its central directory
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            Error::extraction_io(path, format!("failed to open ZIP archive: {}", e))
        })?;
        let archive = ZipArchive::new(file).map_err(|e| map_zip_error(path, e))?;

        debug!(archive = ?path, entries = archive.len(), "opened ZIP archive");

        Ok(Self {
            path: path.to_path_buf(),
            archive,
            password: None,
        })
    }

    /// Entries paired with their central-directory index, unsafe names dropped
    fn indexed_entries(&mut self) -> Result<Vec<(usize, ManifestEntry)>> {
        let mut entries = Vec::with_capacity(self.archive.len());
        for index in 0..self.archive.len() {
            let file = self
                .archive
                .by_index_raw(index)
                .map_err(|e| map_zip_error(&self.path, e))?;
            let raw_name = file.name().to_string();
            let entry = ManifestEntry::new(&raw_name, file.size(), file.is_dir());

            if safe_join(Path::new(""), &entry.path).is_none() {
                warn!(archive = ?self.path, entry = %raw_name, "skipping entry with unsafe path");
                continue;
            }
            entries.push((index, entry));
        }
        Ok(entries)
    }

    fn index_of(&mut self, entry: &ManifestEntry) -> Result<usize> {
        self.indexed_entries()?
            .into_iter()
            .find(|(_, candidate)| candidate.path == entry.path)
            .map(|(index, _)| index)
            .ok_or_else(|| {
                Error::Extraction(ExtractionError::ExtractionFailed {
                    archive: self.path.clone(),
                    reason: format!("entry not found: {}", entry.path),
                })
            })
    }

    /// Open a ZIP entry by index, decrypting when a password is set
    fn open_entry<'a>(
        archive: &'a mut ZipArchive<File>,
        index: usize,
        password: Option<&str>,
        archive_path: &Path,
    ) -> Result<ZipFile<'a>> {
        match password {
            None => archive
                .by_index(index)
                .map_err(|e| map_zip_error(archive_path, e)),
            Some(password) => match archive.by_index_decrypt(index, password.as_bytes()) {
                Ok(Ok(file)) => Ok(file),
                Ok(Err(_)) => Err(Error::Extraction(ExtractionError::WrongPassword {
                    archive: archive_path.to_path_buf(),
                })),
                Err(e) => Err(map_zip_error(archive_path, e)),
            },
        }
    }

    /// True when the entry at `index` cannot be opened without a password
    fn entry_is_encrypted(archive: &mut ZipArchive<File>, index: usize) -> bool {
        matches!(
            archive.by_index(index),
            Err(ZipError::UnsupportedArchive(msg)) if msg == ZipError::PASSWORD_REQUIRED
        )
    }

    /// A decode failure on an encrypted member means the password was wrong
    fn member_read_error(&self, entry_path: &str, encrypted: bool, e: io::Error) -> Error {
        if encrypted {
            Error::Extraction(ExtractionError::WrongPassword {
                archive: self.path.clone(),
            })
        } else {
            Error::Extraction(ExtractionError::ExtractionFailed {
                archive: self.path.clone(),
                reason: format!("{}: {}", entry_path, e),
            })
        }
    }

    fn extract_member(&mut self, index: usize, entry: &ManifestEntry, dest: &Path) -> Result<u64> {
        let target = safe_join(dest, &entry.path).ok_or_else(|| {
            Error::Extraction(ExtractionError::ExtractionFailed {
                archive: self.path.clone(),
                reason: format!("unsafe entry path: {}", entry.path),
            })
        })?;

        if entry.is_dir {
            ensure_dir(&self.path, &target)?;
            return Ok(0);
        }
        if let Some(parent) = target.parent() {
            ensure_dir(&self.path, parent)?;
        }

        let encrypted =
            self.password.is_some() && Self::entry_is_encrypted(&mut self.archive, index);
        let mut file =
            Self::open_entry(&mut self.archive, index, self.password.as_deref(), &self.path)?;
        let mut out = File::create(&target).map_err(|e| {
            Error::extraction_io(
                &self.path,
                format!("failed to create {}: {}", target.display(), e),
            )
        })?;

        let copied = copy_member(&mut file, &mut out);
        drop(file);
        drop(out);

        match copied {
            Ok(written) => Ok(written),
            Err(failure) => {
                let _ = std::fs::remove_file(&target);
                Err(match failure {
                    CopyFailure::Read(e) => self.member_read_error(&entry.path, encrypted, e),
                    CopyFailure::Write(e) => Error::extraction_io(
                        &self.path,
                        format!("failed to write {}: {}", target.display(), e),
                    ),
                })
            }
        }
    }
}

impl ArchiveReader for ZipReader {
    fn archive_path(&self) -> &Path {
        &self.path
    }

    fn set_password(&mut self, password: Option<&str>) {
        self.password = password.map(str::to_string);
    }

    fn list_entries(&mut self) -> Result<EntryManifest> {
        let entries = self.indexed_entries()?;
        Ok(EntryManifest::new(
            entries.into_iter().map(|(_, entry)| entry).collect(),
        ))
    }

    fn test_integrity(&mut self) -> Result<bool> {
        for index in 0..self.archive.len() {
            let encrypted =
                self.password.is_some() && Self::entry_is_encrypted(&mut self.archive, index);
            let mut file =
                Self::open_entry(&mut self.archive, index, self.password.as_deref(), &self.path)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();

            match copy_member(&mut file, &mut io::sink()) {
                Ok(_) => {}
                Err(CopyFailure::Read(_)) if encrypted => {
                    return Err(Error::Extraction(ExtractionError::WrongPassword {
                        archive: self.path.clone(),
                    }));
                }
                Err(CopyFailure::Read(e)) => {
                    warn!(archive = ?self.path, entry = %name, error = %e, "member failed checksum test");
                    return Ok(false);
                }
                Err(CopyFailure::Write(e)) => return Err(Error::extraction_io(&self.path, e)),
            }
        }
        Ok(true)
    }

    fn integrity_test_checks_password(&self) -> bool {
        true
    }

    fn extract_all(&mut self, dest: &Path, observer: &mut MemberObserver<'_>) -> Result<()> {
        for (index, entry) in self.indexed_entries()? {
            let result = self.extract_member(index, &entry, dest);
            if observer(&entry, &result).is_break() {
                return result.map(|_| ());
            }
        }
        Ok(())
    }

    fn extract_one(&mut self, entry: &ManifestEntry, dest: &Path) -> Result<PathBuf> {
        let index = self.index_of(entry)?;
        self.extract_member(index, entry, dest)?;
        safe_join(dest, &entry.path).ok_or_else(|| {
            Error::Extraction(ExtractionError::ExtractionFailed {
                archive: self.path.clone(),
                reason: format!("unsafe entry path: {}", entry.path),
            })
        })
    }

    fn read_entry(&mut self, entry: &ManifestEntry) -> Result<Vec<u8>> {
        let index = self.index_of(entry)?;
        let encrypted =
            self.password.is_some() && Self::entry_is_encrypted(&mut self.archive, index);
        let mut file =
            Self::open_entry(&mut self.archive, index, self.password.as_deref(), &self.path)?;

        let mut buf = Vec::with_capacity(usize::try_from(entry.size).unwrap_or(0));
        let copied = copy_member(&mut file, &mut buf);
        drop(file);

        match copied {
            Ok(_) => Ok(buf),
            Err(CopyFailure::Read(e)) => Err(self.member_read_error(&entry.path, encrypted, e)),
            Err(CopyFailure::Write(e)) => Err(Error::extraction_io(&self.path, e)),
        }
    }
}

/// Map a `zip` crate error onto the extraction taxonomy
fn map_zip_error(archive: &Path, e: ZipError) -> Error {
    let archive = archive.to_path_buf();
    let err = match e {
        ZipError::UnsupportedArchive(msg) if msg == ZipError::PASSWORD_REQUIRED => {
            ExtractionError::PasswordRequired { archive }
        }
        ZipError::InvalidArchive(msg) => ExtractionError::CorruptArchive {
            archive,
            reason: msg.to_string(),
        },
        ZipError::UnsupportedArchive(msg) => ExtractionError::ExtractionFailed {
            archive,
            reason: format!("unsupported ZIP feature: {}", msg),
        },
        ZipError::Io(e) => ExtractionError::ExtractionIo {
            archive,
            reason: e.to_string(),
        },
        ZipError::FileNotFound => ExtractionError::ExtractionFailed {
            archive,
            reason: "entry not found".to_string(),
        },
        #[allow(unreachable_patterns)]
        other => ExtractionError::ExtractionFailed {
            archive,
            reason: other.to_string(),
        },
    };
    Error::Extraction(err)
}
