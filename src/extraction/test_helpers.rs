//! Fixtures shared by the extraction and orchestrator unit tests

use crate::error::{Error, ExtractionError, Result};
use crate::types::{ArchiveHandle, EntryManifest, ManifestEntry};
use crate::utils::safe_join;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::reader::{ArchiveOpener, ArchiveReader, MemberObserver};

/// Write a ZIP archive; names ending in `/` become directory entries
pub(crate) fn write_zip(archive_path: &Path, files: &[(&str, &[u8])], password: Option<&str>) {
    use ::zip::unstable::write::FileOptionsExt;

    let file = std::fs::File::create(archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let plain =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Stored);

    for (name, content) in files {
        if name.ends_with('/') {
            writer.add_directory(*name, plain).unwrap();
            continue;
        }
        let options = match password {
            Some(password) => plain.with_deprecated_encryption(password.as_bytes()),
            None => plain,
        };
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap();
}

/// Behaviour of one scripted archive
#[derive(Clone, Debug, Default)]
pub(crate) struct MockArchive {
    /// Entries in order; names ending in `/` are directories
    pub entries: Vec<(String, Vec<u8>)>,
    /// Password that unlocks the archive, if it is encrypted
    pub password: Option<String>,
    /// Listing also needs the password (encrypted headers)
    pub encrypted_headers: bool,
    /// Opening fails as structurally corrupt
    pub corrupt: bool,
    /// The checksum test detects wrong passwords
    pub checks_password: bool,
    /// The checksum test fails for an unrelated reason
    pub bad_checksum: bool,
    /// Size reported for every file instead of its real length
    pub declared_size: Option<u64>,
    /// Members that fail during extraction
    pub failing_members: Vec<String>,
}

impl MockArchive {
    pub(crate) fn with_files(files: &[(&str, &[u8])]) -> Self {
        Self {
            entries: files
                .iter()
                .map(|(name, data)| (name.to_string(), data.to_vec()))
                .collect(),
            ..Self::default()
        }
    }

    pub(crate) fn encrypted(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }
}

/// Counters observed by tests
#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub opens: AtomicUsize,
    pub extract_calls: AtomicUsize,
    /// `extract_all` fails with a fatal I/O error while this is non-zero
    pub io_failures_left: AtomicU32,
    /// Every password a probe was run with, in order
    pub probed: Mutex<Vec<String>>,
    /// 1-based number of the `open` call that fails with an I/O error (0 for none)
    pub failing_open: AtomicUsize,
}

/// Opener serving scripted archives keyed by file name
#[derive(Clone, Default)]
pub(crate) struct MockOpener {
    archives: HashMap<String, MockArchive>,
    pub state: Arc<MockState>,
}

impl MockOpener {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, file_name: &str, archive: MockArchive) -> Self {
        self.archives.insert(file_name.to_string(), archive);
        self
    }

    pub(crate) fn fail_extractions(self, count: u32) -> Self {
        self.state.io_failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub(crate) fn fail_open_number(self, number: usize) -> Self {
        self.state.failing_open.store(number, Ordering::SeqCst);
        self
    }

    pub(crate) fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn extract_calls(&self) -> usize {
        self.state.extract_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn probed(&self) -> Vec<String> {
        self.state.probed.lock().unwrap().clone()
    }
}

impl ArchiveOpener for MockOpener {
    fn open(&self, handle: &ArchiveHandle) -> Result<Box<dyn ArchiveReader>> {
        let number = self.state.opens.fetch_add(1, Ordering::SeqCst) + 1;
        if number == self.state.failing_open.load(Ordering::SeqCst) {
            return Err(Error::extraction_io(handle.path(), "scripted open failure"));
        }
        let archive = self.archives.get(&handle.name()).cloned().unwrap_or(MockArchive {
            corrupt: true,
            ..MockArchive::default()
        });
        if archive.corrupt {
            return Err(Error::Extraction(ExtractionError::CorruptArchive {
                archive: handle.path().to_path_buf(),
                reason: "scripted corruption".to_string(),
            }));
        }
        Ok(Box::new(MockReader {
            path: handle.path().to_path_buf(),
            archive,
            password: None,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockReader {
    path: PathBuf,
    archive: MockArchive,
    password: Option<String>,
    state: Arc<MockState>,
}

impl MockReader {
    fn check_password(&self) -> Result<()> {
        match (&self.archive.password, &self.password) {
            (None, _) => Ok(()),
            (Some(_), None) => Err(Error::Extraction(ExtractionError::PasswordRequired {
                archive: self.path.clone(),
            })),
            (Some(expected), Some(given)) if expected == given => Ok(()),
            (Some(_), Some(_)) => Err(Error::Extraction(ExtractionError::WrongPassword {
                archive: self.path.clone(),
            })),
        }
    }

    fn record_probe(&self) {
        if let Some(password) = &self.password {
            self.state.probed.lock().unwrap().push(password.clone());
        }
    }

    fn manifest_entry(&self, name: &str, data: &[u8]) -> ManifestEntry {
        let size = self.archive.declared_size.unwrap_or(data.len() as u64);
        ManifestEntry::new(name, size, name.ends_with('/'))
    }

    fn write_member(&self, entry: &ManifestEntry, data: &[u8], dest: &Path) -> Result<u64> {
        let target = safe_join(dest, &entry.path).unwrap();
        if entry.is_dir {
            std::fs::create_dir_all(&target).map_err(|e| Error::extraction_io(&self.path, e))?;
            return Ok(0);
        }
        if self.archive.failing_members.contains(&entry.path) {
            return Err(Error::Extraction(ExtractionError::ExtractionFailed {
                archive: self.path.clone(),
                reason: format!("{}: scripted member failure", entry.path),
            }));
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::extraction_io(&self.path, e))?;
        }
        std::fs::write(&target, data).map_err(|e| Error::extraction_io(&self.path, e))?;
        Ok(data.len() as u64)
    }
}

impl ArchiveReader for MockReader {
    fn archive_path(&self) -> &Path {
        &self.path
    }

    fn set_password(&mut self, password: Option<&str>) {
        self.password = password.map(str::to_string);
    }

    fn list_entries(&mut self) -> Result<EntryManifest> {
        if self.archive.encrypted_headers {
            self.check_password()?;
        }
        Ok(EntryManifest::new(
            self.archive
                .entries
                .iter()
                .map(|(name, data)| self.manifest_entry(name, data))
                .collect(),
        ))
    }

    fn test_integrity(&mut self) -> Result<bool> {
        self.record_probe();
        self.check_password()?;
        Ok(!self.archive.bad_checksum)
    }

    fn integrity_test_checks_password(&self) -> bool {
        self.archive.checks_password
    }

    fn extract_all(&mut self, dest: &Path, observer: &mut MemberObserver<'_>) -> Result<()> {
        self.state.extract_calls.fetch_add(1, Ordering::SeqCst);
        let left = self.state.io_failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.state.io_failures_left.store(left - 1, Ordering::SeqCst);
            return Err(Error::extraction_io(&self.path, "scripted disk failure"));
        }
        self.check_password()?;

        for (name, data) in &self.archive.entries {
            let entry = self.manifest_entry(name, data);
            let result = self.write_member(&entry, data, dest);
            if observer(&entry, &result).is_break() {
                return result.map(|_| ());
            }
        }
        Ok(())
    }

    fn extract_one(&mut self, entry: &ManifestEntry, dest: &Path) -> Result<PathBuf> {
        self.check_password()?;
        let (_, data) = self
            .archive
            .entries
            .iter()
            .find(|(name, _)| ManifestEntry::new(name, 0, false).path == entry.path)
            .unwrap();
        self.write_member(entry, data, dest)?;
        Ok(safe_join(dest, &entry.path).unwrap())
    }

    fn read_entry(&mut self, entry: &ManifestEntry) -> Result<Vec<u8>> {
        self.record_probe();
        self.check_password()?;
        self.archive
            .entries
            .iter()
            .find(|(name, _)| ManifestEntry::new(name, 0, false).path == entry.path)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| {
                Error::Extraction(ExtractionError::ExtractionFailed {
                    archive: self.path.clone(),
                    reason: "no such member".to_string(),
                })
            })
    }
}
