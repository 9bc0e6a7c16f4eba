use crate::config::PasswordConfig;
use crate::error::{Error, ExtractionError, Result};
use crate::types::ArchiveHandle;
use tracing::{debug, warn};

use super::reader::{ArchiveOpener, ArchiveReader};

/// Password list collector for archive extraction
///
/// Collects passwords from multiple sources in priority order:
/// 1. Passwords given on the command line or in the config file
/// 2. Password file (one password per line)
/// 3. Empty password (optional fallback)
#[derive(Debug, Clone, Default)]
pub struct PasswordList {
    passwords: Vec<String>,
}

impl PasswordList {
    /// Collect passwords from all configured sources, de-duplicated, in priority order
    ///
    /// An unreadable password file is logged and ignored.
    pub async fn collect(config: &PasswordConfig) -> Self {
        let mut passwords: Vec<String> = Vec::new();

        for pw in &config.passwords {
            if !passwords.contains(pw) {
                passwords.push(pw.clone());
            }
        }

        if let Some(path) = &config.password_file {
            match tokio::fs::read_to_string(path).await {
                Ok(file_content) => {
                    for line in file_content.lines() {
                        let pw = line.trim();
                        if !pw.is_empty() && !passwords.iter().any(|p| p == pw) {
                            passwords.push(pw.to_string());
                        }
                    }
                }
                Err(e) => warn!(?path, error = %e, "failed to read password file"),
            }
        }

        // Empty password last
        if config.try_empty && !passwords.iter().any(|p| p.is_empty()) {
            passwords.push(String::new());
        }

        debug!(
            "collected {} unique passwords for extraction",
            passwords.len()
        );

        Self { passwords }
    }

    /// Build a list from candidates already in priority order
    pub fn from_candidates<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut passwords: Vec<String> = Vec::new();
        for pw in candidates {
            let pw = pw.into();
            if !passwords.contains(&pw) {
                passwords.push(pw);
            }
        }
        Self { passwords }
    }

    /// Get an iterator over passwords
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.passwords.iter()
    }

    /// Check if there are any passwords to try
    pub fn is_empty(&self) -> bool {
        self.passwords.is_empty()
    }

    /// Get the number of passwords
    pub fn len(&self) -> usize {
        self.passwords.len()
    }
}

/// Find the first candidate that unlocks an encrypted archive
///
/// Candidates are tried in order, each against a fresh read session. A
/// candidate is accepted when the format's checksum test passes with it or,
/// for formats whose test does not check the password, when the first file
/// entry can be read in full. An archive without file entries accepts the
/// first candidate.
///
/// Returns `Ok(None)` when the list is empty or every candidate is rejected.
/// Corruption unrelated to the password ends the search with an error.
pub fn resolve_password(
    opener: &dyn ArchiveOpener,
    handle: &ArchiveHandle,
    passwords: &PasswordList,
) -> Result<Option<String>> {
    if passwords.is_empty() {
        warn!(archive = %handle.name(), "archive is encrypted but no passwords were supplied");
        return Ok(None);
    }

    for (index, password) in passwords.iter().enumerate() {
        debug!(
            archive = %handle.name(),
            attempt = index + 1,
            total = passwords.len(),
            password_length = password.len(),
            "trying password"
        );

        let mut reader = opener.open(handle)?;
        reader.set_password(Some(password));

        match probe(reader.as_mut()) {
            Ok(true) => {
                debug!(archive = %handle.name(), attempt = index + 1, "password accepted");
                return Ok(Some(password.clone()));
            }
            Ok(false) => {
                return Err(Error::Extraction(ExtractionError::CorruptArchive {
                    archive: handle.path().to_path_buf(),
                    reason: "member failed checksum test".to_string(),
                }));
            }
            Err(Error::Extraction(
                ExtractionError::WrongPassword { .. } | ExtractionError::PasswordRequired { .. },
            )) => {
                debug!(archive = %handle.name(), attempt = index + 1, "password rejected");
            }
            Err(e) => return Err(e),
        }
    }

    warn!(
        archive = %handle.name(),
        tried = passwords.len(),
        "no candidate password unlocked the archive"
    );
    Ok(None)
}

/// `Ok(true)` when the session's password unlocks the archive
fn probe(reader: &mut dyn ArchiveReader) -> Result<bool> {
    let manifest = reader.list_entries()?;
    let Some(first) = manifest.first_file() else {
        debug!(archive = ?reader.archive_path(), "archive has no file entries, accepting first candidate");
        return Ok(true);
    };

    if reader.integrity_test_checks_password() {
        reader.test_integrity()
    } else {
        reader.read_entry(first).map(|_| true)
    }
}
