//! Configuration types for archive-sweep

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Collision handling strategy applied when a staged item already exists at
/// its destination path
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Leave the existing item untouched, drop the staged one (default)
    #[default]
    Skip,
    /// Remove the existing item (recursively for directories), then move
    Overwrite,
    /// Move to the first free `name_N.ext`
    Rename,
}

impl std::str::FromStr for CollisionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(CollisionPolicy::Skip),
            "overwrite" => Ok(CollisionPolicy::Overwrite),
            "rename" => Ok(CollisionPolicy::Rename),
            other => Err(Error::Config {
                message: format!("unknown collision policy '{}'", other),
                key: Some("extraction.collision".to_string()),
            }),
        }
    }
}

impl std::fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CollisionPolicy::Skip => "skip",
            CollisionPolicy::Overwrite => "overwrite",
            CollisionPolicy::Rename => "rename",
        };
        f.write_str(name)
    }
}

/// Extraction behavior (collision policy, originals, staging, progress)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Collision handling at the destination (default: skip)
    #[serde(default)]
    pub collision: CollisionPolicy,

    /// Keep source archives after a successful extraction (default: false)
    #[serde(default)]
    pub keep_originals: bool,

    /// Aggregate uncompressed size above which byte progress is reported (default: 10 MiB)
    #[serde(default = "default_progress_threshold")]
    pub progress_threshold: u64,

    /// Parent directory for staging areas (default: the destination's parent,
    /// so reconciliation is a same-filesystem rename)
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Keep extracting remaining members after one member fails (default: true)
    #[serde(default = "default_true")]
    pub continue_on_member_error: bool,

    /// Maximum `_N` suffixes tried before a rename collision gives up (default: 999)
    #[serde(default = "default_rename_attempts")]
    pub rename_attempts: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            collision: CollisionPolicy::default(),
            keep_originals: false,
            progress_threshold: default_progress_threshold(),
            staging_dir: None,
            continue_on_member_error: true,
            rename_attempts: default_rename_attempts(),
        }
    }
}

/// Disk space preflight configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskSpaceConfig {
    /// Enable disk space checking (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fraction added on top of the summed entry sizes (default: 0.10)
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,

    /// Refuse to extract when space is insufficient instead of only warning (default: false)
    #[serde(default)]
    pub block_on_insufficient: bool,
}

impl Default for DiskSpaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            safety_margin: default_safety_margin(),
            block_on_insufficient: false,
        }
    }
}

/// Retry behavior for transient extraction failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of extraction attempts per archive (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the next attempt (default: 2 seconds)
    #[serde(default = "default_delay", with = "duration_serde")]
    pub delay: Duration,

    /// Maximum delay between attempts (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each attempt (default: 1.0, fixed delay)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay: default_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Password candidate sources
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PasswordConfig {
    /// Explicit candidates, tried first and in order
    #[serde(default)]
    pub passwords: Vec<String>,

    /// Password file (one password per line)
    #[serde(default)]
    pub password_file: Option<PathBuf>,

    /// Try the empty password as a last resort (default: false)
    #[serde(default)]
    pub try_empty: bool,
}

/// Top-level configuration for a run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Extraction behavior
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Disk space preflight
    #[serde(default)]
    pub disk_space: DiskSpaceConfig,

    /// Retry configuration for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Password candidates
    #[serde(default)]
    pub passwords: PasswordConfig,
}

impl Config {
    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot reject on its own
    pub fn validate(&self) -> Result<()> {
        let margin = self.disk_space.safety_margin;
        if margin.is_nan() || margin < 0.0 {
            return Err(Error::Config {
                message: format!(
                    "safety margin must be non-negative, got {}",
                    self.disk_space.safety_margin
                ),
                key: Some("disk_space.safety_margin".to_string()),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config {
                message: "at least one extraction attempt is required".to_string(),
                key: Some("retry.max_attempts".to_string()),
            });
        }
        let multiplier = self.retry.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(Error::Config {
                message: format!(
                    "backoff multiplier must be >= 1.0, got {}",
                    self.retry.backoff_multiplier
                ),
                key: Some("retry.backoff_multiplier".to_string()),
            });
        }
        if self.extraction.rename_attempts == 0 {
            return Err(Error::Config {
                message: "rename attempts must be at least 1".to_string(),
                key: Some("extraction.rename_attempts".to_string()),
            });
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_progress_threshold() -> u64 {
    10 * 1024 * 1024
}

fn default_rename_attempts() -> u32 {
    999
}

fn default_safety_margin() -> f64 {
    0.10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
