//! Test configuration helpers

use archive_sweep::config::RetryConfig;
use archive_sweep::{CollisionPolicy, Config, DirectoryExtractor};
use std::time::Duration;

/// Defaults with millisecond retry delays so failure paths stay fast
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.retry = RetryConfig {
        max_attempts: 3,
        delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 1.0,
        jitter: false,
    };
    config
}

/// Test config with a collision policy and explicit password candidates
pub fn config_with(collision: CollisionPolicy, passwords: &[&str]) -> Config {
    let mut config = test_config();
    config.extraction.collision = collision;
    config.passwords.passwords = passwords.iter().map(|p| p.to_string()).collect();
    config
}

/// Extractor backed by the real ZIP and RAR readers
pub fn extractor(config: Config) -> DirectoryExtractor {
    DirectoryExtractor::new(config).expect("test config must validate")
}
