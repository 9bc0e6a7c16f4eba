//! Retry logic for transient extraction failures
//!
//! An archive is retried only when the failure may go away on its own: an
//! I/O error during extraction or reconciliation, or a verification
//! mismatch. Corruption, password problems and unsupported formats fail on
//! the first attempt.
//!
//! # Example
//!
//! ```no_run
//! use archive_sweep::retry::{IsRetryable, with_retry};
//! use archive_sweep::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, |_attempt| async { Ok::<_, MyError>(()) }, |_, _, _| {}).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, ExtractionError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (disk momentarily full, file locked, verification
/// mismatch) should return `true`. Permanent failures (corrupt archive,
/// wrong password, unsupported format) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Extraction(e) => matches!(
                e,
                ExtractionError::ExtractionIo { .. } | ExtractionError::VerificationMismatch { .. }
            ),
            Error::Io(_) => true,
            // Space does not free itself between attempts
            Error::InsufficientSpace { .. } => false,
            Error::DirectoryUnavailable { .. } => false,
            Error::Config { .. } => false,
            Error::Serialization(_) => false,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out
///
/// `operation` receives the 1-based attempt number. `on_retry` is called
/// with the failed attempt number, the delay about to be slept and the
/// error, before each wait.
///
/// `config.max_attempts` counts every attempt including the first. The
/// delay starts at `config.delay`, is multiplied by `backoff_multiplier`
/// after each wait and never exceeds `max_delay`.
pub async fn with_retry<F, Fut, T, E, R>(
    config: &RetryConfig,
    mut operation: F,
    mut on_retry: R,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
    R: FnMut(u32, Duration, &E),
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    let mut delay = config.delay.min(config.max_delay);

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let wait = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = wait.as_millis() as u64,
                    "operation failed, retrying"
                );
                on_retry(attempt, wait, &e);

                tokio::time::sleep(wait).await;

                let next_delay = Duration::try_from_secs_f64(
                    delay.as_secs_f64() * config.backoff_multiplier,
                )
                .unwrap_or(config.max_delay);
                delay = next_delay.min(config.max_delay);
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
