//! Retry logic with exponential backoff
//!
//! This module provides the retry policy shared by the batch downloader and
//! the sequential pipe. It implements exponential backoff with optional
//! jitter so that a fleet of workers does not hammer a struggling host in
//! lockstep.
//!
//! # Example
//!
//! ```no_run
//! use chunk_dl::retry::{IsRetryable, with_retry};
//! use chunk_dl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
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
//! with_retry(&config, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, ErrorClass};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network errors, server errors, undecodable payloads) return `true`.
/// Permanent failures (authentication rejected, disk errors, cancellation) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient | ErrorClass::Malformed)
    }
}

/// Delay schedule between consecutive attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
}

impl Backoff {
    /// Start a new schedule at `config.initial_delay`
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            delay: config.initial_delay,
            max_delay: config.max_delay,
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }

    /// Delay to wait before the next attempt; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let current = if self.jitter {
            add_jitter(self.delay)
        } else {
            self.delay
        };
        let next = Duration::try_from_secs_f64(self.delay.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max_delay);
        self.delay = next.min(self.max_delay);
        current
    }
}

/// Execute an async operation, retrying retryable errors with exponential backoff
///
/// `config.max_attempts` is the total number of attempts, so a value of 1
/// disables retrying. Non-retryable errors are returned immediately.
///
/// # Example
///
/// ```no_run
/// use chunk_dl::retry::with_retry;
/// use chunk_dl::config::RetryConfig;
/// use chunk_dl::error::Error;
///
/// # async fn example() -> Result<(), Error> {
/// let config = RetryConfig::default();
/// let body = with_retry(&config, || async {
///     Ok::<String, Error>("chunk".to_string())
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    let mut backoff = Backoff::new(config);

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The actual delay lies between `delay` and `2 * delay`; delays too large
/// to scale are returned unchanged.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::try_from_secs_f64(jittered_secs).unwrap_or(delay)
}
