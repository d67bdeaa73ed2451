//! Retry logic with exponential backoff
//!
//! The fetch job performs no automatic retry — retry policy belongs to the
//! caller. This module provides the policy: classification of which failures
//! are worth retrying, and an exponential-backoff executor with optional
//! jitter to prevent thundering herd.
//!
//! # Example
//!
//! ```no_run
//! use stagefetch::config::RetryConfig;
//! use stagefetch::retry::fetch_with_retry;
//! use stagefetch::{FetchConfig, FetchRequest, RemoteFetchJob};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let request = FetchRequest::new("https://files.example/logo.png", "logo.png", "alice");
//! let retry = RetryConfig::default();
//!
//! let staged = fetch_with_retry(&retry, || async {
//!     let mut job = RemoteFetchJob::new(FetchConfig::default())?;
//!     let validated = job.validate(&request)?;
//!     Ok::<_, stagefetch::Error>(job.fetch(&validated).await?)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, PolicyError, StashError, TransferError, UploadError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network hiccups, short writes) should return `true`.
/// Permanent failures (policy rejections, verification refusals, exclusive
/// staging-file creation failure) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for TransferError {
    fn is_retryable(&self) -> bool {
        match self {
            // A fresh attempt gets a fresh connection and a fresh staging file
            TransferError::Network { .. } => true,
            TransferError::WriteFailed { .. } => true,
            // Server-side trouble may clear; client errors will not
            TransferError::HttpStatus { status, .. } => *status >= 500,
            // Fatal for the job instance
            TransferError::CreateFailed { .. } => false,
            TransferError::SourceRead { .. } => false,
            TransferError::TooLarge { .. } => false,
            TransferError::Cancelled { .. } => false,
            TransferError::UnsupportedSource { .. } => false,
        }
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Transfer(e) => e.is_retryable(),
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Policy rejections can never succeed on retry
            Error::Policy(_) => false,
            // Verification rejected the content itself
            Error::Upload(_) => false,
            // Consumed tokens stay consumed
            Error::Stash(_) => false,
            Error::Config { .. } => false,
            Error::AsyncDisabled => false,
            Error::Serialization(_) => false,
        }
    }
}

impl IsRetryable for PolicyError {
    fn is_retryable(&self) -> bool {
        false
    }
}

impl IsRetryable for UploadError {
    fn is_retryable(&self) -> bool {
        false
    }
}

impl IsRetryable for StashError {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// Retries only errors whose [`IsRetryable`] classification says so, waiting
/// between attempts with exponential backoff capped at `config.max_delay`,
/// plus optional jitter.
///
/// # Errors
///
/// Returns the successful result, or the last error once attempts are
/// exhausted or a non-retryable error occurs.
pub async fn fetch_with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
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
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_success_no_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<u32, TransferError> =
            fetch_with_retry(&fast_retry_config(), move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_error_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<&str, TransferError> =
            fetch_with_retry(&fast_retry_config(), move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TransferError::WriteFailed {
                            bytes_written: 0,
                            source: std::io::Error::other("flaky"),
                        })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), TransferError> = fetch_with_retry(&fast_retry_config(), move || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TransferError::TooLarge { limit: 1024 })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), TransferError> = fetch_with_retry(&fast_retry_config(), move || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TransferError::Network {
                    source: make_reqwest_error().await,
                })
            }
        })
        .await;

        assert!(result.is_err());
        // 1 initial + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    /// Produce a real reqwest error by connecting to a closed port.
    async fn make_reqwest_error() -> reqwest::Error {
        reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap()
            .get("http://127.0.0.1:1/never")
            .send()
            .await
            .unwrap_err()
    }

    #[test]
    fn test_classification() {
        assert!(
            TransferError::WriteFailed {
                bytes_written: 0,
                source: std::io::Error::other("x"),
            }
            .is_retryable()
        );
        assert!(
            TransferError::HttpStatus {
                status: 503,
                url: "http://x.example/".to_string(),
            }
            .is_retryable()
        );
        assert!(
            !TransferError::HttpStatus {
                status: 404,
                url: "http://x.example/".to_string(),
            }
            .is_retryable()
        );
        assert!(
            !TransferError::CreateFailed {
                dir: "/tmp".into(),
                source: std::io::Error::other("x"),
            }
            .is_retryable()
        );
        assert!(!TransferError::Cancelled { bytes_written: 9 }.is_retryable());

        assert!(
            !Error::Policy(PolicyError::DisallowedHost {
                host: "evil.example".to_string(),
            })
            .is_retryable()
        );
        assert!(!StashError::UnknownToken.is_retryable());
    }

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..50 {
            let jittered = add_jitter(base);
            assert!(jittered >= base);
            assert!(jittered <= base * 2);
        }
    }
}
