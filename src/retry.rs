//! Retry logic with linear backoff
//!
//! Transient transport conditions (retry-after, timed out, rate limited) are
//! retried in an explicit bounded loop. The delay before retry `n` is the
//! server-specified duration when the error carries one, otherwise
//! `n * backoff_step` capped at `max_backoff`.
//!
//! # Example
//!
//! ```no_run
//! use relay_dl::config::RetryConfig;
//! use relay_dl::error::TransferError;
//! use relay_dl::retry::run_with_retry;
//!
//! # async fn example() -> Result<(), TransferError> {
//! let config = RetryConfig::default();
//! run_with_retry(
//!     &config,
//!     || async { Ok::<_, TransferError>(()) },
//!     |attempt, error| {
//!         tracing::warn!(attempt, %error, "retrying");
//!         async {}
//!     },
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, FetchError, TransferError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;

    /// Server-specified wait before the next attempt, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl IsRetryable for TransferError {
    fn is_retryable(&self) -> bool {
        matches!(self, TransferError::RetryAfter(_) | TransferError::TimedOut)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            TransferError::RetryAfter(wait) => Some(*wait),
            _ => None,
        }
    }
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        // auth and not-found will not change by asking again
        matches!(self, FetchError::RateLimited(_))
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Transfer(e) => e.is_retryable(),
            Error::Fetch(e) => e.is_retryable(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
            ),
            Error::Config { .. }
            | Error::Store(_)
            | Error::Job(_)
            | Error::InvalidUrl { .. }
            | Error::Serialization(_)
            | Error::ExternalTool(_)
            | Error::ShuttingDown
            | Error::Other(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Transfer(e) => e.retry_after(),
            _ => None,
        }
    }
}

/// Delay before retry number `attempt` (1-based) after `error`
pub fn backoff_delay<E: IsRetryable>(config: &RetryConfig, attempt: u32, error: &E) -> Duration {
    if let Some(wait) = error.retry_after() {
        return wait;
    }

    let delay = config
        .backoff_step
        .saturating_mul(attempt.max(1))
        .min(config.max_backoff);

    if config.jitter {
        add_jitter(delay)
    } else {
        delay
    }
}

/// Execute an async operation, retrying transient failures
///
/// `operation` runs at most `max_retries + 1` times. Before each retry,
/// `on_retry` is awaited with the 1-based retry number and the error that
/// caused it, then the backoff delay is slept. Callers use the hook to record
/// the failed attempt durably before waiting.
///
/// Returns the successful result, the first non-retryable error, or the last
/// error once the ceiling is reached.
pub async fn run_with_retry<F, Fut, T, E, R, RFut>(
    config: &RetryConfig,
    mut operation: F,
    mut on_retry: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
    R: FnMut(u32, &E) -> RFut,
    RFut: Future<Output = ()>,
{
    let mut retries = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if retries > 0 {
                    tracing::info!(attempts = retries + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && retries < config.max_retries => {
                retries += 1;
                let delay = backoff_delay(config, retries, &e);

                tracing::warn!(
                    error = %e,
                    attempt = retries,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                on_retry(retries, &e).await;
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = retries + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Spread a delay over `[delay, 2 * delay]`
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
