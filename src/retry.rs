//! Cooldown-respecting execution with exponential backoff
//!
//! Remote services rate-limit their callers. Every request goes through
//! [`execute_with_cooldown`], which keeps the wall-clock time of one request (call plus
//! wait) from dropping below a cooldown. [`execute_with_backoff`] adds retries for
//! transient failures, starting at the base cooldown and growing by the configured
//! multiplier up to a fixed number of attempts.
//!
//! # Example
//!
//! ```no_run
//! use cloud_dl::config::RetryConfig;
//! use cloud_dl::error::Error;
//! use cloud_dl::retry::execute_with_backoff;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let page = execute_with_backoff(&config, config.cooldown, &cancel, |_cancel| async {
//!     // Call the remote service here
//!     Ok::<_, Error>(vec!["file-1".to_string()])
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{Error, Result, SourceError};

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (rate limiting, server busy, connection reset) should return `true`.
/// Permanent failures (not found, rejected, cancelled) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Source(SourceError::Transient(_)) => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            // Cancellation, invariant violations and fatal phase errors never retry
            Error::Cancelled
            | Error::Internal(_)
            | Error::Authentication(_)
            | Error::Layout { .. } => false,
            Error::Source(SourceError::NotFound(_) | SourceError::Rejected(_))
            | Error::InvalidArgument { .. }
            | Error::Config { .. }
            | Error::Serialization(_) => false,
        }
    }
}

/// Run `operation` once, then wait out whatever is left of `cooldown`
///
/// The wait is skipped if the operation already took longer than the cooldown, and
/// is never entered if the operation fails. Cancellation during the wait returns
/// [`Error::Cancelled`].
pub async fn execute_with_cooldown<F, Fut, T>(
    cooldown: Duration,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let result = operation(cancel.clone()).await?;
    let remaining = cooldown.saturating_sub(start.elapsed());
    if !remaining.is_zero() {
        sleep_or_cancel(remaining, cancel).await?;
    }
    Ok(result)
}

/// Run `operation` through [`execute_with_cooldown`], retrying transient failures
///
/// The first retry waits `config.cooldown`; each further retry multiplies the delay
/// by `config.backoff_multiplier`, capped at `config.max_delay`. After
/// `config.max_attempts` attempts the last error is returned. Non-retryable errors
/// and cancellation return immediately.
pub async fn execute_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    cooldown: Duration,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    let mut delay = config.cooldown;

    loop {
        attempt += 1;
        match execute_with_cooldown(cooldown, cancel, &mut operation).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Request succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts && !cancel.is_cancelled() => {
                let wait = if config.jitter { add_jitter(delay) } else { delay };

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = wait.as_millis(),
                    "Request failed, retrying"
                );

                sleep_or_cancel(wait, cancel).await?;

                delay = next_delay(delay, config);
            }
            Err(e) => {
                if e.is_retryable() && !cancel.is_cancelled() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Request failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Request failed without retry");
                }
                return Err(e);
            }
        }
    }
}

/// Grow `delay` by the multiplier, capped at `max_delay`; unrepresentable results take the cap
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
        .map_or(config.max_delay, |next| next.min(config.max_delay))
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Add random jitter to a delay
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the result
/// lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor)).unwrap_or(delay)
}
