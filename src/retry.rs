//! Retry classification and backoff helpers
//!
//! This module provides the retryable/permanent split used at every retry
//! decision point (resolver fetch loop, worker nack), plus a generic
//! exponential-backoff loop with optional jitter to prevent thundering herd.

use crate::config::RetryConfig;
use crate::error::{DownloadError, Error, ResolveError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, connection resets, 5xx, stalls)
/// should return `true`. Permanent failures (captcha walls, geo restrictions,
/// missing variants, oversized files) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Resolve(e) => e.is_retryable(),
            Error::Download(e) => e.is_retryable(),
            // Network errors are retryable when they look transient
            Error::Network(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
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
            // The breaker reopens on its own schedule; a later redelivery may succeed
            Error::CircuitOpen => true,
            // Delivery failures need operator or endpoint-side action
            Error::Delivery(_) => false,
            // Repository errors should not be retried (likely permanent)
            Error::Repository(_) => false,
            // A job without a target can never succeed
            Error::InvalidTarget { .. } => false,
            // Config errors are permanent
            Error::Config { .. } => false,
            // Serialization errors are permanent
            Error::Serialization(_) => false,
            // Shutdown in progress - not retryable
            Error::ShuttingDown => false,
        }
    }
}

impl IsRetryable for ResolveError {
    fn is_retryable(&self) -> bool {
        match self {
            // Waiting does not clear a captcha wall or a rights restriction
            ResolveError::UpstreamBlocked
            | ResolveError::GeoRestricted
            | ResolveError::VariantNotFound { .. }
            | ResolveError::EmptyVariantSet
            | ResolveError::NoAcceptableQuality => false,
            // An obfuscation hiccup in the player payload often clears up
            ResolveError::NoLinksFound { .. } => true,
            ResolveError::InvalidPage(_) => true,
            // 5xx and 429 clear up on their own; other client errors do not
            ResolveError::UpstreamRejected { status } => *status == 429 || *status >= 500,
            ResolveError::FetchExhausted { .. } => true,
        }
    }
}

impl IsRetryable for DownloadError {
    fn is_retryable(&self) -> bool {
        match self {
            // Error pages and undersized payloads are usually transient mirror corruption
            DownloadError::InvalidResponse { .. }
            | DownloadError::FileTooSmall { .. }
            | DownloadError::Stalled { .. }
            | DownloadError::AttemptTimeout { .. }
            | DownloadError::AttemptsExhausted { .. } => true,
            DownloadError::MirrorStatus { status } => *status == 429 || *status >= 500,
            // Retrying cannot shrink the file
            DownloadError::FileTooLarge { .. } => false,
            DownloadError::NoMirrors => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// Retries only errors whose `IsRetryable` impl returns true, up to
/// `config.max_attempts` additional attempts, sleeping an exponentially
/// growing (optionally jittered) delay between attempts.
///
/// Returns the successful result or the last error once attempts are
/// exhausted or a permanent error is seen.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
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

                let jittered_delay = if config.jitter { add_jitter(delay) } else { delay };

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
/// actual delay lands between `delay` and `2 * delay`.
pub(crate) fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
