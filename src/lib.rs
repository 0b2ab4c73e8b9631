//! # anime-dl
//!
//! Backend worker library for fetching media episodes from an unstable
//! third-party streaming site and delivering them to a messaging endpoint.
//!
//! ## Design Philosophy
//!
//! - **Resilient by construction** - circuit breaking, mirror rotation,
//!   stall detection and bounded retry around every upstream interaction
//! - **Sensible defaults** - works out of the box with zero configuration
//! - **Library-first** - no bot UI or HTTP API, purely a Rust crate for
//!   embedding; collaborators plug in through traits
//! - **Explicit wiring** - caches, breaker and metrics are constructed by
//!   the bootstrap and injected, never ambient
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use anime_dl::{
//!     Config, CircuitBreaker, ContentResolver, Downloader, JobProcessor,
//!     ProcessorContext, WorkerMetrics, WorkerRuntime, run_with_shutdown,
//! };
//! # use anime_dl::{DeliverySink, JobSource, MediaRepository, NotificationChannel};
//!
//! # async fn example(
//! #     source: Arc<dyn JobSource>,
//! #     repository: Arc<dyn MediaRepository>,
//! #     delivery: Arc<dyn DeliverySink>,
//! #     channel: Arc<dyn NotificationChannel>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let metrics = WorkerMetrics::new();
//! let breaker = Arc::new(CircuitBreaker::from_config(&config.breaker));
//!
//! let processor = Arc::new(JobProcessor::new(
//!     &config,
//!     ProcessorContext {
//!         resolver: Arc::new(ContentResolver::new(&config, breaker)?),
//!         downloader: Arc::new(Downloader::new(&config, metrics.clone())?),
//!         repository,
//!         delivery,
//!         channel,
//!         metrics: metrics.clone(),
//!     },
//! ));
//!
//! let worker = WorkerRuntime::new(&config, source, processor, metrics);
//! run_with_shutdown(worker).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Circuit breaker around the upstream source
pub mod breaker;
/// Short-lived TTL caches
pub mod cache;
/// Configuration types
pub mod config;
/// Delivery sink boundary contract
pub mod delivery;
/// Resilient multi-mirror downloader
pub mod downloader;
/// Error types
pub mod error;
/// Formatting helpers for status texts
pub mod format;
/// Worker metrics accumulation
pub mod metrics;
/// Throttled progress notifications
pub mod notifier;
/// Job processing state machine
pub mod processor;
/// Repository boundary contract
pub mod repository;
/// Content resolution (page to ranked mirror set)
pub mod resolver;
/// Retry classification and backoff helpers
pub mod retry;
/// Core types
pub mod types;
/// Worker runtime consumer loop
pub mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use breaker::{BreakerError, CircuitBreaker, CircuitState};
pub use cache::{ShortLinkCache, TtlCache};
pub use config::Config;
pub use delivery::DeliverySink;
pub use downloader::Downloader;
pub use error::{
    DeliveryError, DownloadError, Error, RepositoryError, ResolveError, Result,
};
pub use metrics::{WorkerMetrics, WorkerMetricsSnapshot};
pub use notifier::{NotificationChannel, ProgressNotifier};
pub use processor::{JobProcessor, ProcessorContext};
pub use repository::{MediaPatch, MediaRecord, MediaRepository, NewMediaRecord};
pub use resolver::ContentResolver;
pub use retry::IsRetryable;
pub use types::{
    ArtifactId, Job, ProgressKind, ProgressSnapshot, Quality, RecordId, ResolvedMedia,
    RetrievalOutcome,
};
pub use worker::{JobSource, WorkerRuntime};

/// Helper function to run the worker with graceful signal handling.
///
/// Spawns the consumer loop, waits for a termination signal, then requests a
/// draining shutdown and waits for in-flight jobs to finish.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use anime_dl::{WorkerRuntime, run_with_shutdown};
///
/// # async fn example(worker: WorkerRuntime) -> anime_dl::Result<()> {
/// run_with_shutdown(worker).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_with_shutdown(worker: WorkerRuntime) -> Result<()> {
    let token = worker.shutdown_token();
    let handle = tokio::spawn(async move { worker.run().await });

    wait_for_signal().await;
    token.cancel();

    match handle.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "Worker task aborted");
            Err(Error::ShuttingDown)
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
