//! Worker metrics accumulation
//!
//! Process-wide counters recorded by the job processor and logged
//! periodically by the worker runtime. Counters only grow; `reset` is the
//! single explicit way back to zero.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Monotonically accumulating worker counters
///
/// Cheap to clone; all clones share the same counters. Constructed by the
/// process bootstrap and injected where needed.
#[derive(Clone, Default)]
pub struct WorkerMetrics {
    total_jobs: Arc<AtomicU64>,
    succeeded: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    retries: Arc<AtomicU64>,
    download_millis: Arc<AtomicU64>,
    upload_millis: Arc<AtomicU64>,
    bytes_downloaded: Arc<AtomicU64>,
}

/// Point-in-time view of the counters plus derived rates
#[derive(Clone, Debug, Serialize)]
pub struct WorkerMetricsSnapshot {
    /// Jobs that reached a terminal state
    pub total_jobs: u64,
    /// Jobs that delivered successfully
    pub succeeded: u64,
    /// Jobs that ended in a failure record
    pub failed: u64,
    /// Download attempt retries across all jobs
    pub retries: u64,
    /// Cumulative download wall-clock in milliseconds
    pub download_millis: u64,
    /// Cumulative upload wall-clock in milliseconds
    pub upload_millis: u64,
    /// Cumulative bytes written to disk
    pub bytes_downloaded: u64,
    /// Mean download time per successful job, milliseconds
    pub avg_download_millis: u64,
    /// Mean upload time per successful job, milliseconds
    pub avg_upload_millis: u64,
    /// Total downloaded volume in GiB, two decimals
    pub total_gib: f64,
    /// Share of terminal jobs that succeeded, 0-100
    pub success_rate_percent: u64,
}

impl WorkerMetrics {
    /// Create a fresh zeroed metrics handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished download (any number of attempts)
    pub fn record_download(&self, elapsed: Duration, bytes: u64) {
        self.download_millis
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record one finished upload
    pub fn record_upload(&self, elapsed: Duration) {
        self.upload_millis
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a job that delivered successfully
    pub fn record_success(&self) {
        self.total_jobs.fetch_add(1, Ordering::Relaxed);
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job that ended in failure
    pub fn record_failure(&self) {
        self.total_jobs.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one download attempt retry
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot with derived rates
    pub fn snapshot(&self) -> WorkerMetricsSnapshot {
        let total_jobs = self.total_jobs.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let retries = self.retries.load(Ordering::Relaxed);
        let download_millis = self.download_millis.load(Ordering::Relaxed);
        let upload_millis = self.upload_millis.load(Ordering::Relaxed);
        let bytes_downloaded = self.bytes_downloaded.load(Ordering::Relaxed);

        let avg = |total: u64| if succeeded > 0 { total / succeeded } else { 0 };
        let total_gib =
            (bytes_downloaded as f64 / (1024.0 * 1024.0 * 1024.0) * 100.0).round() / 100.0;
        let success_rate_percent = if total_jobs > 0 {
            (succeeded as f64 / total_jobs as f64 * 100.0).round() as u64
        } else {
            0
        };

        WorkerMetricsSnapshot {
            total_jobs,
            succeeded,
            failed,
            retries,
            download_millis,
            upload_millis,
            bytes_downloaded,
            avg_download_millis: avg(download_millis),
            avg_upload_millis: avg(upload_millis),
            total_gib,
            success_rate_percent,
        }
    }

    /// Reset every counter to zero
    pub fn reset(&self) {
        self.total_jobs.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.download_millis.store(0, Ordering::Relaxed);
        self.upload_millis.store(0, Ordering::Relaxed);
        self.bytes_downloaded.store(0, Ordering::Relaxed);
    }

    /// Spawn a task logging an aggregated snapshot every `interval`
    pub fn spawn_periodic_logging(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let metrics = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = metrics.snapshot();
                        tracing::info!(
                            total_jobs = snapshot.total_jobs,
                            succeeded = snapshot.succeeded,
                            failed = snapshot.failed,
                            retries = snapshot.retries,
                            success_rate_percent = snapshot.success_rate_percent,
                            avg_download_millis = snapshot.avg_download_millis,
                            avg_upload_millis = snapshot.avg_upload_millis,
                            total_gib = snapshot.total_gib,
                            "Worker metrics snapshot"
                        );
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}
