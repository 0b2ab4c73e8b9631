//! Worker runtime — bounded-concurrency consumer loop over the job source.
//!
//! Pulls jobs from an external at-least-once queue, dispatches each to the
//! job processor under a concurrency semaphore and a jobs-per-minute rate
//! gate, and reports the outcome back to the source: ack on success, nack
//! with an exponential backoff suggestion for retryable failures, nack with
//! no redelivery for permanent ones.
//!
//! Shutdown drains: no new jobs are fetched, in-flight jobs run to their
//! terminal state, then the final metrics snapshot is logged.

use crate::config::{Config, WorkerConfig};
use crate::error::{Error, Result};
use crate::metrics::WorkerMetrics;
use crate::processor::JobProcessor;
use crate::retry::IsRetryable;
use crate::types::Job;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// At-least-once job queue contract
///
/// The source owns redelivery scheduling; the worker only reports outcomes
/// and suggests when a retry is worthwhile.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Pull the next ready job, if any
    async fn fetch(&self) -> Result<Option<Job>>;

    /// Acknowledge successful completion
    async fn ack(&self, job: &Job) -> Result<()>;

    /// Signal failure
    ///
    /// `retry_in = Some(delay)` suggests redelivery after the delay;
    /// `None` tells the source the job can never succeed and must not be
    /// redelivered.
    async fn nack(&self, job: &Job, error: &Error, retry_in: Option<Duration>) -> Result<()>;
}

/// Bounded-concurrency job consumer
pub struct WorkerRuntime {
    source: Arc<dyn JobSource>,
    processor: Arc<JobProcessor>,
    metrics: WorkerMetrics,
    config: WorkerConfig,
    shutdown: CancellationToken,
}

impl WorkerRuntime {
    /// Build a worker from config and its collaborators
    pub fn new(
        config: &Config,
        source: Arc<dyn JobSource>,
        processor: Arc<JobProcessor>,
        metrics: WorkerMetrics,
    ) -> Self {
        Self {
            source,
            processor,
            metrics,
            config: config.worker.clone(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the consumer loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request a draining shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run the consumer loop until shutdown, then drain
    pub async fn run(&self) -> Result<()> {
        tracing::info!(
            concurrency = self.config.concurrency,
            max_jobs_per_minute = self.config.max_jobs_per_minute,
            "Worker started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let metrics_task = self
            .metrics
            .spawn_periodic_logging(self.config.metrics_log_interval, self.shutdown.clone());

        let dispatch_gap =
            Duration::from_secs_f64(60.0 / self.config.max_jobs_per_minute.max(1) as f64);
        let mut last_dispatch: Option<Instant> = None;

        loop {
            // Reap finished tasks so the JoinSet does not grow unboundedly
            while tasks.try_join_next().is_some() {}

            if self.shutdown.is_cancelled() {
                break;
            }

            // Rate gate: keep dispatches at least one gap apart
            if let Some(at) = last_dispatch
                && at.elapsed() < dispatch_gap
                && self.sleep_or_shutdown(dispatch_gap - at.elapsed()).await
            {
                break;
            }

            // Concurrency gate
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => {
                    match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    }
                }
                _ = self.shutdown.cancelled() => break,
            };

            let fetched = tokio::select! {
                fetched = self.source.fetch() => fetched,
                _ = self.shutdown.cancelled() => {
                    drop(permit);
                    break;
                }
            };

            match fetched {
                Ok(Some(job)) => {
                    last_dispatch = Some(Instant::now());
                    let processor = self.processor.clone();
                    let source = self.source.clone();
                    let backoff_cap = self.config.job_backoff_cap;

                    tasks.spawn(async move {
                        let _permit = permit;
                        let record_id = job.record_id.clone();
                        match processor.process(&job).await {
                            Ok(()) => {
                                tracing::info!(record_id = %record_id, "Job acknowledged");
                                if let Err(e) = source.ack(&job).await {
                                    tracing::warn!(record_id = %record_id, error = %e, "Ack failed");
                                }
                            }
                            Err(error) => {
                                let retry_in = if error.is_retryable() {
                                    Some(retry_backoff(job.attempts_made, backoff_cap))
                                } else {
                                    None
                                };
                                tracing::warn!(
                                    record_id = %record_id,
                                    error = %error,
                                    retry_in_secs = retry_in.map(|d| d.as_secs()),
                                    "Job nacked"
                                );
                                if let Err(e) = source.nack(&job, &error, retry_in).await {
                                    tracing::warn!(record_id = %record_id, error = %e, "Nack failed");
                                }
                            }
                        }
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if self.sleep_or_shutdown(self.config.poll_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "Job source fetch failed");
                    if self.sleep_or_shutdown(self.config.poll_interval).await {
                        break;
                    }
                }
            }
        }

        // Drain: let in-flight jobs reach their terminal state
        self.shutdown.cancel();
        let in_flight = tasks.len();
        if in_flight > 0 {
            tracing::info!(in_flight, "Worker draining in-flight jobs");
        }
        while tasks.join_next().await.is_some() {}
        metrics_task.await.ok();

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            total_jobs = snapshot.total_jobs,
            succeeded = snapshot.succeeded,
            failed = snapshot.failed,
            retries = snapshot.retries,
            "Worker stopped"
        );
        Ok(())
    }

    /// Sleep unless shutdown fires first; returns true on shutdown
    async fn sleep_or_shutdown(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = self.shutdown.cancelled() => true,
        }
    }
}

/// Backoff suggestion for the queue when a retryable job fails
///
/// `min(1s * 2^attempts_made, cap)`, so the first redelivery comes quickly
/// and repeat offenders slow down.
pub fn retry_backoff(attempts_made: u32, cap: Duration) -> Duration {
    let exp = attempts_made.min(20);
    let secs = (1u64 << exp).min(cap.as_secs().max(1));
    Duration::from_secs(secs)
}
