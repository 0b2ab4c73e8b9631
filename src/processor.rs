//! Job processing — orchestrates resolve → download → deliver → record.
//!
//! One [`JobProcessor::process`] call drives a single job through
//! `Resolving → Downloading → Uploading → Done`, with `Failed` reachable from
//! every state. Terminal state is always persisted to the repository before
//! the error is re-raised, so nothing is lost if the process dies right
//! after. The per-job temp file is removed on every exit path.
//!
//! The processor never retries on its own: intra-step retry already happened
//! inside the resolver and downloader, and job-level redelivery belongs to
//! the queue.

use crate::config::{Config, NotifierConfig};
use crate::delivery::DeliverySink;
use crate::downloader::{Downloader, remove_file_quietly};
use crate::error::{DeliveryError, Error, Result};
use crate::format::{format_bytes, format_eta, format_speed, progress_bar};
use crate::metrics::WorkerMetrics;
use crate::notifier::{NotificationChannel, ProgressNotifier};
use crate::repository::{MediaPatch, MediaRecord, MediaRepository};
use crate::resolver::ContentResolver;
use crate::types::{Job, ProgressKind, ProgressSnapshot, RecordId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Injected collaborators for the job processor
///
/// Everything the processor talks to is constructed by the process bootstrap
/// and handed in here; tests swap in fakes.
pub struct ProcessorContext {
    /// Shared content resolver
    pub resolver: Arc<ContentResolver>,
    /// Shared downloader
    pub downloader: Arc<Downloader>,
    /// Persistence contract
    pub repository: Arc<dyn MediaRepository>,
    /// File delivery contract
    pub delivery: Arc<dyn DeliverySink>,
    /// Status message channel
    pub channel: Arc<dyn NotificationChannel>,
    /// Process-wide metrics
    pub metrics: WorkerMetrics,
}

/// Drives one job through the pipeline state machine
pub struct JobProcessor {
    ctx: ProcessorContext,
    notifier_config: NotifierConfig,
    temp_dir: PathBuf,
}

impl JobProcessor {
    /// Build a processor from config and its collaborators
    pub fn new(config: &Config, ctx: ProcessorContext) -> Self {
        Self {
            ctx,
            notifier_config: config.notifier.clone(),
            temp_dir: config.download.temp_dir.clone(),
        }
    }

    /// Process one job to a terminal state
    ///
    /// On failure the error has already been persisted and (best-effort)
    /// reported to the requester; the returned error tells the queue whether
    /// redelivery makes sense (via [`crate::retry::IsRetryable`]).
    pub async fn process(&self, job: &Job) -> Result<()> {
        let notifier = Arc::new(ProgressNotifier::new(
            self.ctx.channel.clone(),
            job.delivery_target_id,
            job.progress_message_id,
            self.notifier_config.throttle_interval,
        ));

        let temp_path = self.temp_path(&job.record_id);
        let result = self.run(job, &temp_path, &notifier).await;
        // `finally` semantics: the temp file never survives the job
        remove_file_quietly(&temp_path).await;

        match result {
            Ok(()) => Ok(()),
            Err(error) => {
                tracing::error!(
                    record_id = %job.record_id,
                    error = %error,
                    "Job failed"
                );
                self.record_failure(&job.record_id, &error).await;

                // Exactly one human-readable message per terminal failure;
                // pointless or impossible sends are suppressed
                let suppress = matches!(
                    error,
                    Error::InvalidTarget { .. }
                        | Error::Delivery(DeliveryError::TargetBlocked { .. })
                );
                if !suppress {
                    notifier
                        .update(&format!("❌ {}", error.user_message()), true)
                        .await;
                }

                self.ctx.metrics.record_failure();
                Err(error)
            }
        }
    }

    /// The pipeline proper; every `?` lands in the failure branch of
    /// [`process`](Self::process)
    async fn run(&self, job: &Job, temp_path: &Path, notifier: &Arc<ProgressNotifier>) -> Result<()> {
        // Guard: a job without a delivery target can never finish; fail
        // before any network activity
        if job.delivery_target_id == 0 {
            return Err(Error::InvalidTarget {
                record_id: job.record_id.to_string(),
            });
        }

        let job_start = Instant::now();
        tracing::info!(
            record_id = %job.record_id,
            display_name = %job.display_name,
            "Processing job"
        );

        // Already delivered once? Serve the stored artifact without any
        // upstream traffic.
        if let Some(variant_id) = job.concrete_variant() {
            match self.ctx.repository.find_by_variant_id(variant_id).await {
                Ok(Some(record)) if record.artifact_id.is_some() && !record.has_error => {
                    return self.deliver_cached(job, record, notifier).await;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        record_id = %job.record_id,
                        error = %e,
                        "Cached-artifact lookup failed, proceeding with fetch"
                    );
                }
            }
        }

        // Resolving
        notifier
            .update(&format!("🔍 Resolving…\n{}", job.display_name), true)
            .await;
        let media = self
            .ctx
            .resolver
            .resolve(&job.source_ref, job.forced_variant_id.as_deref())
            .await?;
        tracing::info!(
            record_id = %job.record_id,
            quality = %media.quality,
            mirrors = media.candidate_urls.len(),
            "Resolved media"
        );

        let resolved_patch = MediaPatch::resolved(&media.display_name, &media.quality.to_string());
        if let Err(e) = self.ctx.repository.update(&job.record_id, resolved_patch).await {
            // Metadata only; the terminal write at the end is what matters
            tracing::warn!(record_id = %job.record_id, error = %e, "Failed to persist resolution metadata");
        }

        // Downloading
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        let outcome = {
            let bridge_notifier = notifier.clone();
            let display_name = job.display_name.clone();
            let mut on_progress = move |snapshot: &ProgressSnapshot| {
                let text = render_progress(&display_name, snapshot);
                let force = snapshot.kind == ProgressKind::AttemptStarted;
                let notifier = bridge_notifier.clone();
                // Fire and forget: the notifier's own lock serializes channel
                // calls and its throttle absorbs racing emissions
                tokio::spawn(async move {
                    notifier.update(&text, force).await;
                });
            };
            self.ctx
                .downloader
                .download(&media.candidate_urls, temp_path, media.quality, &mut on_progress)
                .await?
        };
        self.ctx
            .metrics
            .record_download(outcome.elapsed, outcome.byte_size);

        // Uploading
        let size_text = format_bytes(outcome.byte_size);
        notifier
            .update(
                &format!("📤 Uploading…\nSize: {}", size_text),
                true,
            )
            .await;
        let caption = format!(
            "🎬 {}\n{}\n✨ Quality: {}\n💾 Size: {}",
            media.display_name, job.display_name, media.quality, size_text
        );
        let upload_start = Instant::now();
        let artifact_id = self
            .ctx
            .delivery
            .deliver_file(job.delivery_target_id, &outcome.local_path, &caption)
            .await?;
        self.ctx.metrics.record_upload(upload_start.elapsed());

        // Done
        notifier.delete().await;
        let delivered_patch = MediaPatch::delivered(artifact_id, outcome.byte_size);
        if let Err(e) = self.ctx.repository.update(&job.record_id, delivered_patch).await {
            tracing::error!(
                record_id = %job.record_id,
                error = %e,
                "Failed to persist success record"
            );
        }
        self.ctx.metrics.record_success();

        tracing::info!(
            record_id = %job.record_id,
            total_secs = job_start.elapsed().as_secs(),
            download_secs = outcome.elapsed.as_secs(),
            "Job completed"
        );
        Ok(())
    }

    /// Serve a record that was already delivered once
    async fn deliver_cached(
        &self,
        job: &Job,
        record: MediaRecord,
        notifier: &Arc<ProgressNotifier>,
    ) -> Result<()> {
        let Some(artifact_id) = record.artifact_id.clone() else {
            // Caller checked; treat a race as a normal pipeline run trigger
            return Err(Error::Repository(crate::error::RepositoryError::NotFound(
                record.record_id.to_string(),
            )));
        };

        tracing::info!(
            record_id = %record.record_id,
            artifact_id = %artifact_id,
            "Serving already-delivered artifact"
        );

        let mut caption = format!("🎬 {}\n{}", record.display_name, job.display_name);
        if let Some(quality) = &record.quality {
            caption.push_str(&format!("\n✨ Quality: {}", quality));
        }

        self.ctx
            .delivery
            .deliver_artifact(job.delivery_target_id, &artifact_id, &caption)
            .await?;

        if let Err(e) = self
            .ctx
            .repository
            .increment_access_count(&record.record_id)
            .await
        {
            tracing::warn!(record_id = %record.record_id, error = %e, "Access count bump failed");
        }

        notifier.delete().await;
        self.ctx.metrics.record_success();
        Ok(())
    }

    /// Persist the failure record; its own errors are logged, never raised
    async fn record_failure(&self, record_id: &RecordId, error: &Error) {
        let patch = MediaPatch::failed(&error.to_string());
        if let Err(e) = self.ctx.repository.update(record_id, patch).await {
            tracing::error!(
                record_id = %record_id,
                error = %e,
                "Failed to persist failure record"
            );
        }
    }

    /// Per-job temp path, namespaced so concurrent jobs never collide
    fn temp_path(&self, record_id: &RecordId) -> PathBuf {
        self.temp_dir.join(format!(
            "media_{}_{}.mp4",
            record_id,
            chrono::Utc::now().timestamp_millis()
        ))
    }
}

/// Render one progress snapshot as a status text
fn render_progress(display_name: &str, snapshot: &ProgressSnapshot) -> String {
    match snapshot.kind {
        ProgressKind::AttemptStarted => format!(
            "📥 Downloading…\n{}\nAttempt {}/{}\nQuality: {}\nMirror: {}",
            display_name, snapshot.attempt, snapshot.max_attempts, snapshot.quality, snapshot.mirror
        ),
        ProgressKind::Transfer => {
            let mut text = format!(
                "📥 Downloading…\nMirror: {} ({}/{})\nQuality: {}",
                snapshot.mirror, snapshot.attempt, snapshot.max_attempts, snapshot.quality
            );
            if let (Some(percent), Some(total)) = (snapshot.percent(), snapshot.total) {
                text.push_str(&format!(
                    "\n[{}] {}%\n📦 {} / {}",
                    progress_bar(percent),
                    percent,
                    format_bytes(snapshot.downloaded),
                    format_bytes(total)
                ));
            } else {
                text.push_str(&format!("\n📦 {}", format_bytes(snapshot.downloaded)));
            }
            text.push_str(&format!("\n⚡ {}", format_speed(snapshot.rate_bps)));
            if let Some(eta) = snapshot.eta {
                text.push_str(&format!(" • ETA: {}", format_eta(eta)));
            }
            text
        }
    }
}
