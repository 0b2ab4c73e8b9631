//! Shared in-memory fakes for unit tests.
//!
//! Boundary collaborators (repository, delivery sink, notification channel)
//! recorded in memory, plus fixture builders for configs and jobs.

use crate::config::Config;
use crate::delivery::DeliverySink;
use crate::error::{DeliveryError, RepositoryError};
use crate::notifier::NotificationChannel;
use crate::repository::{MediaPatch, MediaRecord, MediaRepository, NewMediaRecord};
use crate::types::{ArtifactId, Job, Quality, RecordId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Repository fake recording every patch and access bump
#[derive(Default)]
pub(crate) struct FakeRepository {
    pub records: Mutex<HashMap<String, MediaRecord>>,
    pub patches: Mutex<Vec<(RecordId, MediaPatch)>>,
    pub access_bumps: Mutex<Vec<RecordId>>,
}

impl FakeRepository {
    pub fn with_record(self, record: MediaRecord) -> Self {
        if let Some(variant) = record.variant_id.clone() {
            if let Ok(mut records) = self.records.lock() {
                records.insert(variant, record);
            }
        }
        self
    }

    pub fn last_patch(&self) -> Option<(RecordId, MediaPatch)> {
        self.patches.lock().ok()?.last().cloned()
    }
}

#[async_trait]
impl MediaRepository for FakeRepository {
    async fn find_by_variant_id(
        &self,
        variant_id: &str,
    ) -> Result<Option<MediaRecord>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .map_err(|_| RepositoryError::Backend("poisoned".to_string()))?
            .get(variant_id)
            .cloned())
    }

    async fn upsert(&self, record: NewMediaRecord) -> Result<MediaRecord, RepositoryError> {
        Err(RepositoryError::Backend(format!(
            "upsert unused in these tests: {}",
            record.display_name
        )))
    }

    async fn update(
        &self,
        record_id: &RecordId,
        patch: MediaPatch,
    ) -> Result<(), RepositoryError> {
        self.patches
            .lock()
            .map_err(|_| RepositoryError::Backend("poisoned".to_string()))?
            .push((record_id.clone(), patch));
        Ok(())
    }

    async fn increment_access_count(&self, record_id: &RecordId) -> Result<(), RepositoryError> {
        self.access_bumps
            .lock()
            .map_err(|_| RepositoryError::Backend("poisoned".to_string()))?
            .push(record_id.clone());
        Ok(())
    }
}

/// Delivery sink fake; `blocked` simulates an unreachable target, `delay`
/// makes in-flight jobs observable for drain tests
#[derive(Default)]
pub(crate) struct FakeSink {
    pub files: Mutex<Vec<(i64, PathBuf, String)>>,
    pub artifacts: Mutex<Vec<(i64, ArtifactId, String)>>,
    pub blocked: bool,
    pub delay: Option<Duration>,
}

#[async_trait]
impl DeliverySink for FakeSink {
    async fn deliver_file(
        &self,
        target_id: i64,
        local_path: &Path,
        caption: &str,
    ) -> Result<ArtifactId, DeliveryError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.blocked {
            return Err(DeliveryError::TargetBlocked { target_id });
        }
        if let Ok(mut files) = self.files.lock() {
            files.push((target_id, local_path.to_path_buf(), caption.to_string()));
        }
        Ok(ArtifactId::new("artifact-1"))
    }

    async fn deliver_artifact(
        &self,
        target_id: i64,
        artifact_id: &ArtifactId,
        caption: &str,
    ) -> Result<(), DeliveryError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.blocked {
            return Err(DeliveryError::TargetBlocked { target_id });
        }
        if let Ok(mut artifacts) = self.artifacts.lock() {
            artifacts.push((target_id, artifact_id.clone(), caption.to_string()));
        }
        Ok(())
    }
}

/// Notification channel fake recording `(was_edit, text)` pairs
#[derive(Default)]
pub(crate) struct FakeChannel {
    pub sent: Mutex<Vec<(bool, String)>>,
    pub deletes: Mutex<u32>,
}

#[async_trait]
impl NotificationChannel for FakeChannel {
    async fn send_message(&self, _target_id: i64, text: &str) -> Result<i64, DeliveryError> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| DeliveryError::Transport("poisoned".to_string()))?;
        sent.push((false, text.to_string()));
        Ok(sent.len() as i64)
    }

    async fn edit_message(
        &self,
        _target_id: i64,
        _message_id: i64,
        text: &str,
    ) -> Result<(), DeliveryError> {
        self.sent
            .lock()
            .map_err(|_| DeliveryError::Transport("poisoned".to_string()))?
            .push((true, text.to_string()));
        Ok(())
    }

    async fn delete_message(&self, _target_id: i64, _message_id: i64) -> Result<(), DeliveryError> {
        if let Ok(mut deletes) = self.deletes.lock() {
            *deletes += 1;
        }
        Ok(())
    }
}

/// A config wired for tests: given upstream, temp dir, tiny thresholds,
/// millisecond retries
pub(crate) fn test_config(base_url: &str, temp_dir: &Path) -> Config {
    let mut config = Config::default();
    config.source.base_url = base_url.to_string();
    config.source.fetch_retry = crate::resolver::fast_retry();
    config.download.temp_dir = temp_dir.to_path_buf();
    config.download.min_file_size = 16;
    config.download.retry_delay_secs = vec![0];
    config.worker.poll_interval = Duration::from_millis(10);
    // One dispatch per 10ms; individual tests tighten this when they
    // exercise the rate gate
    config.worker.max_jobs_per_minute = 6000;
    config
}

/// A job aimed at `target`, optionally pinning a variant
pub(crate) fn sample_job(target: i64, variant: Option<&str>) -> Job {
    Job {
        record_id: RecordId::new("rec-1"),
        source_ref: "/tip/1-show.html".to_string(),
        forced_variant_id: variant.map(str::to_string),
        display_name: "Episode 1".to_string(),
        requester_id: 7,
        delivery_target_id: target,
        back_reference: None,
        progress_message_id: None,
        attempts_made: 0,
    }
}

/// A record that has already been delivered once
pub(crate) fn delivered_record(variant: &str) -> MediaRecord {
    MediaRecord {
        record_id: RecordId::new("rec-1"),
        display_name: "Show".to_string(),
        variant_id: Some(variant.to_string()),
        source_ref: "/tip/1-show.html".to_string(),
        quality: Some(Quality::Hd720.to_string()),
        is_processing: false,
        has_error: false,
        error_message: None,
        artifact_id: Some(ArtifactId::new("artifact-cached")),
        byte_size: Some(1024),
        access_count: 3,
        last_accessed_at: None,
    }
}
