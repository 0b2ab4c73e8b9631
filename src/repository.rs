//! Repository boundary contract
//!
//! Persistence is an external collaborator: a key-value record store keyed by
//! an opaque [`RecordId`]. The worker uses it to short-circuit
//! already-delivered media and to persist terminal job state; schema and
//! queries live on the other side of this trait.

use crate::error::RepositoryError;
use crate::types::{ArtifactId, RecordId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted media record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaRecord {
    /// Repository key
    pub record_id: RecordId,
    /// Display name (may start as a placeholder and be refined on resolve)
    pub display_name: String,
    /// Source variant this record tracks, when known
    pub variant_id: Option<String>,
    /// Source page locator
    pub source_ref: String,
    /// Quality label of the delivered media
    pub quality: Option<String>,
    /// Whether a worker currently owns this record
    pub is_processing: bool,
    /// Whether the last processing run ended in failure
    pub has_error: bool,
    /// Human-readable failure message from the last run
    pub error_message: Option<String>,
    /// Delivered-artifact identity, once delivery succeeded
    pub artifact_id: Option<ArtifactId>,
    /// Size of the delivered media in bytes
    pub byte_size: Option<u64>,
    /// How many times the delivered artifact was served
    pub access_count: u64,
    /// When the artifact was last served
    pub last_accessed_at: Option<DateTime<Utc>>,
}

/// Fields for creating (or reviving) a record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewMediaRecord {
    /// Initial display name
    pub display_name: String,
    /// Source variant, when known at creation time
    pub variant_id: Option<String>,
    /// Source page locator
    pub source_ref: String,
    /// Whether a worker takes ownership immediately
    pub is_processing: bool,
}

/// Partial update for a record; only the populated fields change
///
/// `error_message` is doubly optional so a patch can distinguish "leave as
/// is" (`None`) from "clear the message" (`Some(None)`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MediaPatch {
    /// New display name
    pub display_name: Option<String>,
    /// New quality label
    pub quality: Option<String>,
    /// New processing-ownership flag
    pub is_processing: Option<bool>,
    /// New error flag
    pub has_error: Option<bool>,
    /// New error message (`Some(None)` clears it)
    pub error_message: Option<Option<String>>,
    /// Delivered-artifact identity
    pub artifact_id: Option<ArtifactId>,
    /// Delivered size in bytes
    pub byte_size: Option<u64>,
    /// Access timestamp
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl MediaPatch {
    /// Patch written after successful resolution
    pub fn resolved(display_name: &str, quality: &str) -> Self {
        Self {
            display_name: Some(display_name.to_string()),
            quality: Some(quality.to_string()),
            ..Self::default()
        }
    }

    /// Terminal success patch: record the artifact, clear error state
    pub fn delivered(artifact_id: ArtifactId, byte_size: u64) -> Self {
        Self {
            is_processing: Some(false),
            has_error: Some(false),
            error_message: Some(None),
            artifact_id: Some(artifact_id),
            byte_size: Some(byte_size),
            last_accessed_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Terminal failure patch
    pub fn failed(message: &str) -> Self {
        Self {
            is_processing: Some(false),
            has_error: Some(true),
            error_message: Some(Some(message.to_string())),
            ..Self::default()
        }
    }
}

/// Key-value persistence contract consumed by the worker
#[async_trait]
pub trait MediaRepository: Send + Sync {
    /// Look up a record by its source variant id
    async fn find_by_variant_id(
        &self,
        variant_id: &str,
    ) -> Result<Option<MediaRecord>, RepositoryError>;

    /// Create or revive a record, returning its persisted form
    async fn upsert(&self, record: NewMediaRecord) -> Result<MediaRecord, RepositoryError>;

    /// Apply a partial update to an existing record
    async fn update(&self, record_id: &RecordId, patch: MediaPatch)
    -> Result<(), RepositoryError>;

    /// Bump the served counter of an already-delivered record
    async fn increment_access_count(&self, record_id: &RecordId) -> Result<(), RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivered_patch_clears_error_state() {
        let patch = MediaPatch::delivered(ArtifactId::new("file-1"), 42);
        assert_eq!(patch.is_processing, Some(false));
        assert_eq!(patch.has_error, Some(false));
        assert_eq!(patch.error_message, Some(None));
        assert_eq!(patch.byte_size, Some(42));
    }

    #[test]
    fn failed_patch_sets_message() {
        let patch = MediaPatch::failed("mirrors down");
        assert_eq!(patch.has_error, Some(true));
        assert_eq!(patch.error_message, Some(Some("mirrors down".to_string())));
        assert_eq!(patch.artifact_id, None);
    }

    #[test]
    fn resolved_patch_touches_only_name_and_quality() {
        let patch = MediaPatch::resolved("Show", "720p (HD)");
        assert_eq!(patch.display_name, Some("Show".to_string()));
        assert_eq!(patch.quality, Some("720p (HD)".to_string()));
        assert_eq!(patch.is_processing, None);
        assert_eq!(patch.error_message, None);
    }
}
