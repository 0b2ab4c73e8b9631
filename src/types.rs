//! Core types for anime-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Opaque repository key for a media record
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    /// Create a new RecordId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an artifact already delivered to the messaging endpoint
///
/// Returned by the delivery sink; re-delivering this handle skips the whole
/// retrieval pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub String);

impl ArtifactId {
    /// Create a new ArtifactId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of work pulled from the job source
///
/// Owned exclusively by a single worker slot from fetch to ack/nack; the
/// processor never shares or mutates it concurrently.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    /// Repository key of the record this job fills in
    pub record_id: RecordId,

    /// Source page locator (absolute URL or site-relative path)
    pub source_ref: String,

    /// Explicit variant selection; `None` or the "auto" sentinel picks the
    /// first variant by numeric order
    #[serde(default)]
    pub forced_variant_id: Option<String>,

    /// Human label shown in status messages
    pub display_name: String,

    /// Identity of the requesting user
    pub requester_id: i64,

    /// Target the finished file is delivered to (0 = unresolved)
    pub delivery_target_id: i64,

    /// Opaque UI correlation token echoed back in final messages
    #[serde(default)]
    pub back_reference: Option<String>,

    /// Existing status message to edit instead of creating a new one
    #[serde(default)]
    pub progress_message_id: Option<i64>,

    /// How many times the queue has already delivered this job
    #[serde(default)]
    pub attempts_made: u32,
}

impl Job {
    /// Whether the job pins a concrete variant (as opposed to auto-selection)
    pub fn concrete_variant(&self) -> Option<&str> {
        match self.forced_variant_id.as_deref() {
            None | Some("auto") => None,
            Some(id) => Some(id),
        }
    }
}

/// Media quality tier, in fixed priority order
///
/// Only the two top tiers exist; anything lower is rejected during
/// resolution rather than silently served.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// 1080p (FHD) — preferred
    Fhd1080,
    /// 720p (HD) — accepted when no confirmed 1080p mirror exists
    Hd720,
}

impl Quality {
    /// Path marker that structurally confirms a URL really serves this tier
    pub fn path_marker(&self) -> &'static str {
        match self {
            Quality::Fhd1080 => "/1080/",
            Quality::Hd720 => "/720/",
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Quality::Fhd1080 => write!(f, "1080p (FHD)"),
            Quality::Hd720 => write!(f, "720p (HD)"),
        }
    }
}

/// Output of content resolution: a ranked, deduplicated mirror set
///
/// Invariant: `candidate_urls` is never empty — resolution fails explicitly
/// instead of returning an empty set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMedia {
    /// Display name extracted from the source page
    pub display_name: String,
    /// Quality tier the candidate URLs were confirmed against
    pub quality: Quality,
    /// Direct media URLs, highest-priority mirror first
    pub candidate_urls: Vec<String>,
}

/// Output of a successful download
#[derive(Clone, Debug)]
pub struct RetrievalOutcome {
    /// Where the media landed on local disk
    pub local_path: PathBuf,
    /// Final size on disk, within the configured bounds
    pub byte_size: u64,
    /// Wall-clock time across all attempts
    pub elapsed: Duration,
}

/// What a progress emission describes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressKind {
    /// A new download attempt is starting against a mirror
    AttemptStarted,
    /// Bytes are flowing; counters and rate are populated
    Transfer,
}

/// Snapshot handed to the download progress callback
///
/// Emitted once per attempt start and then at most every
/// `progress_interval` during transfer.
#[derive(Clone, Debug)]
pub struct ProgressSnapshot {
    /// What this emission describes
    pub kind: ProgressKind,
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Configured attempt ceiling
    pub max_attempts: u32,
    /// Host of the mirror being tried
    pub mirror: String,
    /// Quality tier being fetched
    pub quality: Quality,
    /// Bytes written so far this attempt
    pub downloaded: u64,
    /// Total size from the content-length header, when the mirror sent one
    pub total: Option<u64>,
    /// Transfer rate smoothed over the last few samples, bytes per second
    pub rate_bps: f64,
    /// Estimated time to completion, when computable
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    /// Completion percentage, when the total size is known
    pub fn percent(&self) -> Option<u8> {
        self.total.filter(|t| *t > 0).map(|t| {
            ((self.downloaded as f64 / t as f64) * 100.0).round().min(100.0) as u8
        })
    }
}
