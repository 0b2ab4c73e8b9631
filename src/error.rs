//! Error types for anime-dl
//!
//! This module provides the closed error taxonomy for the library:
//! - Domain-specific error types (Resolve, Download, Delivery, Repository)
//! - Context information (variant ids, byte sizes, attempt counts)
//! - Mapping from error kinds to single human-readable messages
//!
//! Every error kind is produced at the throw site; nothing downstream
//! reconstructs a kind by matching on message strings.

use thiserror::Error;

/// Result type alias for anime-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for anime-dl
///
/// This is the primary error type used throughout the library. Each variant
/// includes contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "temp_dir")
        key: Option<String>,
    },

    /// Content resolution failed
    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Media retrieval failed
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Delivery to the messaging endpoint failed
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Repository operation failed
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// The circuit breaker is open and rejected the call without trying
    #[error("upstream circuit breaker is open")]
    CircuitOpen,

    /// The job names no usable delivery target
    #[error("job {record_id} has no valid delivery target")]
    InvalidTarget {
        /// Repository key of the rejected job
        record_id: String,
    },

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,
}

/// Content resolution errors
///
/// Produced by the resolver while turning a source page reference into a
/// ranked set of direct media URLs.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The upstream answered with a captcha or WAF interstitial
    #[error("upstream returned a captcha or WAF block page")]
    UpstreamBlocked,

    /// The variant payload carries a rights-restriction marker
    #[error("media is geo-restricted by the rights holder")]
    GeoRestricted,

    /// The requested variant id does not exist on the page
    #[error("variant {id} not found on source page")]
    VariantNotFound {
        /// The variant id that was requested
        id: String,
    },

    /// The page carries a variant map with no entries
    #[error("source page contains an empty variant set")]
    EmptyVariantSet,

    /// No quality bracket yielded a structurally confirmed URL
    #[error("no acceptable quality (1080p/720p) found")]
    NoAcceptableQuality,

    /// The player payload contained neither a config field nor download buttons
    #[error("no media links found in player payload for variant {id}")]
    NoLinksFound {
        /// The variant id whose payload was scanned
        id: String,
    },

    /// The source page did not match the expected markup
    #[error("unexpected source page markup: {0}")]
    InvalidPage(String),

    /// The upstream rejected the request with a client error
    #[error("upstream rejected request with HTTP {status}")]
    UpstreamRejected {
        /// HTTP status code returned by the upstream
        status: u16,
    },

    /// All fetch attempts against the upstream were exhausted
    #[error("upstream fetch failed after {attempts} attempts: {last_error}")]
    FetchExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Message of the last underlying failure
        last_error: String,
    },
}

/// Media retrieval errors
///
/// Produced by the downloader while streaming a mirror to disk.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The mirror answered with an error page instead of media
    #[error("mirror returned non-media content type {content_type:?}")]
    InvalidResponse {
        /// The content type the mirror claimed
        content_type: String,
    },

    /// The mirror answered with a non-success HTTP status
    #[error("mirror returned HTTP {status}")]
    MirrorStatus {
        /// HTTP status code returned by the mirror
        status: u16,
    },

    /// The finished file is below the plausible-media floor
    #[error("file too small: {size} bytes (minimum {min})")]
    FileTooSmall {
        /// Actual size on disk
        size: u64,
        /// Configured minimum
        min: u64,
    },

    /// The file exceeds the delivery size limit; retrying cannot shrink it
    #[error("file too large: {size} bytes (maximum {max})")]
    FileTooLarge {
        /// Actual or announced size
        size: u64,
        /// Configured maximum
        max: u64,
    },

    /// A stall window elapsed with zero bytes received
    #[error("download stalled: no bytes received for {window_secs}s")]
    Stalled {
        /// Length of the empty window in seconds
        window_secs: u64,
    },

    /// The per-attempt timeout elapsed
    #[error("download attempt timed out after {timeout_secs}s")]
    AttemptTimeout {
        /// The configured attempt timeout in seconds
        timeout_secs: u64,
    },

    /// Every attempt across every mirror failed
    #[error("download failed after {attempts} attempts across {mirrors} mirror(s)")]
    AttemptsExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Number of distinct mirrors in the candidate set
        mirrors: usize,
    },

    /// The resolver handed over an empty mirror list (violates its contract)
    #[error("no mirrors to download from")]
    NoMirrors,
}

/// Delivery sink errors
///
/// The sink must classify a blocked/unreachable target distinctly so the
/// processor can stop notifying that target.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The target has blocked the sender or is otherwise unreachable
    #[error("delivery target {target_id} is blocked or unreachable")]
    TargetBlocked {
        /// The blocked target identity
        target_id: i64,
    },

    /// The endpoint rejected the payload (size, format, policy)
    #[error("delivery rejected: {reason}")]
    Rejected {
        /// Endpoint-provided rejection reason
        reason: String,
    },

    /// Transport-level failure talking to the endpoint
    #[error("delivery transport error: {0}")]
    Transport(String),
}

/// Repository contract errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// No record exists under the given key
    #[error("record not found: {0}")]
    NotFound(String),

    /// The backing store rejected the operation
    #[error("repository operation failed: {0}")]
    Backend(String),
}

impl Error {
    /// Map this error to the single human-readable message shown to the
    /// requester on terminal failure.
    ///
    /// Never exposes a raw error chain; unknown kinds fall back to a generic
    /// line plus the top-level display.
    pub fn user_message(&self) -> String {
        match self {
            Error::Resolve(ResolveError::UpstreamBlocked) => {
                "The source site is asking for a captcha. Please try again later.".to_string()
            }
            Error::Resolve(ResolveError::GeoRestricted) => {
                "This video is unavailable in the source region (rights restriction).".to_string()
            }
            Error::Resolve(ResolveError::NoAcceptableQuality) => {
                "No high-quality stream (1080p/720p) was found for this episode.".to_string()
            }
            Error::Resolve(ResolveError::VariantNotFound { .. })
            | Error::Resolve(ResolveError::EmptyVariantSet) => {
                "The requested episode could not be found on the source page.".to_string()
            }
            Error::Download(DownloadError::FileTooLarge { max, .. }) => format!(
                "The file exceeds the {} delivery limit.",
                crate::format::format_bytes(*max)
            ),
            Error::Download(DownloadError::AttemptsExhausted { .. })
            | Error::Download(DownloadError::Stalled { .. })
            | Error::Download(DownloadError::AttemptTimeout { .. }) => {
                "The source mirrors are not responding. Please try again later.".to_string()
            }
            Error::CircuitOpen => {
                "The source site is temporarily unavailable. Please try again in a minute."
                    .to_string()
            }
            Error::Network(_) => {
                "A network error occurred while talking to the source site.".to_string()
            }
            other => format!("Processing failed: {}", other),
        }
    }
}
