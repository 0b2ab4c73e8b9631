//! Configuration types for anime-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Upstream source configuration (base URL, request identity, fetch retry)
///
/// Groups settings for talking to the third-party site whose pages and player
/// payloads are scraped. Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the source site mirror (default: "https://animevost.org")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// User-Agent header presented to the upstream
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for a single page/player request (default: 15 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Retry policy for upstream page/player fetches
    #[serde(default = "default_fetch_retry")]
    pub fetch_retry: RetryConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            fetch_retry: default_fetch_retry(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts on top of the initial call (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 4 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Resolver configuration (lookup caching, mirror ranking)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// TTL for page and resolution lookups (default: 10 minutes)
    #[serde(default = "default_cache_ttl", with = "duration_serde")]
    pub cache_ttl: Duration,

    /// Mirror host priority table, highest weight first in the ranked output
    ///
    /// Hosts not listed score 0 and keep their blob order behind listed ones.
    #[serde(default = "default_mirror_priority")]
    pub mirror_priority: Vec<MirrorPriority>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: default_cache_ttl(),
            mirror_priority: default_mirror_priority(),
        }
    }
}

/// One entry of the mirror-host priority table
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MirrorPriority {
    /// Host substring to match against the candidate URL
    pub host: String,
    /// Ranking weight (higher sorts first)
    pub weight: u32,
}

/// Download behavior configuration (attempts, timeouts, size bounds)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Temporary directory for in-flight media files (default: "./temp")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Maximum download attempts across all mirrors (default: 5)
    #[serde(default = "default_download_attempts")]
    pub max_attempts: u32,

    /// Wall-clock bound for a single attempt (default: 180 seconds)
    #[serde(default = "default_attempt_timeout", with = "duration_serde")]
    pub attempt_timeout: Duration,

    /// Stall sampling window; an attempt with zero new bytes in one window
    /// is aborted (default: 15 seconds)
    #[serde(default = "default_stall_interval", with = "duration_serde")]
    pub stall_check_interval: Duration,

    /// Minimum plausible media size; smaller results are error pages
    /// (default: 1 MiB)
    #[serde(default = "default_min_file_size")]
    pub min_file_size: u64,

    /// Maximum deliverable size (default: 2 GiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Escalating delays between attempts; the last entry is the floor for
    /// all later attempts (default: 3s, 5s, 10s, 20s)
    #[serde(default = "default_retry_delays")]
    pub retry_delay_secs: Vec<u64>,

    /// Minimum interval between progress callback emissions (default: 2 seconds)
    #[serde(default = "default_progress_interval", with = "duration_serde")]
    pub progress_interval: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            max_attempts: default_download_attempts(),
            attempt_timeout: default_attempt_timeout(),
            stall_check_interval: default_stall_interval(),
            min_file_size: default_min_file_size(),
            max_file_size: default_max_file_size(),
            retry_delay_secs: default_retry_delays(),
            progress_interval: default_progress_interval(),
        }
    }
}

/// Circuit breaker configuration
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker open (default: 5)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time the breaker stays open before allowing one trial call
    /// (default: 30 seconds)
    #[serde(default = "default_reset_timeout", with = "duration_serde")]
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout: default_reset_timeout(),
        }
    }
}

/// Progress notifier configuration
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Minimum interval between non-forced status updates (default: 3 seconds)
    #[serde(default = "default_throttle_interval", with = "duration_serde")]
    pub throttle_interval: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            throttle_interval: default_throttle_interval(),
        }
    }
}

/// Worker runtime configuration
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum jobs processed concurrently (default: 2)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Maximum job dispatches per minute (default: 8)
    #[serde(default = "default_jobs_per_minute")]
    pub max_jobs_per_minute: u32,

    /// Sleep between polls when the job source is empty (default: 1 second)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Interval between aggregated metrics snapshot logs (default: 10 minutes)
    #[serde(default = "default_metrics_interval", with = "duration_serde")]
    pub metrics_log_interval: Duration,

    /// Upper bound for the job-level backoff suggestion (default: 60 seconds)
    #[serde(default = "default_job_backoff_cap", with = "duration_serde")]
    pub job_backoff_cap: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_jobs_per_minute: default_jobs_per_minute(),
            poll_interval: default_poll_interval(),
            metrics_log_interval: default_metrics_interval(),
            job_backoff_cap: default_job_backoff_cap(),
        }
    }
}

/// Short-link cache configuration
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkCacheConfig {
    /// TTL for opaque-id-to-URL mappings (default: 1 hour)
    #[serde(default = "default_link_ttl", with = "duration_serde")]
    pub ttl: Duration,

    /// Interval between sweep passes (default: 10 minutes)
    #[serde(default = "default_link_cleanup", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

impl Default for LinkCacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_link_ttl(),
            cleanup_interval: default_link_cleanup(),
        }
    }
}

/// Main configuration for the fetch-and-deliver pipeline
///
/// Fields are organized into logical sub-configs for maintainability:
/// - [`source`](SourceConfig) — upstream site, request identity, fetch retry
/// - [`resolver`](ResolverConfig) — lookup caching, mirror ranking
/// - [`download`](DownloadConfig) — attempts, timeouts, size bounds
/// - [`breaker`](BreakerConfig) — circuit breaker thresholds
/// - [`notifier`](NotifierConfig) — status update throttling
/// - [`worker`](WorkerConfig) — concurrency, dispatch rate, metrics cadence
/// - [`link_cache`](LinkCacheConfig) — opaque short-link mapping
///
/// All fields have sensible defaults; `Config::default()` works without any
/// configuration file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Upstream source settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Resolver settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Download settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Circuit breaker settings
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Progress notifier settings
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Worker runtime settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Short-link cache settings
    #[serde(default)]
    pub link_cache: LinkCacheConfig,
}

// Default value functions for serde

fn default_base_url() -> String {
    "https://animevost.org".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36"
        .to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_fetch_retry() -> RetryConfig {
    RetryConfig::default()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(4)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_mirror_priority() -> Vec<MirrorPriority> {
    vec![
        MirrorPriority {
            host: "trn.su".to_string(),
            weight: 3,
        },
        MirrorPriority {
            host: "tigerlips".to_string(),
            weight: 2,
        },
        MirrorPriority {
            host: "aniqit".to_string(),
            weight: 1,
        },
    ]
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_download_attempts() -> u32 {
    5
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_stall_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_min_file_size() -> u64 {
    1024 * 1024
}

fn default_max_file_size() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_retry_delays() -> Vec<u64> {
    vec![3, 5, 10, 20]
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_throttle_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_concurrency() -> usize {
    2
}

fn default_jobs_per_minute() -> u32 {
    8
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_metrics_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_job_backoff_cap() -> Duration {
    Duration::from_secs(60)
}

fn default_link_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_link_cleanup() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.download.max_attempts, 5);
        assert_eq!(config.download.attempt_timeout, Duration::from_secs(180));
        assert_eq!(config.download.stall_check_interval, Duration::from_secs(15));
        assert_eq!(config.download.min_file_size, 1024 * 1024);
        assert_eq!(config.download.max_file_size, 2 * 1024 * 1024 * 1024);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.reset_timeout, Duration::from_secs(30));
        assert_eq!(config.notifier.throttle_interval, Duration::from_secs(3));
        assert_eq!(config.worker.concurrency, 2);
        assert_eq!(config.worker.max_jobs_per_minute, 8);
        assert_eq!(config.resolver.cache_ttl, Duration::from_secs(600));
    }

    #[test]
    fn empty_json_deserializes_to_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.download.max_attempts, 5);
        assert_eq!(config.download.retry_delay_secs, vec![3, 5, 10, 20]);
    }

    #[test]
    fn durations_round_trip_as_seconds() {
        let config = Config::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["breaker"]["reset_timeout"], 30);
        let back: Config = serde_json::from_value(json).unwrap();
        assert_eq!(back.breaker.reset_timeout, Duration::from_secs(30));
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"download": {"max_attempts": 2}}"#).unwrap();
        assert_eq!(config.download.max_attempts, 2);
        assert_eq!(config.download.attempt_timeout, Duration::from_secs(180));
        assert_eq!(config.worker.concurrency, 2);
    }

    #[test]
    fn mirror_priority_defaults_are_ordered() {
        let priorities = default_mirror_priority();
        assert_eq!(priorities[0].host, "trn.su");
        assert!(priorities[0].weight > priorities[1].weight);
    }
}
