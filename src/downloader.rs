//! Resilient multi-mirror media download
//!
//! Streams a media URL set to local disk with retry, mirror rotation, a
//! per-attempt timeout, and a concurrent stall monitor that aborts attempts
//! making zero byte progress. Progress is reported through a synchronous
//! callback invoked from the streaming loop, throttled to the configured
//! interval.
//!
//! The mirror set comes from the resolver highest-priority first; attempts
//! rotate round-robin across it, skipping mirrors that already failed this
//! job until every mirror has failed once, at which point the slate is wiped
//! and rotation starts over.

use crate::config::{Config, DownloadConfig};
use crate::error::{DownloadError, Error, Result};
use crate::metrics::WorkerMetrics;
use crate::resolver::markup::mirror_host;
use crate::types::{ProgressKind, ProgressSnapshot, Quality, RetrievalOutcome};
use futures::StreamExt;
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Number of instantaneous rate samples in the smoothing window
const SPEED_SAMPLES: usize = 5;

/// Upper bound of the random jitter added between attempts, in milliseconds
const RETRY_JITTER_MAX_MS: u64 = 1000;

/// Streams ranked mirror URLs to disk with retry and stall detection
pub struct Downloader {
    http: reqwest::Client,
    config: DownloadConfig,
    metrics: WorkerMetrics,
}

impl Downloader {
    /// Build a downloader from config
    ///
    /// The client presents the same request identity as the resolver; CDN
    /// mirrors check the referer just like the page host does. Compression
    /// is disabled for stability on long transfers.
    pub fn new(config: &Config, metrics: WorkerMetrics) -> Result<Self> {
        use reqwest::header::{HeaderMap, HeaderValue};

        let base = config.source.base_url.trim_end_matches('/');
        let mut headers = HeaderMap::new();
        let pairs = [
            ("accept", "*/*".to_string()),
            ("accept-encoding", "identity".to_string()),
            ("referer", format!("{}/", base)),
            ("origin", base.to_string()),
        ];
        for (name, value) in pairs {
            let value = HeaderValue::from_str(&value).map_err(|e| Error::Config {
                message: format!("invalid header {name}: {e}"),
                key: Some("source.base_url".to_string()),
            })?;
            headers.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .user_agent(config.source.user_agent.clone())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            config: config.download.clone(),
            metrics,
        })
    }

    /// Download the media behind `urls` into `destination`
    ///
    /// Tries up to the configured attempt count across the mirror set. On
    /// success the file at `destination` is complete and within the size
    /// bounds. On failure the file has been removed and the error aggregates
    /// the attempt and mirror counts — except for an oversized payload,
    /// which aborts immediately with [`DownloadError::FileTooLarge`] since
    /// no retry can shrink it.
    pub async fn download(
        &self,
        urls: &[String],
        destination: &Path,
        quality: Quality,
        on_progress: &mut (dyn FnMut(&ProgressSnapshot) + Send),
    ) -> Result<RetrievalOutcome> {
        if urls.is_empty() {
            return Err(DownloadError::NoMirrors.into());
        }

        let started = Instant::now();
        let max_attempts = self.config.max_attempts;
        let mut failed_mirrors: HashSet<String> = HashSet::new();

        for attempt in 1..=max_attempts {
            let url = select_mirror(urls, attempt, &mut failed_mirrors);
            let mirror = mirror_host(url);

            // No partial-file reuse: every attempt starts from a clean slate
            remove_file_quietly(destination).await;

            on_progress(&ProgressSnapshot {
                kind: ProgressKind::AttemptStarted,
                attempt,
                max_attempts,
                mirror: mirror.clone(),
                quality,
                downloaded: 0,
                total: None,
                rate_bps: 0.0,
                eta: None,
            });

            tracing::info!(
                attempt,
                max_attempts,
                mirror = %mirror,
                "Starting download attempt"
            );

            let attempt_result = tokio::time::timeout(
                self.config.attempt_timeout,
                self.attempt_download(url, destination, attempt, &mirror, quality, on_progress),
            )
            .await
            .unwrap_or_else(|_| {
                Err(DownloadError::AttemptTimeout {
                    timeout_secs: self.config.attempt_timeout.as_secs(),
                }
                .into())
            });

            let error = match attempt_result {
                Ok(byte_size) => match self.validate_size(byte_size) {
                    Ok(()) => {
                        let elapsed = started.elapsed();
                        tracing::info!(
                            mirror = %mirror,
                            byte_size,
                            elapsed_secs = elapsed.as_secs(),
                            "Download complete"
                        );
                        return Ok(RetrievalOutcome {
                            local_path: destination.to_path_buf(),
                            byte_size,
                            elapsed,
                        });
                    }
                    Err(e) => e,
                },
                Err(e) => e,
            };

            remove_file_quietly(destination).await;

            if matches!(error, Error::Download(DownloadError::FileTooLarge { .. })) {
                tracing::error!(mirror = %mirror, error = %error, "Payload oversized, aborting");
                return Err(error);
            }

            tracing::warn!(
                attempt,
                max_attempts,
                mirror = %mirror,
                error = %error,
                "Download attempt failed"
            );
            failed_mirrors.insert(url.clone());
            self.metrics.record_retry();

            if attempt < max_attempts {
                let delay = self.retry_delay(attempt);
                tracing::debug!(delay_ms = delay.as_millis(), "Waiting before next attempt");
                tokio::time::sleep(delay).await;
            }
        }

        Err(DownloadError::AttemptsExhausted {
            attempts: max_attempts,
            mirrors: urls.len(),
        }
        .into())
    }

    /// One attempt: open the mirror, guard the headers, stream the body
    async fn attempt_download(
        &self,
        url: &str,
        destination: &Path,
        attempt: u32,
        mirror: &str,
        quality: Quality,
        on_progress: &mut (dyn FnMut(&ProgressSnapshot) + Send),
    ) -> Result<u64> {
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::MirrorStatus {
                status: status.as_u16(),
            }
            .into());
        }

        // An HTML/text body on HTTP 200 is an error page, not media
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if content_type.contains("html") || content_type.contains("text") {
            return Err(DownloadError::InvalidResponse { content_type }.into());
        }

        let total = response.content_length().filter(|len| *len > 0);
        if let Some(len) = total {
            if len > self.config.max_file_size {
                return Err(DownloadError::FileTooLarge {
                    size: len,
                    max: self.config.max_file_size,
                }
                .into());
            }
        } else {
            tracing::warn!(mirror = %mirror, "Content-Length missing or zero");
        }

        let received = Arc::new(AtomicU64::new(0));
        let stall = CancellationToken::new();
        let monitor = spawn_stall_monitor(
            received.clone(),
            stall.clone(),
            self.config.stall_check_interval,
        );

        let result = self
            .stream_to_disk(StreamContext {
                response,
                destination,
                attempt,
                mirror,
                quality,
                total,
                received: &received,
                stall: &stall,
                on_progress,
            })
            .await;

        // The monitor never outlives its attempt
        monitor.abort();
        result
    }

    /// Stream the response body to disk, counting bytes and emitting progress
    async fn stream_to_disk(&self, ctx: StreamContext<'_>) -> Result<u64> {
        let StreamContext {
            response,
            destination,
            attempt,
            mirror,
            quality,
            total,
            received,
            stall,
            on_progress,
        } = ctx;

        let mut file = tokio::fs::File::create(destination).await?;
        let mut stream = response.bytes_stream();
        let attempt_start = Instant::now();
        let mut downloaded: u64 = 0;
        let mut last_emit = Instant::now();
        let mut samples: VecDeque<f64> = VecDeque::with_capacity(SPEED_SAMPLES);

        loop {
            let next = tokio::select! {
                chunk = stream.next() => chunk,
                _ = stall.cancelled() => {
                    return Err(DownloadError::Stalled {
                        window_secs: self.config.stall_check_interval.as_secs(),
                    }
                    .into());
                }
            };

            let Some(chunk) = next else { break };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            received.store(downloaded, Ordering::Relaxed);

            // Catches a lying or absent content-length header mid-stream
            if downloaded > self.config.max_file_size {
                return Err(DownloadError::FileTooLarge {
                    size: downloaded,
                    max: self.config.max_file_size,
                }
                .into());
            }

            if last_emit.elapsed() >= self.config.progress_interval {
                let elapsed = attempt_start.elapsed().as_secs_f64();
                let instant_rate = if elapsed > 0.0 {
                    downloaded as f64 / elapsed
                } else {
                    0.0
                };
                if samples.len() == SPEED_SAMPLES {
                    samples.pop_front();
                }
                samples.push_back(instant_rate);
                let rate_bps = samples.iter().sum::<f64>() / samples.len() as f64;

                let eta = total.filter(|_| rate_bps > 0.0).map(|t| {
                    Duration::from_secs_f64((t.saturating_sub(downloaded)) as f64 / rate_bps)
                });

                on_progress(&ProgressSnapshot {
                    kind: ProgressKind::Transfer,
                    attempt,
                    max_attempts: self.config.max_attempts,
                    mirror: mirror.to_string(),
                    quality,
                    downloaded,
                    total,
                    rate_bps,
                    eta,
                });
                last_emit = Instant::now();
            }
        }

        file.flush().await?;
        Ok(downloaded)
    }

    /// Validate the finished size against the configured bounds
    fn validate_size(&self, byte_size: u64) -> Result<()> {
        if byte_size < self.config.min_file_size {
            return Err(DownloadError::FileTooSmall {
                size: byte_size,
                min: self.config.min_file_size,
            }
            .into());
        }
        if byte_size > self.config.max_file_size {
            return Err(DownloadError::FileTooLarge {
                size: byte_size,
                max: self.config.max_file_size,
            }
            .into());
        }
        Ok(())
    }

    /// Escalating inter-attempt delay plus random jitter
    ///
    /// The schedule is fixed (last entry is the floor for later attempts);
    /// jitter desynchronizes retry storms against a shared mirror.
    fn retry_delay(&self, attempt: u32) -> Duration {
        let schedule = &self.config.retry_delay_secs;
        let base_secs = schedule
            .get((attempt as usize).saturating_sub(1))
            .or_else(|| schedule.last())
            .copied()
            .unwrap_or(20);
        let jitter_ms = rand::thread_rng().gen_range(0..=RETRY_JITTER_MAX_MS);
        Duration::from_secs(base_secs) + Duration::from_millis(jitter_ms)
    }
}

/// Borrowed state for one streaming pass
struct StreamContext<'a> {
    response: reqwest::Response,
    destination: &'a Path,
    attempt: u32,
    mirror: &'a str,
    quality: Quality,
    total: Option<u64>,
    received: &'a Arc<AtomicU64>,
    stall: &'a CancellationToken,
    on_progress: &'a mut (dyn FnMut(&ProgressSnapshot) + Send),
}

/// Pick the mirror for this attempt
///
/// Rotation starts at `(attempt - 1) mod N` and scans forward past mirrors
/// already marked failed. Once every mirror has failed the set resets, so
/// with everything failing the sequence is exactly round-robin.
fn select_mirror<'a>(
    urls: &'a [String],
    attempt: u32,
    failed: &mut HashSet<String>,
) -> &'a String {
    if failed.len() >= urls.len() {
        failed.clear();
    }
    let start = (attempt as usize).saturating_sub(1) % urls.len();
    for offset in 0..urls.len() {
        let candidate = &urls[(start + offset) % urls.len()];
        if !failed.contains(candidate) {
            return candidate;
        }
    }
    &urls[start]
}

/// Spawn the stall monitor for one attempt
///
/// Samples the byte counter every `window`; a window with zero new bytes
/// (including the very first) cancels the token and ends the monitor. This
/// bounds a silently-hanging connection independently of the attempt
/// timeout.
fn spawn_stall_monitor(
    received: Arc<AtomicU64>,
    cancel: CancellationToken,
    window: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = 0u64;
        let mut ticker = tokio::time::interval(window);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let current = received.load(Ordering::Relaxed);
            if current == last {
                tracing::warn!(bytes = current, "Stall detected, aborting attempt");
                cancel.cancel();
                break;
            }
            last = current;
        }
    })
}

/// Best-effort file removal; missing files are fine
pub(crate) async fn remove_file_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::debug!(path = %path.display(), error = %e, "File removal failed"),
    }
}
