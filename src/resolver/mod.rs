//! Content resolution — source page to ranked mirror set.
//!
//! Given a source page reference, produces a [`ResolvedMedia`]: a quality
//! label plus an ordered, deduplicated list of direct media URLs. Upstream
//! fetches go through the shared circuit breaker and a short transient-retry
//! loop; page and resolution lookups are absorbed by TTL caches so repeated
//! requests within the window never touch the network.
//!
//! All site-specific markup knowledge lives in [`markup`].

pub(crate) mod markup;

use crate::breaker::{BreakerError, CircuitBreaker};
use crate::cache::TtlCache;
use crate::config::{Config, ResolverConfig, SourceConfig};
use crate::error::{Error, ResolveError, Result};
use crate::retry::{IsRetryable, retry_with_backoff};
use crate::types::ResolvedMedia;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Resolves a source page reference into a ranked set of direct media URLs
///
/// Process-wide: one instance is shared by all concurrent jobs. The breaker
/// and caches it holds are the only cross-job state.
pub struct ContentResolver {
    http: reqwest::Client,
    source: SourceConfig,
    resolver: ResolverConfig,
    breaker: Arc<CircuitBreaker>,
    page_cache: TtlCache<String, String>,
    media_cache: TtlCache<String, ResolvedMedia>,
}

/// Wrapper for the intra-resolve fetch retry loop.
///
/// Job-level retryability says `CircuitOpen` is worth a redelivery, but
/// inside one resolve the breaker's reset window outlasts the whole retry
/// schedule, so the loop treats it as permanent and lets the queue wait it
/// out.
struct FetchAttemptError(Error);

impl std::fmt::Display for FetchAttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl IsRetryable for FetchAttemptError {
    fn is_retryable(&self) -> bool {
        !matches!(self.0, Error::CircuitOpen) && self.0.is_retryable()
    }
}

impl ContentResolver {
    /// Build a resolver from config, sharing the given breaker
    pub fn new(config: &Config, breaker: Arc<CircuitBreaker>) -> Result<Self> {
        let headers = Self::default_headers(&config.source)?;
        let http = reqwest::Client::builder()
            .user_agent(config.source.user_agent.clone())
            .default_headers(headers)
            .timeout(config.source.request_timeout)
            .build()?;

        Ok(Self {
            http,
            source: config.source.clone(),
            resolver: config.resolver.clone(),
            breaker,
            page_cache: TtlCache::new(config.resolver.cache_ttl),
            media_cache: TtlCache::new(config.resolver.cache_ttl),
        })
    }

    /// Resolve a source page into ranked media URLs, using cached lookups
    pub async fn resolve(
        &self,
        source_ref: &str,
        forced_variant_id: Option<&str>,
    ) -> Result<ResolvedMedia> {
        self.resolve_with_options(source_ref, forced_variant_id, false)
            .await
    }

    /// Resolve with an explicit cache-bypass flag
    ///
    /// `force_refresh` is used by the release-polling collaborator to see
    /// upstream changes before the TTL expires; it refetches and repopulates
    /// both the page and resolution caches.
    pub async fn resolve_with_options(
        &self,
        source_ref: &str,
        forced_variant_id: Option<&str>,
        force_refresh: bool,
    ) -> Result<ResolvedMedia> {
        let page_url = self.normalize_ref(source_ref);
        let forced = forced_variant_id.filter(|id| *id != "auto" && !id.is_empty());
        let cache_key = format!("{}#{}", page_url, forced.unwrap_or("auto"));

        if !force_refresh
            && let Some(cached) = self.media_cache.get(&cache_key)
        {
            tracing::debug!(page_url = %page_url, "Using cached resolution");
            return Ok(cached);
        }

        let html = self.fetch_page(&page_url, force_refresh).await?;

        let display_name = markup::extract_display_name(&html)
            .unwrap_or_else(|| "Unknown".to_string());

        let variant_id = match forced {
            Some(id) => {
                // Validate against the variant map when the page carries one
                if let Some(entries) = markup::extract_variant_map(&html) {
                    if !entries.is_empty() && !entries.iter().any(|(_, vid)| vid.as_str() == id) {
                        return Err(ResolveError::VariantNotFound { id: id.to_string() }.into());
                    }
                }
                id.to_string()
            }
            None => self.auto_select_variant(&html)?,
        };

        let player_url = markup::player_url(&self.source.base_url, &variant_id);
        tracing::debug!(variant_id = %variant_id, "Fetching player payload");
        let payload = self.fetch_upstream(&player_url, Some(&page_url)).await?;

        if markup::is_geo_restricted(&payload) {
            tracing::warn!(variant_id = %variant_id, "Geo-block detected");
            return Err(ResolveError::GeoRestricted.into());
        }

        let blob = markup::extract_link_blob(&payload).ok_or_else(|| {
            ResolveError::NoLinksFound {
                id: variant_id.clone(),
            }
        })?;

        let (quality, candidate_urls) =
            markup::rank_candidates(&blob, &self.resolver.mirror_priority)
                .ok_or(ResolveError::NoAcceptableQuality)?;

        let media = ResolvedMedia {
            display_name,
            quality,
            candidate_urls,
        };

        tracing::info!(
            page_url = %page_url,
            quality = %media.quality,
            mirrors = media.candidate_urls.len(),
            "Resolved media"
        );

        self.media_cache.set(cache_key, media.clone());
        Ok(media)
    }

    /// Number of cached pages and resolutions (for observability)
    pub fn cache_entries(&self) -> (usize, usize) {
        (self.page_cache.len(), self.media_cache.len())
    }

    /// Spawn the background sweep tasks for both lookup caches
    pub fn spawn_sweepers(&self, cancel: &CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        let interval = self.resolver.cache_ttl;
        vec![
            self.page_cache.spawn_sweeper(interval, cancel.clone()),
            self.media_cache.spawn_sweeper(interval, cancel.clone()),
        ]
    }

    /// Pick the first variant of the embedded map by numeric key order
    fn auto_select_variant(&self, html: &str) -> Result<String> {
        let entries =
            markup::extract_variant_map(html).ok_or(ResolveError::EmptyVariantSet)?;
        let (key, id) =
            markup::first_variant(&entries).ok_or(ResolveError::EmptyVariantSet)?;
        tracing::debug!(variant_key = %key, variant_id = %id, "Auto-selected first variant");
        Ok(id.clone())
    }

    /// Fetch the source page, serving from cache unless bypassed
    ///
    /// A captcha/WAF interstitial is classified here and never cached.
    async fn fetch_page(&self, page_url: &str, force_refresh: bool) -> Result<String> {
        if !force_refresh
            && let Some(cached) = self.page_cache.get(&page_url.to_string())
        {
            tracing::debug!(page_url = %page_url, "Using cached page");
            return Ok(cached);
        }

        let html = self.fetch_upstream(page_url, None).await?;
        if markup::is_blocked(&html) {
            return Err(ResolveError::UpstreamBlocked.into());
        }

        self.page_cache.set(page_url.to_string(), html.clone());
        Ok(html)
    }

    /// One breaker-guarded upstream fetch with transient retry
    ///
    /// Cache hits never reach this, so the breaker only sees real upstream
    /// traffic.
    async fn fetch_upstream(&self, url: &str, referer: Option<&str>) -> Result<String> {
        let attempts = self.source.fetch_retry.max_attempts + 1;
        let result = retry_with_backoff(&self.source.fetch_retry, || async move {
            self.breaker
                .execute(|| self.fetch_once(url, referer))
                .await
                .map_err(|e| FetchAttemptError(Error::from(e)))
        })
        .await;

        match result {
            Ok(body) => Ok(body),
            Err(FetchAttemptError(Error::CircuitOpen)) => Err(Error::CircuitOpen),
            Err(FetchAttemptError(e)) if e.is_retryable() => {
                // The loop above only returns a retryable error once exhausted
                Err(ResolveError::FetchExhausted {
                    attempts,
                    last_error: e.to_string(),
                }
                .into())
            }
            Err(FetchAttemptError(e)) => Err(e),
        }
    }

    /// A single GET against the upstream
    async fn fetch_once(&self, url: &str, referer: Option<&str>) -> Result<String> {
        let mut request = self.http.get(url);
        if let Some(referer) = referer {
            // The upstream rejects cross-origin-looking player requests
            request = request.header(reqwest::header::REFERER, referer);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::UpstreamRejected {
                status: status.as_u16(),
            }
            .into());
        }

        Ok(response.text().await?)
    }

    /// Normalize a page reference onto the configured mirror domain
    ///
    /// Absolute URLs get their authority replaced (the site moves between
    /// mirror domains; stored references may name a stale one); relative
    /// paths are joined onto the base.
    fn normalize_ref(&self, source_ref: &str) -> String {
        let base = self.source.base_url.trim_end_matches('/');
        if source_ref.starts_with("http") {
            if let Some(scheme_end) = source_ref.find("://") {
                let after_authority = source_ref[scheme_end + 3..]
                    .find('/')
                    .map(|i| scheme_end + 3 + i);
                return match after_authority {
                    Some(idx) => format!("{}{}", base, &source_ref[idx..]),
                    None => base.to_string(),
                };
            }
        }
        format!("{}/{}", base, source_ref.trim_start_matches('/'))
    }

    fn default_headers(source: &SourceConfig) -> Result<reqwest::header::HeaderMap> {
        use reqwest::header::{HeaderMap, HeaderValue};

        let base = source.base_url.trim_end_matches('/');
        let mut headers = HeaderMap::new();
        let pairs = [
            ("accept", "application/json, text/javascript, */*; q=0.01".to_string()),
            ("accept-language", "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7".to_string()),
            ("referer", format!("{}/", base)),
            ("origin", base.to_string()),
            ("x-requested-with", "XMLHttpRequest".to_string()),
        ];
        for (name, value) in pairs {
            let value = HeaderValue::from_str(&value).map_err(|e| Error::Config {
                message: format!("invalid header {name}: {e}"),
                key: Some("source.base_url".to_string()),
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// Millisecond-scale retry policy so tests never sleep for real
#[cfg(test)]
pub(crate) fn fast_retry() -> crate::config::RetryConfig {
    crate::config::RetryConfig {
        max_attempts: 2,
        initial_delay: std::time::Duration::from_millis(5),
        max_delay: std::time::Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE_HTML: &str = r#"
        <div class="shortstoryHead">
            <h1> Стальной алхимик [1-64 из 64] </h1></div>
        <script>var data = {'Серия 10':'1010', 'Серия 2':'222'};</script>
    "#;

    const PLAYER_HTML: &str = r#"
        var player = new Playerjs({"id":"player","file":"[FHD (1080p)]http://m2.trn.su/1080/a.mp4 or http://m9.other.io/1080/b.mp4,[HD (720p)]http://m1/720/c.mp4"});
    "#;

    async fn resolver_for(server: &MockServer, threshold: u32) -> ContentResolver {
        let mut config = Config::default();
        config.source.base_url = server.uri();
        config.source.fetch_retry = fast_retry();
        let breaker = Arc::new(CircuitBreaker::new(threshold, Duration::from_secs(30)));
        ContentResolver::new(&config, breaker).unwrap()
    }

    fn mock_page(html: &'static str) -> Mock {
        Mock::given(method("GET"))
            .and(path("/tip/1-show.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
    }

    fn mock_player(variant_id: &str, html: &'static str) -> Mock {
        Mock::given(method("GET"))
            .and(path("/frame5.php"))
            .and(query_param("play", variant_id))
            .and(query_param("old", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
    }

    #[tokio::test]
    async fn resolves_auto_variant_and_ranks_mirrors() {
        let server = MockServer::start().await;
        // "Серия 2" sorts before "Серия 10" numerically -> variant 222
        mock_page(PAGE_HTML).expect(1).mount(&server).await;
        mock_player("222", PLAYER_HTML).expect(1).mount(&server).await;

        let resolver = resolver_for(&server, 5).await;
        let media = resolver
            .resolve(&format!("{}/tip/1-show.html", server.uri()), None)
            .await
            .unwrap();

        assert_eq!(media.display_name, "Стальной алхимик");
        assert_eq!(media.quality, crate::types::Quality::Fhd1080);
        assert_eq!(
            media.candidate_urls,
            vec![
                "http://m2.trn.su/1080/a.mp4".to_string(),
                "http://m9.other.io/1080/b.mp4".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn second_resolve_within_ttl_is_served_from_cache() {
        let server = MockServer::start().await;
        mock_page(PAGE_HTML).expect(1).mount(&server).await;
        mock_player("222", PLAYER_HTML).expect(1).mount(&server).await;

        let resolver = resolver_for(&server, 5).await;
        let page = format!("{}/tip/1-show.html", server.uri());

        let first = resolver.resolve(&page, None).await.unwrap();
        let second = resolver.resolve(&page, None).await.unwrap();

        assert_eq!(first, second);
        // wiremock verifies expect(1) on drop: no second network call happened
    }

    #[tokio::test]
    async fn force_refresh_bypasses_the_cache() {
        let server = MockServer::start().await;
        mock_page(PAGE_HTML).expect(2).mount(&server).await;
        mock_player("222", PLAYER_HTML).expect(2).mount(&server).await;

        let resolver = resolver_for(&server, 5).await;
        let page = format!("{}/tip/1-show.html", server.uri());

        resolver.resolve(&page, None).await.unwrap();
        resolver
            .resolve_with_options(&page, None, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn forced_variant_skips_auto_selection() {
        let server = MockServer::start().await;
        mock_page(PAGE_HTML).expect(1).mount(&server).await;
        mock_player("1010", PLAYER_HTML).expect(1).mount(&server).await;

        let resolver = resolver_for(&server, 5).await;
        let media = resolver
            .resolve(&format!("{}/tip/1-show.html", server.uri()), Some("1010"))
            .await
            .unwrap();
        assert!(!media.candidate_urls.is_empty());
    }

    #[tokio::test]
    async fn forced_variant_missing_from_map_is_not_found() {
        let server = MockServer::start().await;
        mock_page(PAGE_HTML).mount(&server).await;

        let resolver = resolver_for(&server, 5).await;
        let err = resolver
            .resolve(&format!("{}/tip/1-show.html", server.uri()), Some("9999"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Resolve(ResolveError::VariantNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn captcha_page_is_non_retryable_blocked() {
        let server = MockServer::start().await;
        mock_page("<html>solve this captcha to continue</html>")
            .expect(1)
            .mount(&server)
            .await;

        let resolver = resolver_for(&server, 5).await;
        let err = resolver
            .resolve(&format!("{}/tip/1-show.html", server.uri()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Resolve(ResolveError::UpstreamBlocked)));
        assert!(!crate::retry::IsRetryable::is_retryable(&err));
    }

    #[tokio::test]
    async fn geo_restriction_in_player_payload() {
        let server = MockServer::start().await;
        mock_page(PAGE_HTML).mount(&server).await;
        mock_player(
            "222",
            "<html>Видео недоступен по просьбе правообладателей</html>",
        )
        .mount(&server)
        .await;

        let resolver = resolver_for(&server, 5).await;
        let err = resolver
            .resolve(&format!("{}/tip/1-show.html", server.uri()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Resolve(ResolveError::GeoRestricted)));
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tip/1-show.html"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = resolver_for(&server, 5).await;
        let err = resolver
            .resolve(&format!("{}/tip/1-show.html", server.uri()), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Resolve(ResolveError::UpstreamRejected { status: 404 })
        ));
    }

    #[tokio::test]
    async fn server_error_is_retried_then_reported_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tip/1-show.html"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3) // initial + 2 retries from fast_retry()
            .mount(&server)
            .await;

        let resolver = resolver_for(&server, 10).await;
        let err = resolver
            .resolve(&format!("{}/tip/1-show.html", server.uri()), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Resolve(ResolveError::FetchExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn open_breaker_short_circuits_without_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tip/1-show.html"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        // Threshold 1: the 404 trips the breaker open
        let resolver = resolver_for(&server, 1).await;
        let page = format!("{}/tip/1-show.html", server.uri());
        resolver.resolve(&page, None).await.unwrap_err();

        let err = resolver.resolve(&page, None).await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen));
        // expect(1) on the mock proves the second resolve never hit the wire
    }

    #[tokio::test]
    async fn no_links_in_player_payload() {
        let server = MockServer::start().await;
        mock_page(PAGE_HTML).mount(&server).await;
        mock_player("222", "<html>nothing useful</html>")
            .mount(&server)
            .await;

        let resolver = resolver_for(&server, 5).await;
        let err = resolver
            .resolve(&format!("{}/tip/1-show.html", server.uri()), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Resolve(ResolveError::NoLinksFound { .. })
        ));
    }

    #[test]
    fn normalize_ref_replaces_stale_authority() {
        let config = Config::default();
        let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(30)));
        let resolver = ContentResolver::new(&config, breaker).unwrap();

        assert_eq!(
            resolver.normalize_ref("https://old-mirror.example/tip/1.html"),
            "https://animevost.org/tip/1.html"
        );
        assert_eq!(
            resolver.normalize_ref("/tip/1.html"),
            "https://animevost.org/tip/1.html"
        );
        assert_eq!(
            resolver.normalize_ref("tip/1.html"),
            "https://animevost.org/tip/1.html"
        );
    }
}
