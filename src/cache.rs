//! Short-lived TTL caches
//!
//! [`TtlCache`] is a generic expiring key→value store used to absorb repeated
//! page and resolution lookups. Entries are evicted lazily on a stale `get`
//! and eagerly by a background sweep task, which bounds memory for processes
//! that never query a stale key again. [`ShortLinkCache`] builds on it to map
//! randomly generated opaque ids to URLs so UI collaborators can keep
//! callback payloads short.
//!
//! Caches are explicitly constructed and injected; there is no ambient
//! module-level instance.

use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Length of generated short-link ids
const SHORT_ID_LEN: usize = 8;

/// One cached value with its expiry deadline
#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Generic expiring key→value store
///
/// Safe for concurrent callers; the internal map is serialized behind a
/// mutex. There is no size cap — key cardinality is naturally bounded by the
/// callers (one entry per page / variant / short link), and the TTL plus the
/// sweep bound memory over time. An expired value is never returned,
/// regardless of sweep timing.
#[derive(Clone)]
pub struct TtlCache<K, V> {
    entries: Arc<Mutex<HashMap<K, CacheEntry<V>>>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create a cache whose entries live for `ttl` after each `set`
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Store a value, overwriting any existing entry and refreshing its expiry
    pub fn set(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, entry);
        }
    }

    /// Fetch a value, evicting and returning `None` if it has expired
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Remove a single entry regardless of expiry
    pub fn invalidate(&self, key: &K) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of entries currently held, expired or not
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the cache currently holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn a background task sweeping expired entries every `interval`
    ///
    /// The task runs until `cancel` fires. Callers own the returned handle;
    /// dropping it detaches the task but the token still stops it.
    pub fn spawn_sweeper(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; skip it so the initial
            // sweep happens one full interval after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let cleaned = cache.sweep();
                        if cleaned > 0 {
                            tracing::debug!(cleaned, "Swept expired cache entries");
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}

/// Opaque-id-to-URL mapping with TTL
///
/// `insert` generates a random 8-character id for a URL; `resolve` returns
/// the URL until the entry expires.
#[derive(Clone)]
pub struct ShortLinkCache {
    links: TtlCache<String, String>,
}

impl ShortLinkCache {
    /// Create a short-link cache whose mappings live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            links: TtlCache::new(ttl),
        }
    }

    /// Create a short-link cache from its config section
    pub fn from_config(config: &crate::config::LinkCacheConfig) -> Self {
        Self::new(config.ttl)
    }

    /// Store a URL and return its generated opaque id
    pub fn insert(&self, url: impl Into<String>) -> String {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SHORT_ID_LEN)
            .map(char::from)
            .collect();
        self.links.set(id.clone(), url.into());
        id
    }

    /// Look up the URL behind an opaque id, if it has not expired
    pub fn resolve(&self, id: &str) -> Option<String> {
        self.links.get(&id.to_string())
    }

    /// Number of live mappings (for observability)
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether no mappings are held
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Spawn the background sweep task for this cache
    pub fn spawn_sweeper(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        self.links.spawn_sweeper(interval, cancel)
    }
}
