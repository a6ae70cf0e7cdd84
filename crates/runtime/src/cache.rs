use conduit_common::config::CacheConfig;
use conduit_common::RowSet;
use moka::future::Cache;
use moka::Expiry;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Clone)]
struct CachedRows {
    rows: Arc<RowSet>,
    ttl: Duration,
}

/// Expires each entry after its own TTL, restarting the clock on overwrite.
struct PerEntryTtl;

impl Expiry<String, CachedRows> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedRows,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedRows,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Hit and miss counters since the cache was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
}

impl CacheStats {
    pub fn to_json(&self) -> serde_json::Value {
        json!({ "hits": self.hits, "misses": self.misses, "entries": self.entries })
    }
}

/// Process-wide store of normalized results keyed by fingerprint.
///
/// Entries are shared as `Arc<RowSet>` and never mutated. Capacity is an entry
/// count; the least recently used entries go first once it is reached.
pub struct ResultCache {
    cache: Cache<String, CachedRows>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    closed: AtomicBool,
}

impl ResultCache {
    pub fn new(max_entries: u64, default_ttl: Duration) -> Self {
        info!(
            target: "cache",
            max_entries,
            default_ttl_secs = default_ttl.as_secs(),
            "Initializing result cache"
        );

        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .eviction_listener(|key: Arc<String>, _value, cause| {
                debug!(target: "cache", key_len = key.len(), cause = ?cause, "Evicting cache entry");
            })
            .build();

        Self {
            cache,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, config.default_ttl())
    }

    /// TTL applied when a request enables caching without choosing one.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub async fn get(&self, key: &str) -> Option<Arc<RowSet>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        match self.cache.get(key).await {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.rows)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `rows` under `key` for `ttl`. A later `set` on the same key wins.
    pub async fn set(&self, key: impl Into<String>, rows: Arc<RowSet>, ttl: Duration) {
        if self.closed.load(Ordering::Acquire) || ttl.is_zero() {
            return;
        }
        self.cache.insert(key.into(), CachedRows { rows, ttl }).await;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.entry_count(),
        }
    }

    /// Drop every entry and stop accepting new ones.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        let stats = self.stats();
        info!(target: "cache", hits = stats.hits, misses = stats.misses, "Result cache shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_common::ScalarValue;

    fn rows(value: i64) -> Arc<RowSet> {
        let mut set = RowSet::new(vec!["v".to_string()]);
        set.push_row(vec![ScalarValue::Int(value)]).unwrap();
        Arc::new(set)
    }

    #[tokio::test]
    async fn test_round_trip_shares_the_same_rows() {
        let cache = ResultCache::new(100, Duration::from_secs(60));
        let stored = rows(1);
        cache.set("k", stored.clone(), Duration::from_secs(60)).await;

        let fetched = cache.get("k").await.unwrap();
        assert!(Arc::ptr_eq(&stored, &fetched));
        assert!(cache.get("other").await.is_none());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_entries_expire_individually() {
        let cache = ResultCache::new(100, Duration::from_secs(60));
        cache.set("short", rows(1), Duration::from_millis(50)).await;
        cache.set("long", rows(2), Duration::from_secs(60)).await;

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(cache.get("short").await.is_none());
        assert!(cache.get("long").await.is_some());
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let cache = ResultCache::new(100, Duration::from_secs(60));
        cache.set("k", rows(1), Duration::from_secs(60)).await;
        cache.set("k", rows(2), Duration::from_secs(60)).await;

        let fetched = cache.get("k").await.unwrap();
        assert_eq!(fetched.row(0).unwrap().get("v"), Some(&ScalarValue::Int(2)));
    }

    #[tokio::test]
    async fn test_shutdown_drops_entries() {
        let cache = ResultCache::new(100, Duration::from_secs(60));
        cache.set("k", rows(1), Duration::from_secs(60)).await;
        cache.shutdown().await;

        assert!(cache.get("k").await.is_none());
        cache.set("k", rows(1), Duration::from_secs(60)).await;
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_from_config_uses_default_minutes() {
        let cache = ResultCache::from_config(&CacheConfig::default());
        assert_eq!(cache.default_ttl(), Duration::from_secs(5 * 60));
    }
}
