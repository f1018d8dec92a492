//! TTL + LRU memoization for expensive spatial queries.
//!
//! Keys are built from lexicographically sorted parameter names, so
//! identical logical queries collide regardless of property insertion
//! order. Entries expire after their TTL (lazily on the read that
//! discovers them, and periodically via an optional cleanup task);
//! when the cache is still over capacity after an expiry purge, the
//! least-recently-accessed entries go first.

use lru::LruCache;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::time::Instant;

/// Build a cache key from a prefix and a parameter object. Parameter
/// names are sorted, so `{a:1,b:2}` and `{b:2,a:1}` produce the same
/// key.
pub fn generate_key(prefix: &str, params: &serde_json::Map<String, serde_json::Value>) -> String {
    let sorted: BTreeMap<&String, &serde_json::Value> = params.iter().collect();
    let pairs: Vec<String> = sorted
        .into_iter()
        .map(|(name, value)| format!("{name}:{value}"))
        .collect();
    format!("{prefix}:{}", pairs.join("|"))
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    pub max_entries: usize,
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_entries: 100,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    created: Instant,
    ttl: Duration,
    hits: u64,
    last_access: Instant,
}

impl<V> Entry<V> {
    fn expired(&self) -> bool {
        self.created.elapsed() > self.ttl
    }
}

/// Aggregate cache statistics. Ages are measured from entry creation.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hit_rate: f64,
    pub avg_hits_per_entry: f64,
    pub oldest_age: Option<Duration>,
    pub newest_age: Option<Duration>,
}

struct CacheState<V> {
    entries: LruCache<String, Entry<V>>,
    hits: u64,
    misses: u64,
}

struct CacheInner<V> {
    config: CacheConfig,
    state: Mutex<CacheState<V>>,
    cleanup: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Shared-handle TTL+LRU cache. Cloning is cheap; all clones see the
/// same entries.
pub struct QueryCache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for QueryCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V: Clone + Send + 'static> QueryCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                config,
                state: Mutex::new(CacheState {
                    entries: LruCache::unbounded(),
                    hits: 0,
                    misses: 0,
                }),
                cleanup: Mutex::new(None),
            }),
        }
    }

    /// Store a value with the given TTL (the configured default when
    /// `None`). Runs an expiry purge first when at capacity, then
    /// evicts least-recently-accessed entries until under the limit.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let ttl = ttl.unwrap_or(self.inner.config.default_ttl);
        let mut state = self.lock_state();
        if state.entries.len() >= self.inner.config.max_entries {
            purge_expired(&mut state);
            while state.entries.len() >= self.inner.config.max_entries {
                if let Some((evicted, _)) = state.entries.pop_lru() {
                    log::debug!("cache evicting lru entry {evicted}");
                } else {
                    break;
                }
            }
        }
        let now = Instant::now();
        state.entries.put(
            key,
            Entry {
                value,
                created: now,
                ttl,
                hits: 0,
                last_access: now,
            },
        );
    }

    /// Fetch a live entry, bumping its hit count and recency. Expired
    /// entries are evicted on the read that discovers them.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut state = self.lock_state();
        let expired = match state.entries.peek(key) {
            Some(entry) => entry.expired(),
            None => {
                state.misses += 1;
                return None;
            }
        };
        if expired {
            state.entries.pop(key);
            state.misses += 1;
            return None;
        }
        state.hits += 1;
        let entry = state
            .entries
            .get_mut(key)
            .unwrap_or_else(|| unreachable!("entry checked above"));
        entry.hits += 1;
        entry.last_access = Instant::now();
        Some(entry.value.clone())
    }

    /// Remove everything, or only keys matching `pattern` (a regex).
    /// Returns the number of entries removed; an invalid pattern
    /// removes nothing.
    pub fn clear(&self, pattern: Option<&str>) -> usize {
        let mut state = self.lock_state();
        match pattern {
            None => {
                let removed = state.entries.len();
                state.entries.clear();
                removed
            }
            Some(raw) => {
                let Ok(re) = Regex::new(raw) else {
                    log::warn!("cache clear: invalid pattern {raw:?}");
                    return 0;
                };
                let matching: Vec<String> = state
                    .entries
                    .iter()
                    .filter(|(key, _)| re.is_match(key))
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in &matching {
                    state.entries.pop(key);
                }
                matching.len()
            }
        }
    }

    /// Drop expired entries now. Returns how many were removed.
    pub fn purge(&self) -> usize {
        purge_expired(&mut self.lock_state())
    }

    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock_state();
        let lookups = state.hits + state.misses;
        let total_entry_hits: u64 = state.entries.iter().map(|(_, e)| e.hits).sum();
        let oldest = state.entries.iter().map(|(_, e)| e.created.elapsed()).max();
        let newest = state.entries.iter().map(|(_, e)| e.created.elapsed()).min();
        CacheStats {
            size: state.entries.len(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
            avg_hits_per_entry: if state.entries.is_empty() {
                0.0
            } else {
                total_entry_hits as f64 / state.entries.len() as f64
            },
            oldest_age: oldest,
            newest_age: newest,
        }
    }

    /// Spawn the periodic cleanup task. Holds only a weak handle, so
    /// dropping every `QueryCache` clone stops the task on its next
    /// tick.
    pub fn spawn_cleanup(&self) {
        let weak: Weak<CacheInner<V>> = Arc::downgrade(&self.inner);
        let interval = self.inner.config.cleanup_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let removed = purge_expired(
                    &mut inner.state.lock().unwrap_or_else(|e| e.into_inner()),
                );
                if removed > 0 {
                    log::debug!("cache cleanup removed {removed} expired entries");
                }
            }
        });
        let mut slot = self
            .inner
            .cleanup
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Tear down: stop the cleanup task and drop all entries.
    pub fn dispose(&self) {
        if let Some(handle) = self
            .inner
            .cleanup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
        self.clear(None);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CacheState<V>> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn purge_expired<V>(state: &mut CacheState<V>) -> usize {
    let expired: Vec<String> = state
        .entries
        .iter()
        .filter(|(_, entry)| entry.expired())
        .map(|(key, _)| key.clone())
        .collect();
    for key in &expired {
        state.entries.pop(key);
    }
    expired.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn key_generation_is_order_independent() {
        let a = generate_key("f", &params(&[("a", json!(1)), ("b", json!(2))]));
        let b = generate_key("f", &params(&[("b", json!(2)), ("a", json!(1))]));
        assert_eq!(a, b);
        assert_ne!(a, generate_key("g", &params(&[("a", json!(1)), ("b", json!(2))])));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_their_ttl() {
        let cache: QueryCache<i32> = QueryCache::new(CacheConfig::default());
        cache.set("k", 7, Some(Duration::from_millis(10)));
        assert_eq!(cache.get("k"), Some(7));

        tokio::time::advance(Duration::from_millis(11)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_eviction_is_lru_not_insertion_order() {
        let cache: QueryCache<i32> = QueryCache::new(CacheConfig {
            max_entries: 2,
            ..Default::default()
        });
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        // Touch "a" so "b" becomes the least recently used.
        assert_eq!(cache.get("a"), Some(1));

        cache.set("c", 3, None);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn set_purges_expired_before_evicting_live_entries() {
        let cache: QueryCache<i32> = QueryCache::new(CacheConfig {
            max_entries: 2,
            ..Default::default()
        });
        cache.set("stale", 1, Some(Duration::from_millis(5)));
        cache.set("live", 2, None);
        tokio::time::advance(Duration::from_millis(6)).await;

        cache.set("fresh", 3, None);
        assert_eq!(cache.get("live"), Some(2));
        assert_eq!(cache.get("fresh"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn pattern_clear_removes_matching_keys_only() {
        let cache: QueryCache<i32> = QueryCache::new(CacheConfig::default());
        cache.set("measure:a", 1, None);
        cache.set("measure:b", 2, None);
        cache.set("buffer:a", 3, None);

        assert_eq!(cache.clear(Some("^measure:")), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.clear(Some("(unclosed")), 0);
        assert_eq!(cache.clear(None), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_track_hit_rate_and_ages() {
        let cache: QueryCache<i32> = QueryCache::new(CacheConfig::default());
        cache.set("k", 1, None);
        assert_eq!(cache.get("k"), Some(1));
        assert_eq!(cache.get("k"), Some(1));
        assert_eq!(cache.get("missing"), None);

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.avg_hits_per_entry - 2.0).abs() < 1e-9);
        assert!(stats.oldest_age.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_task_purges_in_the_background() {
        let cache: QueryCache<i32> = QueryCache::new(CacheConfig {
            cleanup_interval: Duration::from_secs(60),
            ..Default::default()
        });
        cache.spawn_cleanup();
        // Let the spawned task initialize its `interval` timer before we
        // advance the (paused) clock; otherwise the interval is created
        // lazily after the jump and its first tick lands an interval late.
        tokio::task::yield_now().await;
        cache.set("k", 1, Some(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.len(), 0);
        cache.dispose();
    }
}
