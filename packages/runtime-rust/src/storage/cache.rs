//! Shared in-memory read cache.
//!
//! Entries are bounded by count and by estimated byte size, evicted in
//! least-recently-used order, and expire after a fixed TTL regardless of
//! how recently they were read. Values are stored type-erased, so a single
//! cache serves every resource's item and page types.
//!
//! Every operation is best-effort: a disabled cache, a value that cannot be
//! sized, or one that would not fit never turns into an error.

use std::any::Any;
use std::io;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::config::CacheConfig;

/// Size assumed for values that fail to serialize.
pub const FALLBACK_ENTRY_SIZE: usize = 1024;

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Estimated bytes held by live entries.
    pub current_size: usize,
    pub entry_count: usize,
    /// `hits / (hits + misses)`, or 0 before any lookup.
    pub hit_rate: f64,
}

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    size: usize,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

struct CacheState {
    entries: LruCache<String, CacheEntry>,
    current_size: usize,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn remove(&mut self, key: &str) -> bool {
        match self.entries.pop(key) {
            Some(entry) => {
                self.current_size -= entry.size;
                true
            }
            None => false,
        }
    }

    fn miss(&mut self) {
        self.misses += 1;
        metrics::counter!("strata_cache_misses_total").increment(1);
    }
}

/// LRU + TTL cache keyed by string.
pub struct Cache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl Cache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                current_size: 0,
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// A cache that ignores every operation.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(CacheConfig::disabled())
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.config.key_prefix)
    }

    /// Returns a clone of the live value under `key`.
    ///
    /// Expired entries are dropped on access. A value stored with a
    /// different type than `T` counts as a miss.
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        if !self.config.enabled {
            return None;
        }

        let key = self.full_key(key);
        let mut state = self.state.lock();
        let expired = match state.entries.peek(&key) {
            Some(entry) => entry.is_expired(Instant::now()),
            None => {
                state.miss();
                return None;
            }
        };
        if expired {
            state.remove(&key);
            state.miss();
            return None;
        }

        let value = state
            .entries
            .get(&key)
            .and_then(|entry| entry.value.downcast_ref::<T>().cloned());
        match value {
            Some(_) => {
                state.hits += 1;
                metrics::counter!("strata_cache_hits_total").increment(1);
            }
            None => state.miss(),
        }
        value
    }

    /// Whether a live entry exists under `key`. Does not touch recency or
    /// the hit counters.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        let key = self.full_key(key);
        self.state
            .lock()
            .entries
            .peek(&key)
            .is_some_and(|entry| !entry.is_expired(Instant::now()))
    }

    /// Stores `value` under `key`, replacing any previous value and
    /// evicting least-recently-used entries until both limits hold.
    ///
    /// A value larger than the byte limit on its own is not stored, and
    /// the previous value under `key` is dropped.
    pub fn set<T>(&self, key: &str, value: T)
    where
        T: Serialize + Send + Sync + 'static,
    {
        if !self.config.enabled {
            return;
        }

        let size = estimate_size(&value);
        let key = self.full_key(key);
        let mut state = self.state.lock();
        state.remove(&key);

        let max_bytes = self.config.max_size_bytes;
        if max_bytes > 0 && size > max_bytes {
            debug!(key = %key, size, max_bytes, "value exceeds cache size limit, not cached");
            return;
        }

        let entry = CacheEntry {
            value: Arc::new(value),
            size,
            expires_at: self.config.ttl().map(|ttl| Instant::now() + ttl),
        };
        state.entries.put(key, entry);
        state.current_size += size;

        let max_entries = self.config.max_entries;
        let mut evicted = 0u64;
        while (max_entries > 0 && state.entries.len() > max_entries)
            || (max_bytes > 0 && state.current_size > max_bytes)
        {
            let Some((evicted_key, entry)) = state.entries.pop_lru() else {
                break;
            };
            state.current_size -= entry.size;
            evicted += 1;
            debug!(key = %evicted_key, size = entry.size, "evicted cache entry");
        }
        if evicted > 0 {
            metrics::counter!("strata_cache_evictions_total").increment(evicted);
        }
    }

    /// Removes the entry under `key`. Returns whether one existed.
    pub fn delete(&self, key: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        let key = self.full_key(key);
        self.state.lock().remove(&key)
    }

    /// Removes every entry whose key contains `pattern`. Returns how many
    /// were removed.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        if !self.config.enabled {
            return 0;
        }
        let mut state = self.state.lock();
        let matching: Vec<String> = state
            .entries
            .iter()
            .filter(|(key, _)| key.contains(pattern))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &matching {
            state.remove(key);
        }
        if !matching.is_empty() {
            debug!(pattern, removed = matching.len(), "invalidated cache entries");
        }
        matching.len()
    }

    /// Drops every entry. Counters are kept.
    pub fn clear(&self) {
        if !self.config.enabled {
            return;
        }
        let mut state = self.state.lock();
        state.entries.clear();
        state.current_size = 0;
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let lookups = state.hits + state.misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            state.hits as f64 / lookups as f64
        };
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            current_size: state.current_size,
            entry_count: state.entries.len(),
            hit_rate,
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Counts serialized bytes without buffering them.
struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Estimated in-memory footprint of `value`: its JSON length, or
/// [`FALLBACK_ENTRY_SIZE`] when it cannot be serialized.
pub fn estimate_size<T: Serialize + ?Sized>(value: &T) -> usize {
    let mut counter = ByteCounter(0);
    match serde_json::to_writer(&mut counter, value) {
        Ok(()) => counter.0,
        Err(_) => FALLBACK_ENTRY_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;

    fn config(max_entries: usize, max_size_bytes: usize, ttl_ms: u64) -> CacheConfig {
        CacheConfig {
            enabled: true,
            max_entries,
            max_size_bytes,
            ttl_ms,
            key_prefix: String::new(),
        }
    }

    #[test]
    fn set_then_get_returns_value() {
        let cache = Cache::default();
        cache.set("todo:1", "v".to_string());
        assert_eq!(cache.get::<String>("todo:1").as_deref(), Some("v"));
        assert!(cache.contains("todo:1"));
    }

    #[test]
    fn set_replaces_previous_value() {
        let cache = Cache::default();
        cache.set("k", 1i64);
        cache.set("k", 2i64);
        assert_eq!(cache.get::<i64>("k"), Some(2));
        assert_eq!(cache.stats().entry_count, 1);
        assert_eq!(cache.stats().current_size, 1);
    }

    #[test]
    fn wrong_type_is_a_miss() {
        let cache = Cache::default();
        cache.set("k", 7i64);
        assert_eq!(cache.get::<String>("k"), None);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (0, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = Cache::new(config(10, 0, 100));
        cache.set("k", "v".to_string());
        assert_eq!(cache.get::<String>("k").as_deref(), Some("v"));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(cache.get::<String>("k"), None);
        assert!(!cache.contains("k"));
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recent_reads_do_not_extend_ttl() {
        let cache = Cache::new(config(10, 0, 100));
        cache.set("k", 1i64);
        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(cache.get::<i64>("k"), Some(1));
        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(cache.get::<i64>("k"), None);
    }

    #[test]
    fn evicts_least_recently_used_by_count() {
        let cache = Cache::new(config(2, 0, 0));
        cache.set("a", 1i64);
        cache.set("b", 2i64);
        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get::<i64>("a"), Some(1));
        cache.set("c", 3i64);

        assert_eq!(cache.get::<i64>("a"), Some(1));
        assert_eq!(cache.get::<i64>("b"), None);
        assert_eq!(cache.get::<i64>("c"), Some(3));
    }

    #[test]
    fn evicts_by_byte_size() {
        // "aaaa" serializes to 6 bytes.
        let cache = Cache::new(config(0, 12, 0));
        cache.set("one", "aaaa".to_string());
        cache.set("two", "bbbb".to_string());
        assert_eq!(cache.stats().current_size, 12);

        cache.set("three", "cccc".to_string());
        assert!(!cache.contains("one"));
        assert!(cache.contains("two"));
        assert!(cache.contains("three"));
        assert_eq!(cache.stats().current_size, 12);
    }

    #[test]
    fn oversize_value_is_skipped_and_drops_old_value() {
        let cache = Cache::new(config(0, 8, 0));
        cache.set("small", 1i64);
        cache.set("k", 1i64);
        cache.set("k", "much too long for the cache".to_string());
        assert!(!cache.contains("k"));
        assert!(cache.contains("small"));
    }

    #[test]
    fn delete_reports_presence() {
        let cache = Cache::default();
        cache.set("k", true);
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert_eq!(cache.stats().current_size, 0);
    }

    #[test]
    fn invalidate_pattern_removes_substring_matches() {
        let cache = Cache::default();
        cache.set("default/Todo:list:abc", 1i64);
        cache.set("default/Todo:list:index:def", 2i64);
        cache.set("default/Todo:get:123", 3i64);
        cache.set("default/Note:list:abc", 4i64);

        assert_eq!(cache.invalidate_pattern("default/Todo:list"), 2);
        assert!(cache.contains("default/Todo:get:123"));
        assert!(cache.contains("default/Note:list:abc"));
        assert_eq!(cache.stats().entry_count, 2);
    }

    #[test]
    fn key_prefix_is_applied_transparently() {
        let cache = Cache::new(CacheConfig {
            key_prefix: "svc:".to_string(),
            ..CacheConfig::default()
        });
        cache.set("k", 1i64);
        assert_eq!(cache.get::<i64>("k"), Some(1));
        assert_eq!(cache.invalidate_pattern("svc:k"), 1);
    }

    #[test]
    fn disabled_cache_is_a_no_op() {
        let cache = Cache::disabled();
        assert!(!cache.is_enabled());
        cache.set("k", 1i64);
        assert_eq!(cache.get::<i64>("k"), None);
        assert!(!cache.delete("k"));
        assert_eq!(cache.invalidate_pattern("k"), 0);
        cache.clear();
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entry_count), (0, 0, 0));
    }

    #[test]
    fn stats_track_hit_rate() {
        let cache = Cache::default();
        assert!(cache.stats().hit_rate.abs() < f64::EPSILON);
        cache.set("k", 1i64);
        cache.get::<i64>("k");
        cache.get::<i64>("k");
        cache.get::<i64>("k");
        cache.get::<i64>("missing");
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (3, 1));
        assert!((stats.hit_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn clear_keeps_counters() {
        let cache = Cache::default();
        cache.set("k", 1i64);
        cache.get::<i64>("k");
        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.current_size, 0);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn unserializable_values_use_fallback_size() {
        // Non-string map keys cannot be serialized to JSON.
        let mut value = HashMap::new();
        value.insert(vec![1u8], 1u8);
        assert_eq!(estimate_size(&value), FALLBACK_ENTRY_SIZE);
        assert_eq!(estimate_size("abc"), 5);
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn limits_hold_after_every_write(
                writes in proptest::collection::vec((0u8..20, 0usize..40), 1..60),
                max_entries in 1usize..8,
                max_size_bytes in 8usize..120,
            ) {
                let cache = Cache::new(config(max_entries, max_size_bytes, 0));
                for (key, len) in writes {
                    cache.set(&format!("k{key}"), "x".repeat(len));
                    let stats = cache.stats();
                    prop_assert!(stats.entry_count <= max_entries);
                    prop_assert!(stats.current_size <= max_size_bytes);
                }
            }

            #[test]
            fn last_write_wins(values in proptest::collection::vec(any::<i64>(), 1..20)) {
                let cache = Cache::default();
                for v in &values {
                    cache.set("k", *v);
                }
                prop_assert_eq!(cache.get::<i64>("k"), values.last().copied());
            }
        }
    }
}
