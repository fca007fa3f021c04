/// In-memory cache implementation with LRU eviction and TTL support
///
/// Features:
/// - Thread-safe with RwLock
/// - Batch LRU eviction (oldest fifth) when a bounded cache is full
/// - TTL support with lazy expiration on lookup
/// - Connection-scoped invalidation by key prefix
use super::{connection_prefix, Cache, CacheConfig, CacheEntry, CacheKey, CacheStats};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::Duration;

/// Thread-safe in-memory cache
///
/// Entries are ordered for eviction by an access sequence number drawn from
/// a per-cache counter, so two entries touched within the same clock tick
/// still have a strict order.
pub struct MemoryCache<T: Clone> {
    data: Arc<RwLock<HashMap<CacheKey, CacheEntry<T>>>>,
    config: CacheConfig,
    stats: Arc<RwLock<CacheStats>>,
    access_seq: Arc<AtomicU64>,
}

impl<T: Clone> MemoryCache<T> {
    /// Create an unbounded cache with the default TTL
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Create a new memory cache with custom configuration
    pub fn with_config(config: CacheConfig) -> Self {
        let stats = CacheStats {
            max_entries: config.max_entries.unwrap_or(0) as u64,
            ..Default::default()
        };

        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            config,
            stats: Arc::new(RwLock::new(stats)),
            access_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a bounded cache
    pub fn with_capacity(max_entries: usize, default_ttl: Duration) -> Self {
        Self::with_config(CacheConfig::bounded(max_entries, default_ttl))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn next_seq(&self) -> u64 {
        self.access_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn write_data(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, CacheEntry<T>>> {
        self.data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record<F: FnOnce(&mut CacheStats)>(&self, update: F) {
        if self.config.enable_stats {
            if let Ok(mut stats) = self.stats.write() {
                update(&mut stats);
            }
        }
    }

    /// Evict the oldest fifth of the entries (at least one) by access order
    fn evict_oldest(&self, data: &mut HashMap<CacheKey, CacheEntry<T>>, max_entries: usize) {
        let count = (max_entries / 5).max(1).min(data.len());
        if count == 0 {
            return;
        }

        let mut order: Vec<(u64, CacheKey)> = data
            .iter()
            .map(|(key, entry)| (entry.access_seq, key.clone()))
            .collect();
        order.sort_unstable();

        for (_, key) in order.into_iter().take(count) {
            data.remove(&key);
            debug!("Evicted LRU cache entry: {}", key);
        }

        self.record(|stats| stats.evictions += count as u64);
        debug!("Evicted {} cache entries at capacity {}", count, max_entries);
    }

    /// Look at an entry without touching its access order (internal use)
    pub fn peek(&self, key: &str) -> Option<T> {
        let data = self.data.read().ok()?;
        data.get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone())
    }
}

impl<T: Clone + Send + Sync> Cache<T> for MemoryCache<T> {
    fn get(&self, key: &str) -> Option<T> {
        let mut data = self.write_data();

        let expired = match data.get(key) {
            Some(entry) => entry.is_expired(),
            None => {
                self.record(|stats| stats.misses += 1);
                return None;
            }
        };

        if expired {
            data.remove(key);
            self.record(|stats| {
                stats.misses += 1;
                stats.expired_cleanups += 1;
            });
            debug!("Cache entry '{}' is expired", key);
            return None;
        }

        let seq = self.next_seq();
        let entry = data.get_mut(key)?;
        entry.mark_accessed(seq);
        self.record(|stats| stats.hits += 1);
        Some(entry.value.clone())
    }

    fn set(&self, key: CacheKey, value: T, ttl: Option<Duration>) {
        let ttl = ttl.or(self.config.default_ttl);
        let seq = self.next_seq();
        let mut data = self.write_data();

        if let Some(max_entries) = self.config.max_entries {
            if max_entries == 0 {
                return;
            }
            if !data.contains_key(&key) && data.len() >= max_entries {
                self.evict_oldest(&mut data, max_entries);
            }
        }

        data.insert(key.clone(), CacheEntry::new(value, ttl, seq));
        debug!("Cached entry '{}' (TTL: {:?})", key, ttl);
    }

    fn delete(&self, key: &str) -> bool {
        let removed = self.write_data().remove(key).is_some();
        if removed {
            debug!("Removed cache entry '{}'", key);
        }
        removed
    }

    fn clear(&self) {
        let mut data = self.write_data();
        let count = data.len();
        data.clear();
        info!("Cleared cache ({} entries)", count);
    }

    fn keys(&self) -> Vec<CacheKey> {
        match self.data.read() {
            Ok(data) => data
                .iter()
                .filter(|(_, entry)| !entry.is_expired())
                .map(|(key, _)| key.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn invalidate_connection(&self, connection_id: &str) -> usize {
        let prefix = connection_prefix(connection_id);
        let mut data = self.write_data();
        let before = data.len();
        data.retain(|key, _| !key.starts_with(&prefix));
        let removed = before - data.len();

        if removed > 0 {
            debug!("Invalidated {} cache entries for '{}'", removed, connection_id);
        }
        removed
    }

    fn cleanup_expired(&self) -> usize {
        let mut data = self.write_data();
        let before = data.len();
        data.retain(|_, entry| !entry.is_expired());
        let count = before - data.len();

        if count > 0 {
            self.record(|stats| stats.expired_cleanups += count as u64);
            debug!("Cleaned up {} expired cache entries", count);
        }
        count
    }

    fn len(&self) -> usize {
        self.data.read().map(|data| data.len()).unwrap_or(0)
    }

    fn stats(&self) -> CacheStats {
        let mut stats = self
            .stats
            .read()
            .map(|stats| stats.clone())
            .unwrap_or_default();
        stats.entries = self.len() as u64;
        stats
    }
}

impl<T: Clone> Default for MemoryCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for MemoryCache<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
            access_seq: Arc::clone(&self.access_seq),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::connection_key;
    use std::thread;

    fn key(s: &str) -> CacheKey {
        s.to_string()
    }

    #[test]
    fn test_basic_cache_operations() {
        let cache: MemoryCache<String> = MemoryCache::new();

        cache.set(key("c1:a"), "value1".to_string(), None);
        assert_eq!(cache.get("c1:a"), Some("value1".to_string()));
        assert_eq!(cache.keys(), vec![key("c1:a")]);

        assert!(cache.delete("c1:a"));
        assert!(!cache.delete("c1:a"));
        assert_eq!(cache.get("c1:a"), None);
    }

    #[test]
    fn test_expired_lookup_removes_entry() {
        let cache: MemoryCache<u32> = MemoryCache::new();
        cache.set(key("c1:a"), 1, Some(Duration::from_millis(20)));
        cache.set(key("c1:b"), 2, None);

        thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.get("c1:a"), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("c1:b"), Some(2));
        assert_eq!(cache.stats().expired_cleanups, 1);
    }

    #[test]
    fn test_evicts_oldest_fifth_at_capacity() {
        let cache: MemoryCache<u32> = MemoryCache::with_capacity(10, Duration::from_secs(60));
        for i in 0..10 {
            cache.set(format!("c1:{}", i), i, None);
        }
        // touch the two oldest so they survive
        assert_eq!(cache.get("c1:0"), Some(0));
        assert_eq!(cache.get("c1:1"), Some(1));

        cache.set(key("c1:new"), 99, None);

        assert_eq!(cache.len(), 9);
        assert_eq!(cache.peek("c1:2"), None);
        assert_eq!(cache.peek("c1:3"), None);
        assert_eq!(cache.peek("c1:0"), Some(0));
        assert_eq!(cache.peek("c1:new"), Some(99));
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn test_small_capacity_evicts_at_least_one() {
        let cache: MemoryCache<u32> = MemoryCache::with_capacity(2, Duration::from_secs(60));
        cache.set(key("a"), 1, None);
        cache.set(key("b"), 2, None);
        cache.set(key("c"), 3, None);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek("a"), None);
    }

    #[test]
    fn test_replacing_key_does_not_evict() {
        let cache: MemoryCache<u32> = MemoryCache::with_capacity(2, Duration::from_secs(60));
        cache.set(key("a"), 1, None);
        cache.set(key("b"), 2, None);
        cache.set(key("a"), 3, None);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek("a"), Some(3));
        assert_eq!(cache.peek("b"), Some(2));
    }

    #[test]
    fn test_invalidate_connection_is_prefix_exact() {
        let cache: MemoryCache<u32> = MemoryCache::new();
        cache.set(key("c1:schemas"), 1, None);
        cache.set(key("c1:tables:public"), 2, None);
        cache.set(key("c10:schemas"), 3, None);

        assert_eq!(cache.invalidate_connection("c1"), 2);
        assert_eq!(cache.keys(), vec![key("c10:schemas")]);
    }

    #[test]
    fn test_invalidate_connection_with_separator_in_id() {
        let cache: MemoryCache<u32> = MemoryCache::new();
        cache.set(connection_key("prod", "schemas"), 1, None);
        cache.set(connection_key("prod:replica", "schemas"), 2, None);
        cache.set(connection_key("prod:replica", "tables:"), 3, None);

        assert_eq!(cache.invalidate_connection("prod"), 1);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.invalidate_connection("prod:replica"), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_statistics() {
        let cache: MemoryCache<String> = MemoryCache::new();
        cache.set(key("k1"), "value1".to_string(), None);
        cache.get("k1");
        cache.get("k2");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_thread_safety() {
        let cache: MemoryCache<String> = MemoryCache::with_capacity(50, Duration::from_secs(60));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        cache.set(format!("t{}:{}", t, i), format!("v{}", i), None);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 50);
    }
}
