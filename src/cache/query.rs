use super::memory::MemoryCache;
/// Query result caching with connection-scoped invalidation
///
/// Features:
/// - Fingerprints over whitespace-normalized text and sorted parameters
/// - Only successful, read-only, reasonably sized results are stored
/// - Bounded capacity with batch LRU eviction
/// - Invalidation of every result of one connection, fenced by an epoch so a
///   read that started before a write cannot store its pre-write rows
use super::{connection_key, Cache, CacheConfig, CacheKey, CacheStats};
use crate::database::statement::{is_cacheable_select, normalize_whitespace};
use crate::database::QueryOutcome;
use dashmap::DashMap;
use log::debug;
use md5::{Digest, Md5};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Named query parameters; the ordered map gives a stable fingerprint
pub type QueryParams = BTreeMap<String, Value>;

/// Query cache configuration
#[derive(Debug, Clone)]
pub struct QueryCacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
    /// Larger result sets are never cached
    pub max_rows: usize,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            max_entries: 1000,
            max_rows: 1000,
        }
    }
}

/// Cache of read-only query results
pub struct QueryCache {
    cache: MemoryCache<QueryOutcome>,
    config: QueryCacheConfig,
    /// Bumped on every invalidation of a connection
    epochs: DashMap<String, u64>,
}

impl QueryCache {
    /// Create new query cache with default configuration
    pub fn new() -> Self {
        Self::with_config(QueryCacheConfig::default())
    }

    /// Create new query cache with custom configuration
    pub fn with_config(config: QueryCacheConfig) -> Self {
        let cache = MemoryCache::with_config(CacheConfig::bounded(config.max_entries, config.ttl));
        Self {
            cache,
            config,
            epochs: DashMap::new(),
        }
    }

    pub fn config(&self) -> &QueryCacheConfig {
        &self.config
    }

    /// Positional parameters keyed by their index
    pub fn positional(params: &[Value]) -> QueryParams {
        params
            .iter()
            .enumerate()
            .map(|(i, value)| (i.to_string(), value.clone()))
            .collect()
    }

    /// Cache key for a query: `"{connection_id}:{md5}"`
    ///
    /// Queries differing only in whitespace share a fingerprint; the
    /// connection id is part of the hashed input as well as the prefix.
    pub fn fingerprint(connection_id: &str, query: &str, params: &QueryParams) -> CacheKey {
        let normalized = normalize_whitespace(query);
        let params_str = if params.is_empty() {
            String::new()
        } else {
            serde_json::to_string(params).unwrap_or_default()
        };

        let digest = Md5::digest(format!("{}:{}:{}", connection_id, normalized, params_str).as_bytes());
        connection_key(connection_id, &format!("{:x}", digest))
    }

    /// Whether an outcome qualifies for caching
    fn is_cacheable(&self, query: &str, outcome: &QueryOutcome) -> bool {
        outcome.success && is_cacheable_select(query) && outcome.rows.len() <= self.config.max_rows
    }

    /// Store a result. Returns false when it does not qualify.
    pub fn set_result(
        &self,
        connection_id: &str,
        query: &str,
        params: &QueryParams,
        outcome: &QueryOutcome,
    ) -> bool {
        if !self.is_cacheable(query, outcome) {
            debug!("Query result for '{}' not cacheable", connection_id);
            return false;
        }

        let key = Self::fingerprint(connection_id, query, params);
        self.cache.set(key, outcome.clone(), None);
        true
    }

    /// Current invalidation epoch of a connection
    pub fn epoch(&self, connection_id: &str) -> u64 {
        self.epochs
            .get(connection_id)
            .map(|epoch| *epoch.value())
            .unwrap_or(0)
    }

    /// Store a result computed after observing `epoch`.
    ///
    /// Skipped when the connection was invalidated since. The epoch is
    /// checked again after the insert: an invalidation racing with it bumps
    /// the epoch before sweeping, so either the sweep or this check removes
    /// the entry.
    pub fn set_result_at(
        &self,
        connection_id: &str,
        query: &str,
        params: &QueryParams,
        outcome: &QueryOutcome,
        epoch: u64,
    ) -> bool {
        if self.epoch(connection_id) != epoch {
            debug!("Query result for '{}' predates an invalidation", connection_id);
            return false;
        }
        if !self.set_result(connection_id, query, params, outcome) {
            return false;
        }
        if self.epoch(connection_id) != epoch {
            self.cache
                .delete(&Self::fingerprint(connection_id, query, params));
            return false;
        }
        true
    }

    pub fn get_result(
        &self,
        connection_id: &str,
        query: &str,
        params: &QueryParams,
    ) -> Option<QueryOutcome> {
        self.cache.get(&Self::fingerprint(connection_id, query, params))
    }

    pub fn invalidate_connection(&self, connection_id: &str) -> usize {
        *self.epochs.entry(connection_id.to_string()).or_insert(0) += 1;
        self.cache.invalidate_connection(connection_id)
    }

    pub fn cleanup_expired(&self) -> usize {
        self.cache.cleanup_expired()
    }

    pub fn clear(&self) {
        self.cache.clear()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}
