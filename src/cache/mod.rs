/// Caching layer for connection metadata and query results
///
/// Provides three caches owned by the toolkit:
/// - Schema cache: introspection results with a short TTL
/// - Query cache: read-only result sets keyed by fingerprint, bounded with LRU eviction
/// - Statement cache: normalization hook applied before execution
///
/// Every per-connection entry is keyed `"{connection_id}:..."`, so a whole
/// connection can be invalidated by prefix.
pub mod memory;
pub mod query;
pub mod service;
pub mod statement;

pub use memory::MemoryCache;
pub use query::{QueryCache, QueryCacheConfig, QueryParams};
pub use service::{CacheService, CacheServiceStats, PurgeReport};
pub use statement::PreparedStatementCache;

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Cache key type for consistency across all cache implementations
pub type CacheKey = String;

/// Cache value that can expire
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: Instant,
    pub expires_at: Option<Instant>,
    pub last_access: Instant,
    /// Position in the owning cache's access order; lower is older
    pub access_seq: u64,
    pub hits: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Option<Duration>, access_seq: u64) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            expires_at: ttl.map(|ttl| now + ttl),
            last_access: now,
            access_seq,
            hits: 0,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|expires_at| Instant::now() >= expires_at)
            .unwrap_or(false)
    }

    pub fn mark_accessed(&mut self, access_seq: u64) {
        self.hits += 1;
        self.last_access = Instant::now();
        self.access_seq = access_seq;
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries (None = unbounded)
    pub max_entries: Option<usize>,
    /// TTL applied when `set` is called without one (None = no expiration)
    pub default_ttl: Option<Duration>,
    /// Enable cache statistics collection
    pub enable_stats: bool,
}

impl CacheConfig {
    /// Unbounded cache with a default TTL
    pub fn unbounded(default_ttl: Duration) -> Self {
        Self {
            max_entries: None,
            default_ttl: Some(default_ttl),
            enable_stats: true,
        }
    }

    /// Bounded cache with a default TTL
    pub fn bounded(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            max_entries: Some(max_entries),
            default_ttl: Some(default_ttl),
            enable_stats: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::unbounded(Duration::from_secs(300))
    }
}

/// Cache statistics for monitoring and debugging
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    /// 0 when unbounded
    pub max_entries: u64,
    pub evictions: u64,
    pub expired_cleanups: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn utilization(&self) -> f64 {
        if self.max_entries == 0 {
            0.0
        } else {
            self.entries as f64 / self.max_entries as f64
        }
    }
}

/// Generic key/value cache with TTL and connection namespaces
pub trait Cache<T: Clone>: Send + Sync {
    /// Get a live value; an expired entry is removed and reported absent
    fn get(&self, key: &str) -> Option<T>;

    /// Store a value with optional TTL (falls back to the default TTL)
    fn set(&self, key: CacheKey, value: T, ttl: Option<Duration>);

    /// Remove a value, returning whether it existed
    fn delete(&self, key: &str) -> bool;

    /// Clear all entries from the cache
    fn clear(&self);

    /// Keys of all live entries
    fn keys(&self) -> Vec<CacheKey>;

    /// Remove every entry keyed under `"{connection_id}:"`
    fn invalidate_connection(&self, connection_id: &str) -> usize;

    /// Remove expired entries, returning how many were removed
    fn cleanup_expired(&self) -> usize;

    /// Get the number of stored entries (expired ones included until cleaned)
    fn len(&self) -> usize;

    /// Check if the cache is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    fn stats(&self) -> CacheStats;
}

/// Key prefix shared by every entry of one connection.
///
/// `\` and `:` inside the id are escaped, so the first unescaped `:` always
/// ends the id and `"prod"` never matches the entries of `"prod:replica"`.
pub fn connection_prefix(connection_id: &str) -> String {
    let mut prefix = String::with_capacity(connection_id.len() + 1);
    for c in connection_id.chars() {
        if c == '\\' || c == ':' {
            prefix.push('\\');
        }
        prefix.push(c);
    }
    prefix.push(':');
    prefix
}

/// Key of one entry in a connection's namespace
pub fn connection_key(connection_id: &str, suffix: &str) -> CacheKey {
    format!("{}{}", connection_prefix(connection_id), suffix)
}
