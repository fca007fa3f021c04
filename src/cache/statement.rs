//! Per-connection statement normalization cache
//!
//! Statements are remembered per connection under a short md5 prefix of
//! their text, in a bounded LRU cache shared by all connections. The cached
//! form is currently the input itself; the cache is the place where
//! driver-specific rewriting would plug in.

use super::{connection_key, Cache, CacheConfig, CacheStats, MemoryCache};
use crate::database::DatabaseKind;
use md5::{Digest, Md5};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default bound on remembered statements across all connections
pub const DEFAULT_STATEMENT_CAPACITY: usize = 1000;

/// Cache of prepared statement text, per connection
pub struct PreparedStatementCache {
    /// `"{connection}:{short hash}"` -> (original text, prepared text)
    statements: MemoryCache<(String, String)>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PreparedStatementCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STATEMENT_CAPACITY)
    }

    /// Cache holding at most `max_entries` statements; entries do not expire
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            statements: MemoryCache::with_config(CacheConfig {
                max_entries: Some(max_entries),
                default_ttl: None,
                enable_stats: true,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn statement_key(connection_id: &str, query: &str) -> String {
        let digest = format!("{:x}", Md5::digest(query.as_bytes()));
        connection_key(connection_id, &digest[..8])
    }

    /// Return the prepared form of `query` for `connection_id`.
    ///
    /// Idempotent: preparing the returned text again yields the same text.
    pub fn prepare(&self, connection_id: &str, query: &str, kind: DatabaseKind) -> String {
        let key = Self::statement_key(connection_id, query);

        // the short hash can collide, so the original text must match too
        if let Some((original, prepared)) = self.statements.get(&key) {
            if original == query {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return prepared;
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let prepared = Self::convert(query, kind);
        self.statements
            .set(key, (query.to_string(), prepared.clone()), None);
        prepared
    }

    // every supported driver accepts the statement as written
    fn convert(query: &str, _kind: DatabaseKind) -> String {
        query.to_string()
    }

    pub fn clear_connection(&self, connection_id: &str) -> usize {
        self.statements.invalidate_connection(connection_id)
    }

    pub fn clear(&self) {
        self.statements.clear();
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ..self.statements.stats()
        }
    }
}

impl Default for PreparedStatementCache {
    fn default() -> Self {
        Self::new()
    }
}
