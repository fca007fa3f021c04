//! Owner of the three caches
//!
//! The registry purges a connection here on disconnect, the history janitor
//! drops expired entries here, and the toolkit reads and fills the caches.

use super::{Cache, CacheStats, MemoryCache, PreparedStatementCache, QueryCache};
use crate::cache::query::QueryCacheConfig;
use crate::cache::CacheConfig;
use crate::config::CacheSettings;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Entries removed for one connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub schema_keys_removed: usize,
    pub query_keys_removed: usize,
    pub statements_removed: usize,
}

impl PurgeReport {
    pub fn total(&self) -> usize {
        self.schema_keys_removed + self.query_keys_removed + self.statements_removed
    }
}

/// Statistics of every cache
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheServiceStats {
    pub schema: CacheStats,
    pub query: CacheStats,
    pub statements: CacheStats,
}

pub struct CacheService {
    schema: MemoryCache<Value>,
    query: QueryCache,
    statements: PreparedStatementCache,
    query_cache_enabled: bool,
}

impl CacheService {
    pub fn new(settings: &CacheSettings) -> Self {
        let schema = MemoryCache::with_config(CacheConfig::unbounded(Duration::from_secs(
            settings.schema_ttl_seconds,
        )));
        let query = QueryCache::with_config(QueryCacheConfig {
            ttl: Duration::from_secs(settings.query_ttl_seconds),
            max_entries: settings.query_max_entries,
            max_rows: settings.query_max_rows,
        });

        Self {
            schema,
            query,
            statements: PreparedStatementCache::with_capacity(
                settings.statement_max_entries,
            ),
            query_cache_enabled: settings.query_cache_enabled,
        }
    }

    /// Metadata cache (schemas, tables, columns)
    pub fn schema(&self) -> &MemoryCache<Value> {
        &self.schema
    }

    pub fn query(&self) -> &QueryCache {
        &self.query
    }

    pub fn statements(&self) -> &PreparedStatementCache {
        &self.statements
    }

    /// Whether read results should go through the query cache
    pub fn query_cache_enabled(&self) -> bool {
        self.query_cache_enabled
    }

    /// Drop everything cached for one connection
    pub fn purge_connection(&self, connection_id: &str) -> PurgeReport {
        let report = PurgeReport {
            schema_keys_removed: self.schema.invalidate_connection(connection_id),
            query_keys_removed: self.query.invalidate_connection(connection_id),
            statements_removed: self.statements.clear_connection(connection_id),
        };

        if report.total() > 0 {
            info!(
                "Purged cache for '{}': {} schema, {} query, {} statements",
                connection_id,
                report.schema_keys_removed,
                report.query_keys_removed,
                report.statements_removed
            );
        }
        report
    }

    pub fn clear_all(&self) {
        self.schema.clear();
        self.query.clear();
        self.statements.clear();
    }

    /// Remove expired metadata and query entries; returns the count removed
    pub fn cleanup_expired(&self) -> usize {
        self.schema.cleanup_expired() + self.query.cleanup_expired()
    }

    pub fn stats(&self) -> CacheServiceStats {
        CacheServiceStats {
            schema: self.schema.stats(),
            query: self.query.stats(),
            statements: self.statements.stats(),
        }
    }
}

impl Default for CacheService {
    fn default() -> Self {
        Self::new(&CacheSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryParams;
    use crate::database::{DatabaseKind, QueryOutcome};
    use serde_json::json;

    #[test]
    fn test_purge_connection() {
        let caches = CacheService::default();
        caches.schema().set("c1:schemas".into(), json!(["public"]), None);
        caches.schema().set("c2:schemas".into(), json!(["main"]), None);
        caches.query().set_result(
            "c1",
            "SELECT 1",
            &QueryParams::new(),
            &QueryOutcome::rows(vec!["x".into()], vec![vec![json!(1)]]),
        );
        caches.statements().prepare("c1", "SELECT 1", DatabaseKind::Sqlite);

        let report = caches.purge_connection("c1");
        assert_eq!(report.schema_keys_removed, 1);
        assert_eq!(report.query_keys_removed, 1);
        assert_eq!(report.statements_removed, 1);

        assert!(caches.schema().get("c2:schemas").is_some());
        assert_eq!(caches.purge_connection("c1").total(), 0);
    }

    #[test]
    fn test_cleanup_expired_counts_both_caches() {
        let caches = CacheService::default();
        caches
            .schema()
            .set("c1:schemas".into(), json!([]), Some(Duration::ZERO));
        caches.schema().set("c1:tables:main".into(), json!([]), None);

        assert_eq!(caches.cleanup_expired(), 1);
        assert_eq!(caches.stats().schema.entries, 1);
    }
}
