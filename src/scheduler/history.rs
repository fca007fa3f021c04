//! Query history retention and cache cleanup

use super::activity::ActivityTracker;
use super::supervisor::Janitor;
use crate::cache::CacheService;
use crate::config::{SchedulerConfig, SettingsSource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One executed statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub connection_id: String,
    pub query: String,
    pub success: bool,
    pub execution_time_ms: u64,
    pub row_count: usize,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// External store holding the query history
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, entry: HistoryEntry) -> Result<()>;

    /// Delete entries executed before `cutoff`, returning how many
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// History kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Entries of one connection, newest first
    pub fn for_connection(&self, connection_id: &str) -> Vec<HistoryEntry> {
        let mut entries: Vec<HistoryEntry> = self
            .entries()
            .into_iter()
            .filter(|entry| entry.connection_id == connection_id)
            .collect();
        entries.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, entry: HistoryEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| Error::internal("History store lock poisoned"))?
            .push(entry);
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::internal("History store lock poisoned"))?;
        let before = entries.len();
        entries.retain(|entry| entry.executed_at >= cutoff);
        Ok(before - entries.len())
    }
}

/// Removes old history and expired cache entries.
///
/// Runs every `history_base_interval`, stretched by the idle multiplier
/// while nobody is using the system.
pub struct HistoryJanitor {
    store: Arc<dyn HistoryStore>,
    caches: Arc<CacheService>,
    settings: Arc<dyn SettingsSource>,
    activity: Arc<ActivityTracker>,
    base_interval: Duration,
    idle_multiplier: f64,
    backoff: Duration,
}

impl HistoryJanitor {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        caches: Arc<CacheService>,
        settings: Arc<dyn SettingsSource>,
        activity: Arc<ActivityTracker>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            caches,
            settings,
            activity,
            base_interval: Duration::from_secs(config.history_base_interval_seconds),
            idle_multiplier: config.history_idle_multiplier,
            backoff: Duration::from_secs(config.history_error_backoff_seconds),
        }
    }

    fn interval(&self) -> Duration {
        self.activity
            .adaptive_interval(self.base_interval, self.idle_multiplier)
    }
}

#[async_trait]
impl Janitor for HistoryJanitor {
    fn name(&self) -> &str {
        "history_cleanup"
    }

    async fn initial_interval(&self) -> Duration {
        self.interval()
    }

    async fn run_once(&self) -> Result<usize> {
        let retention_days = self.settings.current().await?.query_history_retention_days;
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));

        let purged = self.store.purge_older_than(cutoff).await?;
        let expired = self.caches.cleanup_expired();

        if purged > 0 || expired > 0 {
            log::info!(
                "History cleanup: removed {} entries older than {} days, {} expired cache entries",
                purged,
                retention_days,
                expired
            );
        }
        Ok(purged + expired)
    }

    async fn next_interval(&self) -> Result<Duration> {
        Ok(self.interval())
    }

    fn backoff_interval(&self) -> Duration {
        self.backoff
    }
}
