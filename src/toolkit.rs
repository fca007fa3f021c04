//! Toolkit façade
//!
//! Wires the registry, operation lock, caches and scheduler together and
//! implements the query and metadata flows on top of them. Every component
//! is an owned instance, so several toolkits can live in one process (tests
//! do exactly that).
//!
//! # Example Usage
//!
//! ```rust,ignore
//! let toolkit = DbToolkit::from_config(CoreConfig::load()?);
//! toolkit.connect(&LogicalConnection::new("c1", "Local", DatabaseKind::Sqlite, "app.db"), None).await?;
//!
//! let users = toolkit.execute("c1", "SELECT * FROM users", &[], &ExecuteOptions::default()).await?;
//! let tables = toolkit.tables("c1", None).await?;
//! ```

use crate::cache::{connection_key, Cache, CacheService, CacheServiceStats, QueryCache};
use crate::config::{CoreConfig, SettingsSource, StaticSettings};
use crate::database::{
    ColumnInfo, ConnectionRegistry, ConnectionStatus, Connector, ConnectorFactory,
    LogicalConnection, QueryOutcome, StatementKind,
};
use crate::database::statement::is_cacheable_select;
use crate::error::{Error, Result};
use crate::lock::{LockStats, OperationLock};
use crate::scheduler::{
    ActivityTracker, HistoryEntry, HistoryJanitor, HistoryStore, InMemoryHistoryStore,
    JanitorSupervisor, JobJanitor, JobRunner, JobStore, SchedulerStats,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SCHEMA_LIST_TTL: Duration = Duration::from_secs(900);
const TABLE_METADATA_TTL: Duration = Duration::from_secs(600);

/// Per-call options for [`DbToolkit::execute`]
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Wait bound for the write lock (configured default when `None`)
    pub lock_timeout: Option<Duration>,
    /// Bound on the driver call (configured default when `None`)
    pub query_timeout: Option<Duration>,
    /// Serve and store read results through the query cache
    pub use_cache: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            lock_timeout: None,
            query_timeout: None,
            use_cache: true,
        }
    }
}

impl ExecuteOptions {
    pub fn uncached() -> Self {
        Self {
            use_cache: false,
            ..Default::default()
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }
}

pub struct DbToolkit {
    config: CoreConfig,
    registry: Arc<ConnectionRegistry>,
    lock: Arc<OperationLock>,
    caches: Arc<CacheService>,
    settings: Arc<dyn SettingsSource>,
    activity: Arc<ActivityTracker>,
    history: Arc<dyn HistoryStore>,
    supervisor: JanitorSupervisor,
    background_started: AtomicBool,
}

impl DbToolkit {
    pub fn new(
        config: CoreConfig,
        factory: ConnectorFactory,
        settings: Arc<dyn SettingsSource>,
    ) -> Self {
        let lock = Arc::new(OperationLock::new(config.lock.max_lock_age()));
        let caches = Arc::new(CacheService::new(&config.cache));
        let registry = Arc::new(ConnectionRegistry::new(
            factory,
            Arc::clone(&lock),
            Arc::clone(&caches),
            Arc::clone(&settings),
        ));
        let activity = Arc::new(ActivityTracker::new(Duration::from_secs(
            config.scheduler.activity_window_seconds,
        )));
        let supervisor = JanitorSupervisor::new(Arc::clone(&activity));

        Self {
            config,
            registry,
            lock,
            caches,
            settings,
            activity,
            history: Arc::new(InMemoryHistoryStore::new()),
            supervisor,
            background_started: AtomicBool::new(false),
        }
    }

    /// Toolkit with the built-in SQL drivers and settings seeded from `config`
    pub fn from_config(config: CoreConfig) -> Self {
        let settings = Arc::new(StaticSettings::new(config.runtime_settings()));
        Self::new(config, ConnectorFactory::with_sql_drivers(), settings)
    }

    /// Record executed statements into `store` instead of process memory
    pub fn with_history(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history = store;
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn lock(&self) -> &Arc<OperationLock> {
        &self.lock
    }

    pub fn caches(&self) -> &Arc<CacheService> {
        &self.caches
    }

    pub fn settings(&self) -> &Arc<dyn SettingsSource> {
        &self.settings
    }

    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.activity
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub async fn connect(
        &self,
        connection: &LogicalConnection,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.activity.record_activity();
        self.registry.connect(connection, timeout).await
    }

    pub async fn disconnect(&self, connection_id: &str) -> bool {
        self.activity.record_activity();
        self.registry.disconnect(connection_id).await
    }

    pub fn status(&self, connection_id: &str) -> ConnectionStatus {
        self.registry.status(connection_id)
    }

    async fn live_connector(&self, connection_id: &str) -> Result<Arc<dyn Connector>> {
        self.registry
            .get_connector(connection_id, true)
            .await?
            .ok_or_else(|| Error::not_connected(connection_id))
    }

    /// Execute a statement against a connection.
    ///
    /// Read-only statements never wait for the write lock; plain `SELECT`s
    /// may also be served from the query cache. Other statements hold the connection's lock
    /// for the duration of the driver call and invalidate the results (and
    /// for schema changes, the metadata) cached for the connection.
    ///
    /// A driver-level failure is reported inside the returned outcome
    /// (`success == false`); `Err` is reserved for busy, timeout, missing
    /// connection and invalid input.
    pub async fn execute(
        &self,
        connection_id: &str,
        sql: &str,
        params: &[Value],
        options: &ExecuteOptions,
    ) -> Result<QueryOutcome> {
        if sql.trim().is_empty() {
            return Err(Error::invalid_input("Query cannot be empty"));
        }

        let kind = StatementKind::classify(sql);
        let cache_params = QueryCache::positional(params);
        let use_cache =
            options.use_cache && is_cacheable_select(sql) && self.caches.query_cache_enabled();

        // observed before the driver call; a write landing meanwhile bumps it
        let mut cache_epoch = None;
        if use_cache {
            if let Some(hit) = self.caches.query().get_result(connection_id, sql, &cache_params) {
                log::debug!("Query cache hit for '{}'", connection_id);
                self.activity.record_activity();
                return Ok(hit);
            }
            cache_epoch = Some(self.caches.query().epoch(connection_id));
        }

        let lock_timeout = options
            .lock_timeout
            .unwrap_or_else(|| self.config.lock.default_timeout());
        let _guard = self
            .lock
            .acquire_scoped(connection_id, lock_timeout, kind.is_read_only())
            .await?;

        let connector = self.live_connector(connection_id).await?;
        let prepared = self
            .caches
            .statements()
            .prepare(connection_id, sql, connector.kind());

        let query_timeout = options
            .query_timeout
            .unwrap_or_else(|| Duration::from_secs(self.config.connection.query_timeout_seconds));
        let started = Instant::now();
        let result =
            tokio::time::timeout(query_timeout, connector.execute_query(&prepared, params)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.activity.record_activity();

        let outcome = match result {
            Ok(Ok(outcome)) if outcome.execution_time_ms == 0 => outcome.with_execution_time(elapsed_ms),
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                self.record_history(connection_id, sql, &QueryOutcome::failure(e.to_string()))
                    .await;
                return Err(e);
            }
            Err(_) => {
                log::warn!(
                    "Query on '{}' timed out after {:?}",
                    connection_id,
                    query_timeout
                );
                let timed_out = QueryOutcome::failure("query timed out").with_execution_time(elapsed_ms);
                self.record_history(connection_id, sql, &timed_out).await;
                return Err(Error::QueryTimeout(query_timeout));
            }
        };

        if let Some(epoch) = cache_epoch {
            self.caches
                .query()
                .set_result_at(connection_id, sql, &cache_params, &outcome, epoch);
        } else if kind.changes_schema() {
            let removed = self.caches.schema().invalidate_connection(connection_id)
                + self.caches.query().invalidate_connection(connection_id);
            log::info!(
                "Schema change on '{}': dropped {} cached entries",
                connection_id,
                removed
            );
        } else if !kind.is_read_only() {
            self.caches.query().invalidate_connection(connection_id);
        }

        self.record_history(connection_id, sql, &outcome).await;
        Ok(outcome)
    }

    async fn record_history(&self, connection_id: &str, sql: &str, outcome: &QueryOutcome) {
        let entry = HistoryEntry {
            connection_id: connection_id.to_string(),
            query: sql.to_string(),
            success: outcome.success,
            execution_time_ms: outcome.execution_time_ms,
            row_count: outcome.row_count,
            error: outcome.error.clone(),
            executed_at: Utc::now(),
        };
        if let Err(e) = self.history.append(entry).await {
            log::warn!("Failed to record query history for '{}': {}", connection_id, e);
        }
    }

    fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.caches.schema().get(key)?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                log::warn!("Dropping undecodable metadata entry '{}': {}", key, e);
                self.caches.schema().delete(key);
                None
            }
        }
    }

    fn store<T: Serialize>(&self, key: String, value: &T, ttl: Duration) {
        match serde_json::to_value(value) {
            Ok(value) => self.caches.schema().set(key, value, Some(ttl)),
            Err(e) => log::warn!("Metadata for '{}' not cached: {}", key, e),
        }
    }

    /// Schemas (or databases) of a connection, read through the metadata cache
    pub async fn schemas(&self, connection_id: &str) -> Result<Vec<String>> {
        let key = connection_key(connection_id, "schemas");
        if let Some(schemas) = self.cached(&key) {
            return Ok(schemas);
        }

        let connector = self.live_connector(connection_id).await?;
        let schemas = connector.schemas().await?;
        self.activity.record_activity();
        self.store(key, &schemas, SCHEMA_LIST_TTL);
        Ok(schemas)
    }

    pub async fn tables(&self, connection_id: &str, schema: Option<&str>) -> Result<Vec<String>> {
        let key = connection_key(connection_id, &format!("tables:{}", schema.unwrap_or_default()));
        if let Some(tables) = self.cached(&key) {
            return Ok(tables);
        }

        let connector = self.live_connector(connection_id).await?;
        let tables = connector.tables(schema).await?;
        self.activity.record_activity();
        self.store(key, &tables, TABLE_METADATA_TTL);
        Ok(tables)
    }

    pub async fn columns(
        &self,
        connection_id: &str,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ColumnInfo>> {
        let key = connection_key(
            connection_id,
            &format!("columns:{}.{}", schema.unwrap_or_default(), table),
        );
        if let Some(columns) = self.cached(&key) {
            return Ok(columns);
        }

        let connector = self.live_connector(connection_id).await?;
        let columns = connector.columns(table, schema).await?;
        self.activity.record_activity();
        self.store(key, &columns, TABLE_METADATA_TTL);
        Ok(columns)
    }

    /// Forget cached metadata of a connection; returns the entries dropped
    pub fn refresh_metadata(&self, connection_id: &str) -> usize {
        self.caches.schema().invalidate_connection(connection_id)
    }

    /// Start the history and job janitors. A second call is rejected.
    pub fn spawn_background(
        &self,
        job_store: Arc<dyn JobStore>,
        job_runner: Arc<dyn JobRunner>,
    ) -> Result<()> {
        if self.background_started.swap(true, Ordering::SeqCst) {
            return Err(Error::invalid_input("Background tasks already started"));
        }

        let history = HistoryJanitor::new(
            Arc::clone(&self.history),
            Arc::clone(&self.caches),
            Arc::clone(&self.settings),
            Arc::clone(&self.activity),
            &self.config.scheduler,
        );
        let jobs = JobJanitor::new(job_store, job_runner, &self.config.scheduler);

        self.supervisor.spawn(Arc::new(history));
        self.supervisor.spawn(Arc::new(jobs));
        log::info!("Background scheduler started");
        Ok(())
    }

    /// Stop the background loops and close every connection
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
        let closed = self.registry.disconnect_all().await;
        log::info!("Toolkit shut down ({} connections closed)", closed);
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.supervisor.stats()
    }

    pub fn cache_stats(&self) -> CacheServiceStats {
        self.caches.stats()
    }

    pub fn lock_stats(&self) -> LockStats {
        self.lock.stats()
    }
}
