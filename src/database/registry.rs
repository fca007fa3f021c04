//! Connection registry
//!
//! Maps each logical connection id to its live driver session. Connects and
//! reconnects of one id are serialized through a per-id gate; different ids
//! never wait on each other. Teardown also drops the id's lock entry and
//! every cache namespace it owns.

use crate::cache::CacheService;
use crate::config::{RuntimeSettings, SettingsSource};
use crate::database::connector::Connector;
use crate::database::factory::ConnectorFactory;
use crate::database::model::{DatabaseKind, LogicalConnection};
use crate::error::{Error, Result};
use crate::lock::OperationLock;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One live driver session and the snapshot it was opened from
#[derive(Clone)]
pub struct ActiveHandle {
    pub connector: Arc<dyn Connector>,
    pub connection: LogicalConnection,
    pub connected_at: DateTime<Utc>,
}

impl ActiveHandle {
    pub fn is_connected(&self) -> bool {
        self.connector.is_connected()
    }
}

/// Composite view of a connection's handle and lock state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub locked: bool,
    pub kind: Option<DatabaseKind>,
    pub name: Option<String>,
}

/// Registry of active connections
pub struct ConnectionRegistry {
    handles: DashMap<String, ActiveHandle>,
    /// Serializes connect/reconnect/disconnect per id
    gates: DashMap<String, Arc<Mutex<()>>>,
    factory: ConnectorFactory,
    lock: Arc<OperationLock>,
    caches: Arc<CacheService>,
    settings: Arc<dyn SettingsSource>,
}

impl ConnectionRegistry {
    pub fn new(
        factory: ConnectorFactory,
        lock: Arc<OperationLock>,
        caches: Arc<CacheService>,
        settings: Arc<dyn SettingsSource>,
    ) -> Self {
        Self {
            handles: DashMap::new(),
            gates: DashMap::new(),
            factory,
            lock,
            caches,
            settings,
        }
    }

    pub fn lock(&self) -> &Arc<OperationLock> {
        &self.lock
    }

    pub fn caches(&self) -> &Arc<CacheService> {
        &self.caches
    }

    fn gate(&self, connection_id: &str) -> Arc<Mutex<()>> {
        let gate = self
            .gates
            .entry(connection_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Arc::clone(gate.value())
    }

    /// Forget the gate of an id without a handle, unless another caller holds it
    fn release_gate(&self, connection_id: &str, gate: &Arc<Mutex<()>>) {
        if self.handles.contains_key(connection_id) {
            return;
        }
        // one reference in the map, one held by the caller
        self.gates.remove_if(connection_id, |_, current| {
            Arc::ptr_eq(current, gate) && Arc::strong_count(current) == 2
        });
    }

    fn handle(&self, connection_id: &str) -> Option<ActiveHandle> {
        self.handles
            .get(connection_id)
            .map(|handle| handle.value().clone())
    }

    async fn runtime_settings(&self) -> RuntimeSettings {
        match self.settings.current().await {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings unavailable, using defaults: {}", e);
                RuntimeSettings::default()
            }
        }
    }

    /// Connect to a database.
    ///
    /// The attempt is bounded by `timeout`, or by the configured connection
    /// timeout when `None`. On success the new handle replaces any prior
    /// one for the id (the prior session is not closed). Nothing is
    /// installed on failure.
    ///
    /// # Returns
    /// * `Ok(())` - Handle installed
    /// * `Err(Error::ConnectTimeout)` - The attempt exceeded its bound
    /// * `Err(Error::ConnectFailed)` - The driver refused, with its message
    pub async fn connect(
        &self,
        connection: &LogicalConnection,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let gate = self.gate(&connection.id);
        let _gate = gate.lock().await;
        let result = self.connect_gated(connection, timeout).await;
        self.release_gate(&connection.id, &gate);
        result
    }

    /// Boolean form of [`connect`](Self::connect); failures are logged
    pub async fn try_connect(&self, connection: &LogicalConnection, timeout: Option<Duration>) -> bool {
        self.connect(connection, timeout).await.is_ok()
    }

    async fn connect_gated(
        &self,
        connection: &LogicalConnection,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let timeout = match timeout {
            Some(timeout) => timeout,
            None => self.runtime_settings().await.connection_timeout(),
        };

        let mut connector = self.factory.create(connection.kind)?;

        match tokio::time::timeout(timeout, connector.connect(connection)).await {
            Err(_) => {
                log::error!(
                    "Connection timeout for '{}' after {:?}",
                    connection.id,
                    timeout
                );
                return Err(Error::connect_timeout(&connection.id, timeout));
            }
            Ok(Err(e)) => {
                log::error!("Connection failed for '{}': {}", connection.id, e);
                return Err(match e {
                    Error::ConnectFailed { .. } => e,
                    other => Error::connect_failed(&connection.id, other.to_string()),
                });
            }
            Ok(Ok(())) => {}
        }

        let handle = ActiveHandle {
            connector: Arc::from(connector),
            connection: connection.clone(),
            connected_at: Utc::now(),
        };
        self.handles.insert(connection.id.clone(), handle);

        log::info!(
            "Connected '{}' ({}, {})",
            connection.id,
            connection.name,
            connection.kind
        );
        Ok(())
    }

    /// Close and forget a connection.
    ///
    /// The lock entry and every cache namespace of the id are dropped with
    /// it. A failing driver close is logged; the handle is removed anyway.
    pub async fn disconnect(&self, connection_id: &str) -> bool {
        let gate = self.gate(connection_id);
        let _gate = gate.lock().await;

        let handle = match self.handles.remove(connection_id) {
            Some((_, handle)) => handle,
            None => {
                self.release_gate(connection_id, &gate);
                return false;
            }
        };
        self.release_gate(connection_id, &gate);

        if let Err(e) = handle.connector.disconnect().await {
            log::warn!("Error closing connection '{}': {}", connection_id, e);
        }
        self.lock.cleanup(connection_id);
        self.caches.purge_connection(connection_id);

        log::info!("Disconnected '{}'", connection_id);
        true
    }

    /// Get the connector for an id.
    ///
    /// A handle that reports itself disconnected is reconnected from its
    /// stored snapshot when both `auto_reconnect` and the settings allow
    /// it. The old handle stays visible until the new one is installed.
    /// Without reconnect the stale connector is returned as is.
    pub async fn get_connector(
        &self,
        connection_id: &str,
        auto_reconnect: bool,
    ) -> Result<Option<Arc<dyn Connector>>> {
        let handle = match self.handle(connection_id) {
            Some(handle) => handle,
            None => return Ok(None),
        };

        if handle.is_connected() || !auto_reconnect {
            return Ok(Some(handle.connector));
        }
        if !self.runtime_settings().await.auto_reconnect {
            return Ok(Some(handle.connector));
        }

        let gate = self.gate(connection_id);
        let _gate = gate.lock().await;

        // another caller may have reconnected or disconnected meanwhile
        let current = match self.handle(connection_id) {
            Some(current) => current,
            None => {
                self.release_gate(connection_id, &gate);
                return Ok(None);
            }
        };
        if current.is_connected() {
            return Ok(Some(current.connector));
        }

        log::info!("Reconnecting '{}'", connection_id);
        self.connect_gated(&current.connection, None).await?;
        Ok(self.handle(connection_id).map(|handle| handle.connector))
    }

    /// Handle and lock state for an id; unknown ids report the default
    pub fn status(&self, connection_id: &str) -> ConnectionStatus {
        let locked = self.lock.is_locked(connection_id);
        match self.handle(connection_id) {
            Some(handle) => ConnectionStatus {
                connected: handle.is_connected(),
                locked,
                kind: Some(handle.connection.kind),
                name: Some(handle.connection.name.clone()),
            },
            None => ConnectionStatus {
                locked,
                ..Default::default()
            },
        }
    }

    /// Ids with an installed handle, sorted
    pub fn all_active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handles.iter().map(|h| h.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Snapshot the connection was opened from
    pub fn connection(&self, connection_id: &str) -> Option<LogicalConnection> {
        self.handle(connection_id).map(|handle| handle.connection)
    }

    pub fn is_connected(&self, connection_id: &str) -> bool {
        self.handle(connection_id)
            .map(|handle| handle.is_connected())
            .unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.handles.len()
    }

    /// Disconnect every active connection, returning how many were closed
    pub async fn disconnect_all(&self) -> usize {
        let mut closed = 0;
        for id in self.all_active_ids() {
            if self.disconnect(&id).await {
                closed += 1;
            }
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticSettings;
    use crate::database::model::{ColumnInfo, QueryOutcome};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        Refuse,
        Hang,
    }

    struct StubConnector {
        behaviour: Behaviour,
        connected: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Connector for StubConnector {
        fn kind(&self) -> DatabaseKind {
            DatabaseKind::Sqlite
        }

        async fn connect(&mut self, _connection: &LogicalConnection) -> Result<()> {
            match self.behaviour {
                Behaviour::Succeed => {
                    self.connected.store(true, Ordering::SeqCst);
                    Ok(())
                }
                Behaviour::Refuse => Err(Error::query("password authentication failed")),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        }

        async fn disconnect(&self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn ping(&self) -> Result<bool> {
            Ok(self.is_connected())
        }

        async fn execute_query(&self, _sql: &str, _params: &[Value]) -> Result<QueryOutcome> {
            Ok(QueryOutcome::affected(0))
        }

        async fn schemas(&self) -> Result<Vec<String>> {
            Ok(vec!["main".into()])
        }

        async fn tables(&self, _schema: Option<&str>) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn columns(&self, _table: &str, _schema: Option<&str>) -> Result<Vec<ColumnInfo>> {
            Ok(Vec::new())
        }
    }

    fn registry(behaviour: Behaviour, connected: Arc<AtomicBool>) -> ConnectionRegistry {
        let mut factory = ConnectorFactory::new();
        factory.register(DatabaseKind::Sqlite, move || {
            Box::new(StubConnector {
                behaviour,
                connected: Arc::clone(&connected),
            }) as Box<dyn Connector>
        });
        ConnectionRegistry::new(
            factory,
            Arc::new(OperationLock::default()),
            Arc::new(CacheService::default()),
            Arc::new(StaticSettings::default()),
        )
    }

    fn conn(id: &str) -> LogicalConnection {
        LogicalConnection::new(id, "Local", DatabaseKind::Sqlite, ":memory:")
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let registry = registry(Behaviour::Succeed, Arc::new(AtomicBool::new(false)));
        registry.connect(&conn("c1"), None).await.unwrap();

        let status = registry.status("c1");
        assert!(status.connected);
        assert!(!status.locked);
        assert_eq!(status.kind, Some(DatabaseKind::Sqlite));
        assert_eq!(registry.all_active_ids(), vec!["c1".to_string()]);

        assert!(registry.disconnect("c1").await);
        assert!(!registry.disconnect("c1").await);
        assert_eq!(registry.status("c1"), ConnectionStatus::default());
    }

    #[tokio::test]
    async fn test_refused_connect_installs_nothing() {
        let registry = registry(Behaviour::Refuse, Arc::new(AtomicBool::new(false)));
        let err = registry.connect(&conn("c1"), None).await.unwrap_err();

        match err {
            Error::ConnectFailed { id, message } => {
                assert_eq!(id, "c1");
                assert!(message.contains("password authentication failed"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let registry = registry(Behaviour::Hang, Arc::new(AtomicBool::new(false)));
        let err = registry
            .connect(&conn("c1"), Some(Duration::from_secs(5)))
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "E_CONNECT_TIMEOUT");
        assert!(!registry.try_connect(&conn("c1"), Some(Duration::from_secs(1))).await);
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_on_demand() {
        let connected = Arc::new(AtomicBool::new(false));
        let registry = registry(Behaviour::Succeed, Arc::clone(&connected));
        registry.connect(&conn("c1"), None).await.unwrap();
        let first_connected_at = registry.handle("c1").unwrap().connected_at;

        connected.store(false, Ordering::SeqCst);

        // reconnect disabled: stale connector handed back as is
        let stale = registry.get_connector("c1", false).await.unwrap().unwrap();
        assert!(!stale.is_connected());

        let live = registry.get_connector("c1", true).await.unwrap().unwrap();
        assert!(live.is_connected());
        assert!(registry.handle("c1").unwrap().connected_at >= first_connected_at);
    }

    #[tokio::test]
    async fn test_reconnect_respects_settings() {
        let connected = Arc::new(AtomicBool::new(false));
        let settings = Arc::new(StaticSettings::default());
        settings.update(|s| s.auto_reconnect = false).unwrap();

        let mut factory = ConnectorFactory::new();
        let flag = Arc::clone(&connected);
        factory.register(DatabaseKind::Sqlite, move || {
            Box::new(StubConnector {
                behaviour: Behaviour::Succeed,
                connected: Arc::clone(&flag),
            }) as Box<dyn Connector>
        });
        let registry = ConnectionRegistry::new(
            factory,
            Arc::new(OperationLock::default()),
            Arc::new(CacheService::default()),
            settings,
        );

        registry.connect(&conn("c1"), None).await.unwrap();
        connected.store(false, Ordering::SeqCst);

        let connector = registry.get_connector("c1", true).await.unwrap().unwrap();
        assert!(!connector.is_connected());
    }

    #[tokio::test]
    async fn test_unknown_id_is_absent() {
        let registry = registry(Behaviour::Succeed, Arc::new(AtomicBool::new(false)));
        assert!(registry.get_connector("nope", true).await.unwrap().is_none());
        assert!(registry.connection("nope").is_none());
    }

    #[tokio::test]
    async fn test_disconnect_all() {
        let registry = registry(Behaviour::Succeed, Arc::new(AtomicBool::new(false)));
        registry.connect(&conn("a"), None).await.unwrap();
        registry.connect(&conn("b"), None).await.unwrap();

        assert_eq!(registry.disconnect_all().await, 2);
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_gates_do_not_outlive_connections() {
        let registry = registry(Behaviour::Succeed, Arc::new(AtomicBool::new(false)));
        for i in 0..20 {
            let id = format!("tmp-{}", i);
            registry.connect(&conn(&id), None).await.unwrap();
            assert!(registry.disconnect(&id).await);
        }
        assert!(!registry.disconnect("never-connected").await);

        registry.connect(&conn("kept"), None).await.unwrap();
        assert_eq!(registry.gates.len(), 1);
        assert!(registry.gates.contains_key("kept"));
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_no_gate() {
        let registry = registry(Behaviour::Refuse, Arc::new(AtomicBool::new(false)));
        assert!(!registry.try_connect(&conn("c1"), None).await);
        assert!(registry.gates.is_empty());
    }
}
