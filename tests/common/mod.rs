//! Shared test doubles for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use dbtoolkit_core::database::{ColumnInfo, StatementKind};
use dbtoolkit_core::{
    Connector, ConnectorFactory, CoreConfig, DatabaseKind, DbToolkit, Error, LogicalConnection,
    QueryOutcome, Result, StaticSettings,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Behaviour and call log shared by every connector a factory builds
#[derive(Default)]
pub struct MockState {
    pub connected: AtomicBool,
    pub refuse_connect: AtomicBool,
    pub hang_connect: AtomicBool,
    pub connects: AtomicUsize,
    pub metadata_calls: AtomicUsize,
    pub executed: Mutex<Vec<String>>,
    pub query_delay: Mutex<Duration>,
    /// Extra delay applied to reads after they read `value`
    pub read_delay: Mutex<Duration>,
    /// Value returned by reads; every successful write increments it
    pub value: AtomicI64,
}

impl MockState {
    pub fn new() -> Arc<Self> {
        let state = Self::default();
        state.value.store(1, Ordering::SeqCst);
        Arc::new(state)
    }

    /// Simulate the server dropping the session
    pub fn drop_session(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn set_query_delay(&self, delay: Duration) {
        if let Ok(mut current) = self.query_delay.lock() {
            *current = delay;
        }
    }

    pub fn set_read_delay(&self, delay: Duration) {
        if let Ok(mut current) = self.read_delay.lock() {
            *current = delay;
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }
}

pub struct MockConnector {
    kind: DatabaseKind,
    state: Arc<MockState>,
}

#[async_trait]
impl Connector for MockConnector {
    fn kind(&self) -> DatabaseKind {
        self.kind
    }

    async fn connect(&mut self, connection: &LogicalConnection) -> Result<()> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.hang_connect.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.state.refuse_connect.load(Ordering::SeqCst) {
            return Err(Error::connect_failed(
                &connection.id,
                "FATAL: password authentication failed for user \"admin\"",
            ));
        }
        self.state.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<bool> {
        Ok(self.is_connected())
    }

    async fn execute_query(&self, sql: &str, _params: &[Value]) -> Result<QueryOutcome> {
        self.state.executed.lock().unwrap().push(sql.to_string());

        let delay = *self.state.query_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if sql.contains("broken") {
            return Ok(QueryOutcome::failure("syntax error at or near \"broken\""));
        }
        if StatementKind::classify(sql).is_read_only() {
            let value = self.state.value.load(Ordering::SeqCst);
            let read_delay = *self.state.read_delay.lock().unwrap();
            if !read_delay.is_zero() {
                tokio::time::sleep(read_delay).await;
            }
            Ok(QueryOutcome::rows(vec!["value".into()], vec![vec![json!(value)]]))
        } else {
            self.state.value.fetch_add(1, Ordering::SeqCst);
            Ok(QueryOutcome::affected(1))
        }
    }

    async fn schemas(&self) -> Result<Vec<String>> {
        self.state.metadata_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec!["main".into()])
    }

    async fn tables(&self, _schema: Option<&str>) -> Result<Vec<String>> {
        self.state.metadata_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec!["orders".into(), "users".into()])
    }

    async fn columns(&self, _table: &str, _schema: Option<&str>) -> Result<Vec<ColumnInfo>> {
        self.state.metadata_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![ColumnInfo {
            name: "id".into(),
            data_type: "INTEGER".into(),
            nullable: false,
            default_value: None,
            primary_key: true,
        }])
    }
}

pub fn mock_factory(state: &Arc<MockState>) -> ConnectorFactory {
    let mut factory = ConnectorFactory::new();
    for kind in [DatabaseKind::Sqlite, DatabaseKind::Postgresql] {
        let state = Arc::clone(state);
        factory.register(kind, move || {
            Box::new(MockConnector {
                kind,
                state: Arc::clone(&state),
            }) as Box<dyn Connector>
        });
    }
    factory
}

pub fn toolkit_with(state: &Arc<MockState>, config: CoreConfig) -> DbToolkit {
    let settings = Arc::new(StaticSettings::new(config.runtime_settings()));
    DbToolkit::new(config, mock_factory(state), settings)
}

pub fn toolkit(state: &Arc<MockState>) -> DbToolkit {
    toolkit_with(state, CoreConfig::default())
}

pub fn sqlite_connection(id: &str) -> LogicalConnection {
    LogicalConnection::new(id, format!("Local {}", id), DatabaseKind::Sqlite, ":memory:")
}
