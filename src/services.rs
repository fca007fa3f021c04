//! Narrow interfaces consumed by route handlers
//!
//! Handlers depend on these traits rather than on the concrete registry or
//! lock, so they can be exercised against test doubles.

use crate::database::{Connector, ConnectionRegistry, ConnectionStatus, LogicalConnection};
use crate::error::Result;
use crate::lock::{OperationGuard, OperationLock};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Connection lifecycle operations
#[async_trait]
pub trait ConnectionService: Send + Sync {
    async fn connect(&self, connection: &LogicalConnection, timeout: Option<Duration>) -> Result<()>;

    async fn disconnect(&self, connection_id: &str) -> bool;

    async fn get_connector(
        &self,
        connection_id: &str,
        auto_reconnect: bool,
    ) -> Result<Option<Arc<dyn Connector>>>;

    fn status(&self, connection_id: &str) -> ConnectionStatus;

    fn all_active_ids(&self) -> Vec<String>;
}

/// Operation lock access
#[async_trait]
pub trait LockService: Send + Sync {
    async fn acquire_scoped(
        &self,
        connection_id: &str,
        timeout: Duration,
        read_only: bool,
    ) -> Result<OperationGuard>;

    fn is_locked(&self, connection_id: &str) -> bool;
}

#[async_trait]
impl ConnectionService for ConnectionRegistry {
    async fn connect(&self, connection: &LogicalConnection, timeout: Option<Duration>) -> Result<()> {
        ConnectionRegistry::connect(self, connection, timeout).await
    }

    async fn disconnect(&self, connection_id: &str) -> bool {
        ConnectionRegistry::disconnect(self, connection_id).await
    }

    async fn get_connector(
        &self,
        connection_id: &str,
        auto_reconnect: bool,
    ) -> Result<Option<Arc<dyn Connector>>> {
        ConnectionRegistry::get_connector(self, connection_id, auto_reconnect).await
    }

    fn status(&self, connection_id: &str) -> ConnectionStatus {
        ConnectionRegistry::status(self, connection_id)
    }

    fn all_active_ids(&self) -> Vec<String> {
        ConnectionRegistry::all_active_ids(self)
    }
}

#[async_trait]
impl LockService for OperationLock {
    async fn acquire_scoped(
        &self,
        connection_id: &str,
        timeout: Duration,
        read_only: bool,
    ) -> Result<OperationGuard> {
        OperationLock::acquire_scoped(self, connection_id, timeout, read_only).await
    }

    fn is_locked(&self, connection_id: &str) -> bool {
        OperationLock::is_locked(self, connection_id)
    }
}
