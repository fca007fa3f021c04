//! Connector trait for per-database-kind driver sessions
//!
//! A connector wraps exactly one driver session. The core never talks to a
//! driver directly: it builds connectors through the [`ConnectorFactory`],
//! keeps them in the registry and delegates every call to them.

use crate::database::model::{ColumnInfo, DatabaseKind, LogicalConnection, QueryOutcome};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Unified driver session interface
#[async_trait]
pub trait Connector: Send + Sync {
    /// Database kind served by this connector
    fn kind(&self) -> DatabaseKind;

    /// Open the driver session for `connection`
    ///
    /// # Returns
    /// * `Ok(())` - Session established
    /// * `Err(Error)` - Driver failure, with the driver's message
    async fn connect(&mut self, connection: &LogicalConnection) -> Result<()>;

    /// Close the driver session
    async fn disconnect(&self) -> Result<()>;

    /// Whether the session is currently usable
    fn is_connected(&self) -> bool;

    /// Round-trip check against the server
    async fn ping(&self) -> Result<bool>;

    /// Execute a statement with positional parameters
    async fn execute_query(&self, sql: &str, params: &[Value]) -> Result<QueryOutcome>;

    /// List schemas (or databases, depending on the backend)
    async fn schemas(&self) -> Result<Vec<String>>;

    /// List tables in `schema` (backend default when `None`)
    async fn tables(&self, schema: Option<&str>) -> Result<Vec<String>>;

    /// Describe the columns of `table`
    async fn columns(&self, table: &str, schema: Option<&str>) -> Result<Vec<ColumnInfo>>;
}
