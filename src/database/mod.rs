//! Multi-database connection support
//!
//! This module provides the connector abstraction over the individual
//! database drivers, the factory that builds connectors per database kind,
//! and the registry that owns the live driver session of every logical
//! connection.

pub mod adapters;
pub mod connector;
pub mod factory;
pub mod model;
pub mod registry;
pub mod statement;

// Re-export main types for convenience
pub use adapters::SqlConnector;
pub use connector::Connector;
pub use factory::{ConnectorConstructor, ConnectorFactory};
pub use model::{ColumnInfo, DatabaseKind, LogicalConnection, QueryOutcome};
pub use registry::{ActiveHandle, ConnectionRegistry, ConnectionStatus};
pub use statement::StatementKind;
