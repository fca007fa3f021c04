//! dbtoolkit-core - connection, locking and caching core of a database administration backend
//!
//! Provides the pieces a multi-database admin server builds its routes on:
//! - Connection registry with connect timeouts and transparent reconnect
//! - Per-connection operation lock (writes serialized, reads never blocked)
//! - Metadata, query-result and statement caches keyed per connection
//! - Adaptive background janitors for history retention and scheduled jobs

// Enforce error handling best practices
#![cfg_attr(
    not(test),
    warn(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
    )
)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used,))]

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod lock;
pub mod scheduler;
pub mod services;
pub mod toolkit;

pub use config::{init_logging, CoreConfig, RuntimeSettings, SettingsSource, StaticSettings};
pub use database::{
    ConnectionRegistry, ConnectionStatus, Connector, ConnectorFactory, DatabaseKind,
    LogicalConnection, QueryOutcome,
};
pub use error::{Error, Result};
pub use lock::{OperationGuard, OperationLock};
pub use services::{ConnectionService, LockService};
pub use toolkit::{DbToolkit, ExecuteOptions};
