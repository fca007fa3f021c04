//! Closed table mapping a database kind to its connector constructor

use crate::database::adapters::SqlConnector;
use crate::database::connector::Connector;
use crate::database::model::DatabaseKind;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Constructor for a fresh, not yet connected connector
pub type ConnectorConstructor = Arc<dyn Fn() -> Box<dyn Connector> + Send + Sync>;

/// Factory for creating database connectors
#[derive(Clone, Default)]
pub struct ConnectorFactory {
    constructors: HashMap<DatabaseKind, ConnectorConstructor>,
}

impl ConnectorFactory {
    /// Create a factory with no drivers installed
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory with the `sqlx`-backed drivers for PostgreSQL,
    /// MySQL and SQLite. The document store has no built-in driver.
    pub fn with_sql_drivers() -> Self {
        let mut factory = Self::new();
        for kind in [
            DatabaseKind::Postgresql,
            DatabaseKind::Mysql,
            DatabaseKind::Sqlite,
        ] {
            factory.register(kind, move || Box::new(SqlConnector::new(kind)) as Box<dyn Connector>);
        }
        factory
    }

    /// Install (or replace) the constructor for `kind`
    pub fn register<F>(&mut self, kind: DatabaseKind, constructor: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Connector> + Send + Sync + 'static,
    {
        self.constructors.insert(kind, Arc::new(constructor));
        self
    }

    /// Build a connector for `kind`
    pub fn create(&self, kind: DatabaseKind) -> Result<Box<dyn Connector>> {
        self.constructors
            .get(&kind)
            .map(|constructor| constructor())
            .ok_or(Error::UnsupportedKind(kind))
    }

    pub fn supports(&self, kind: DatabaseKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Get list of supported database types
    pub fn supported_kinds(&self) -> Vec<DatabaseKind> {
        self.constructors.keys().copied().collect()
    }
}
