//! Logical connection definitions and driver result types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Supported database types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Postgresql,
    Mysql,
    Sqlite,
    Mongodb,
}

impl DatabaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Postgresql => "postgresql",
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::Sqlite => "sqlite",
            DatabaseKind::Mongodb => "mongodb",
        }
    }

    /// Whether the kind speaks SQL (and therefore has statement caching)
    pub fn is_sql(&self) -> bool {
        !matches!(self, DatabaseKind::Mongodb)
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-defined database target, independent of any live session.
///
/// Owned by the persisted connection store; the core only keeps snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalConnection {
    pub id: String,
    pub name: String,
    #[serde(rename = "db_type")]
    pub kind: DatabaseKind,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name, or the file path for SQLite
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl LogicalConnection {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: DatabaseKind,
        database: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            host: None,
            port: None,
            database: database.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Result of a statement executed through a connector
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub success: bool,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    #[serde(default)]
    pub affected_rows: u64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl QueryOutcome {
    pub fn rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let row_count = rows.len();
        Self {
            success: true,
            columns,
            rows,
            row_count,
            ..Default::default()
        }
    }

    pub fn affected(affected_rows: u64) -> Self {
        Self {
            success: true,
            affected_rows,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_execution_time(mut self, ms: u64) -> Self {
        self.execution_time_ms = ms;
        self
    }
}

/// Column description returned by schema introspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connection_deserializes_from_store_format() {
        let conn: LogicalConnection = serde_json::from_value(json!({
            "id": "c1",
            "name": "Local",
            "db_type": "sqlite",
            "database": "/tmp/app.db"
        }))
        .unwrap();

        assert_eq!(conn.kind, DatabaseKind::Sqlite);
        assert!(conn.host.is_none());
        assert_eq!(conn.database, "/tmp/app.db");
    }

    #[test]
    fn test_outcome_row_count() {
        let outcome = QueryOutcome::rows(vec!["id".into()], vec![vec![json!(1)], vec![json!(2)]]);
        assert!(outcome.success);
        assert_eq!(outcome.row_count, 2);
        assert!(!QueryOutcome::failure("boom").success);
    }
}
