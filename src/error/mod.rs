use std::time::Duration;
use thiserror::Error;

use crate::database::DatabaseKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the connection, lock and cache core
#[derive(Error, Debug)]
pub enum Error {
    // Connection lifecycle
    #[error("Connection '{id}' failed: {message}")]
    ConnectFailed { id: String, message: String },

    #[error("Connection '{id}' timed out after {timeout:?}")]
    ConnectTimeout { id: String, timeout: Duration },

    #[error("Connection '{0}' is not connected")]
    NotConnected(String),

    #[error("Unsupported database type: {0}")]
    UnsupportedKind(DatabaseKind),

    // Operation lock
    #[error("Connection '{id}' is busy: another operation is in progress (waited {waited:?})")]
    Busy { id: String, waited: Duration },

    // Driver calls
    #[error("Query error: {0}")]
    Query(String),

    #[error("Query timed out after {0:?}")]
    QueryTimeout(Duration),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database driver error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    // Error with context chain
    #[error("{message}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn connect_failed(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn connect_timeout(id: impl Into<String>, timeout: Duration) -> Self {
        Self::ConnectTimeout {
            id: id.into(),
            timeout,
        }
    }

    pub fn busy(id: impl Into<String>, waited: Duration) -> Self {
        Self::Busy {
            id: id.into(),
            waited,
        }
    }

    pub fn not_connected(id: impl Into<String>) -> Self {
        Self::NotConnected(id.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    // Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    /// The lock could not be taken in time; the caller should retry shortly.
    pub fn is_busy(&self) -> bool {
        match self {
            Error::Busy { .. } => true,
            Error::WithContext { source, .. } => source.is_busy(),
            _ => false,
        }
    }

    /// Check if error is retryable
    ///
    /// `ConnectFailed` is deliberately excluded: bad credentials or an
    /// unreachable host are surfaced to the caller, never retried here.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Busy { .. } | Error::ConnectTimeout { .. } | Error::QueryTimeout(_) => true,
            Error::WithContext { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::ConnectFailed { .. } => "E_CONNECT_FAILED",
            Error::ConnectTimeout { .. } => "E_CONNECT_TIMEOUT",
            Error::NotConnected(_) => "E_NOT_CONNECTED",
            Error::UnsupportedKind(_) => "E_UNSUPPORTED_KIND",
            Error::Busy { .. } => "E_BUSY",
            Error::Query(_) => "E_QUERY",
            Error::QueryTimeout(_) => "E_QUERY_TIMEOUT",
            Error::InvalidInput(_) => "E_INVALID_INPUT",
            Error::Config(_) => "E_CONFIG",
            Error::Storage(_) => "E_STORAGE",
            Error::Io(_) => "E_IO",
            Error::Json(_) => "E_JSON",
            Error::Sqlx(_) => "E_DRIVER",
            Error::Internal(_) => "E_INTERNAL",
            Error::WithContext { source, .. } => source.error_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_is_distinguishable() {
        let err = Error::busy("c1", Duration::from_secs(1));
        assert!(err.is_busy());
        assert!(err.is_retryable());
        assert_eq!(err.error_code(), "E_BUSY");

        let failed = Error::connect_failed("c1", "password authentication failed");
        assert!(!failed.is_busy());
        assert!(!failed.is_retryable());
    }

    #[test]
    fn test_connect_failed_keeps_driver_message() {
        let err = Error::connect_failed("c1", "FATAL: database \"nope\" does not exist");
        assert_eq!(
            err.to_string(),
            "Connection 'c1' failed: FATAL: database \"nope\" does not exist"
        );
    }

    #[test]
    fn test_context_preserves_code() {
        let err = Error::busy("c1", Duration::from_millis(5)).with_context("Updating row");
        assert!(err.is_busy());
        assert_eq!(err.error_code(), "E_BUSY");
        assert_eq!(err.to_string(), "Updating row");
    }
}
