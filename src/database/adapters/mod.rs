//! Connector implementations for the built-in database kinds

pub mod sql;

pub use sql::SqlConnector;
