//! Backend connection abstraction
//!
//! The library never opens sockets itself: connections come from a
//! caller-supplied [`ConnectionFactory`], which also owns pooling. A
//! [`Connection`] executes parameterized SQL and manages one transaction at
//! a time. The bundled [`SqliteFactory`] backs tests and embedded use;
//! other backends implement these traits over their drivers.

pub mod sqlite;

pub use sqlite::SqliteFactory;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Row, Value};

/// A single database connection.
///
/// `begin`/`commit`/`rollback` bracket at most one open transaction; the
/// adapter must roll back an open transaction when it is dropped.
#[async_trait]
pub trait Connection: Send {
    /// Execute DML/DDL; returns the affected row count.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a query and collect all rows.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a parameter-free script (bootstrap DDL).
    async fn execute_script(&mut self, sql: &str) -> Result<()>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Hands out connections; implementations typically wrap a pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>>;
}
