//! Bundled SQLite backend over rusqlite
//!
//! A single shared connection behind a mutex, the same shape the embedded
//! use case wants: SQLite serializes writers anyway, and handing every
//! session the one connection keeps in-memory databases visible across
//! sessions. rusqlite is synchronous, so the async trait methods complete
//! without suspending.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::ToSql;

use super::{Connection, ConnectionFactory};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Connection factory for a SQLite database file or an in-memory database.
pub struct SqliteFactory {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteFactory {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing and scratch stores).
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl ConnectionFactory for SqliteFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(SqliteConnection {
            conn: Arc::clone(&self.conn),
            in_txn: false,
        }))
    }
}

struct SqliteConnection {
    conn: Arc<Mutex<rusqlite::Connection>>,
    in_txn: bool,
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(sql, rusqlite::params_from_iter(params.iter()))?;
        Ok(affected as u64)
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let columns: Arc<Vec<String>> =
            Arc::new(stmt.column_names().iter().map(|c| c.to_string()).collect());
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(read_value(row.get_ref(i)?)?);
            }
            out.push(Row::new(Arc::clone(&columns), values));
        }
        Ok(out)
    }

    async fn execute_script(&mut self, sql: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(sql)?;
        Ok(())
    }

    async fn begin(&mut self) -> Result<()> {
        if self.in_txn {
            return Err(Error::Database("transaction already open".to_string()));
        }
        self.conn.lock().unwrap().execute_batch("BEGIN IMMEDIATE")?;
        self.in_txn = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn.lock().unwrap().execute_batch("COMMIT")?;
        self.in_txn = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn.lock().unwrap().execute_batch("ROLLBACK")?;
        self.in_txn = false;
        Ok(())
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if self.in_txn {
            let _ = self.conn.lock().unwrap().execute_batch("ROLLBACK");
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sv;
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(Sv::Null),
            Value::Int(i) => ToSqlOutput::Owned(Sv::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Owned(Sv::Real(*f)),
            Value::Bool(b) => ToSqlOutput::Owned(Sv::Integer(*b as i64)),
            Value::Text(s) => ToSqlOutput::Owned(Sv::Text(s.clone())),
            Value::Blob(b) => ToSqlOutput::Owned(Sv::Blob(b.clone())),
            // Stored as RFC 3339 text, matching the dialect's TEXT affinity.
            Value::DateTime(dt) => ToSqlOutput::Owned(Sv::Text(dt.to_rfc3339())),
        })
    }
}

fn read_value(value: ValueRef<'_>) -> Result<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(
            std::str::from_utf8(t)
                .map_err(|e| Error::Database(format!("invalid utf-8 in text column: {e}")))?
                .to_string(),
        ),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    })
}
