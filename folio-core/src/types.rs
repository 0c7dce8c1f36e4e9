//! Core value and document types for folio
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Document** | A serializable, id-addressable application object |
//! | **Collection** | A named group of documents sharing a table suffix |
//! | **Index** | A projection from a document to relational rows, kept in sync with mutations |
//! | **Session** | A unit-of-work with identity map and deferred flush |
//! | **Snapshot** | The encoded payload captured at load or last flush, used for change detection |
//!
//! Documents are stored one row per document in a wide table keyed by a
//! store-unique 64-bit id. Everything the library sends to or reads from a
//! backend goes through [`Value`], which backends translate to their native
//! parameter and column representations.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::any::Any;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{Error, Result};

// ============================================
// SQL scalar types
// ============================================

/// Portable column types. Each dialect maps these to its native type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Int64,
    Int32,
    Bool,
    /// Bounded string with a maximum character length.
    String(u32),
    /// Unbounded text.
    Text,
    /// UTC timestamp.
    DateTime,
    Guid,
    Blob,
    /// Fixed-point decimal with precision and scale.
    Decimal(u8, u8),
}

// ============================================
// Values
// ============================================

/// A scalar exchanged with a backend: a query parameter, an index cell, or
/// a column read back from a row.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i64),
    Real(f64),
    Bool(bool),
    Text(String),
    Blob(Vec<u8>),
    DateTime(DateTime<Utc>),
}

impl Value {
    /// Discriminant rank used for cross-variant ordering.
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) => 1,
            Value::Real(_) => 2,
            Value::Bool(_) => 3,
            Value::Text(_) => 4,
            Value::Blob(_) => 5,
            Value::DateTime(_) => 6,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Timestamps read back from backends that store them as text parse
    /// lazily here.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            Value::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }
}

// Full equality, ordering and hashing are needed because index rows are
// diffed as sets. Reals compare by total order and hash by bit pattern.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Real(a), Value::Real(b)) => a.total_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Int(i) => i.hash(state),
            Value::Real(f) => f.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Text(s) => s.hash(state),
            Value::Blob(b) => b.hash(state),
            Value::DateTime(dt) => dt.hash(state),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

// ============================================
// Rows
// ============================================

/// A row read back from a backend: column names plus values in select order.
///
/// Column names are shared across all rows of a result set.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Value at a select-list position.
    pub fn at(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value by column name (case-insensitive, matching the loosest backend).
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|i| self.values.get(i))
    }

    pub fn i64(&self, name: &str) -> Result<i64> {
        self.value(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Database(format!("column {name} is not an integer")))
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        self.value(name)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Database(format!("column {name} is not text")))
    }

    /// Blob column, tolerating backends that hand blobs back as text.
    pub fn blob(&self, name: &str) -> Result<Vec<u8>> {
        match self.value(name) {
            Some(Value::Blob(b)) => Ok(b.clone()),
            Some(Value::Text(s)) => Ok(s.as_bytes().to_vec()),
            _ => Err(Error::Database(format!("column {name} is not a blob"))),
        }
    }
}

// ============================================
// Documents
// ============================================

/// Tracked state of a document within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    /// Loaded and unchanged since the snapshot was taken.
    Clean,
    /// Snapshot diff found changed bytes at flush.
    Modified,
    /// Saved into the session without an existing row.
    New,
    /// Scheduled for removal at flush.
    Deleted,
    /// The owning session is gone; the entry is inert.
    Detached,
}

/// A persistable application object.
///
/// Implementors carry their own id field; the session assigns ids to new
/// documents from its reserved range and writes them back through
/// [`Document::set_id`]. The type tag discriminates rows in the document
/// table and keys the index registry; it must be stable across versions of
/// the application.
///
/// ```rust,ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Person { id: i64, name: String }
///
/// impl Document for Person {
///     const TYPE: &'static str = "Person";
///     fn id(&self) -> i64 { self.id }
///     fn set_id(&mut self, id: i64) { self.id = id; }
/// }
/// ```
pub trait Document: Any + Send + Clone + Serialize + DeserializeOwned + 'static {
    /// Stable type discriminator stored in the document table.
    const TYPE: &'static str;

    /// Collection this document type belongs to. The default collection has
    /// the empty suffix.
    const COLLECTION: &'static str = "";

    /// Current id; zero means "not yet persisted".
    fn id(&self) -> i64;

    /// Called by the session when an id is assigned.
    fn set_id(&mut self, id: i64);
}
