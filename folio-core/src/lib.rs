//! # folio-core
//!
//! A document database library layered on relational SQL engines.
//!
//! Applications persist arbitrary serializable objects ("documents") and
//! query them through user-declared index projections that are materialized
//! as ordinary tables and kept in sync with document mutations. The library
//! provides:
//!
//! - Unit-of-work sessions with an identity map, snapshot-based change
//!   detection, and a single atomic flush transaction
//! - Map and reduce indexes maintained by minimal insert/update/delete
//!   diffs
//! - A typed query surface compiled to parameterized SQL per dialect
//! - Dialects for SQLite, PostgreSQL, MySQL and SQL Server, plus a bundled
//!   rusqlite backend for embedded use
//!
//! ## Example
//!
//! ```rust,no_run
//! use folio_core::{Document, IndexColumn, IndexRow, IndexSpec, SqlType, Store};
//! use folio_core::backend::SqliteFactory;
//! use folio_core::dialect::SqliteDialect;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Person { id: i64, name: String }
//!
//! impl Document for Person {
//!     const TYPE: &'static str = "Person";
//!     fn id(&self) -> i64 { self.id }
//!     fn set_id(&mut self, id: i64) { self.id = id; }
//! }
//!
//! # async fn run() -> folio_core::Result<()> {
//! let store = Store::builder()
//!     .dialect(SqliteDialect)
//!     .factory(SqliteFactory::open_in_memory()?)
//!     .register_index(IndexSpec::map::<Person, _>(
//!         "ByName",
//!         vec![IndexColumn::new("Name", SqlType::Text)],
//!         |p| vec![IndexRow::new(vec![p.name.clone().into()])],
//!     ))
//!     .build()?;
//! store.initialize().await?;
//!
//! let mut session = store.create_session().await?;
//! let id = session.save(Person { id: 0, name: "ada".into() })?;
//! session.save_changes().await?;
//!
//! let found: Vec<Person> = session
//!     .query::<Person>("ByName")
//!     .filter(folio_core::Predicate::eq("Name", "ada"))
//!     .list()
//!     .await?;
//! assert_eq!(found[0].id, id);
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use codec::{Codec, JsonCodec};
pub use config::StoreOptions;
pub use error::{Error, Result};
pub use index::{Aggregate, IndexColumn, IndexRow, IndexSpec};
pub use query::{CompareOp, Order, Predicate, Query};
pub use session::Session;
pub use store::{Store, StoreBuilder};
pub use types::{Document, DocumentState, Row, SqlType, Value};

// Public modules
pub mod backend;
pub mod codec;
pub mod config;
pub mod dialect;
pub mod error;
pub mod index;
pub mod logging;
pub mod query;
pub mod schema;
pub mod session;
pub mod store;
pub mod types;
