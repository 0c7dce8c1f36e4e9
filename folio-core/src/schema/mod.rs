//! Schema management
//!
//! Table definitions, the migration API hosting applications drive, and the
//! bootstrap plan for the library's own tables (the document tables, the
//! `Identifiers` table, and one table pair per registered index). Every
//! operation renders through the dialect and executes on the caller's
//! connection; [`crate::store::Store::initialize`] wraps the whole bootstrap
//! in a single transaction.

use std::sync::Arc;

use crate::backend::Connection;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::index::IndexSpec;
use crate::types::SqlType;

// ============================================
// Definitions
// ============================================

/// A column in a table definition.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub ty: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
    pub identity: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            primary_key: false,
            identity: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }
}

/// A table definition.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }
}

/// A single ALTER TABLE operation. Add/drop column is the limit of index
/// schema evolution.
#[derive(Debug, Clone)]
pub enum AlterOp {
    AddColumn(ColumnDef),
    DropColumn(String),
}

// ============================================
// Naming
// ============================================

/// Computes the physical table names for a configured prefix and optional
/// schema. Collections map to a `Document` table suffix; map index tables
/// and reduce bridge tables share the `_Document` suffix (an index is one
/// or the other).
#[derive(Debug, Clone)]
pub struct Naming {
    prefix: String,
    schema: Option<String>,
}

impl Naming {
    pub fn new(prefix: impl Into<String>, schema: Option<String>) -> Self {
        Self {
            prefix: prefix.into(),
            schema,
        }
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn document_table(&self, collection: &str) -> String {
        if collection.is_empty() {
            format!("{}Document", self.prefix)
        } else {
            format!("{}Document_{}", self.prefix, collection)
        }
    }

    pub fn identifiers_table(&self) -> String {
        format!("{}Identifiers", self.prefix)
    }

    pub fn map_table(&self, index: &str) -> String {
        format!("{}{}_Document", self.prefix, index)
    }

    pub fn reduced_table(&self, index: &str) -> String {
        format!("{}{}_Reduced", self.prefix, index)
    }

    pub fn bridge_table(&self, index: &str) -> String {
        self.map_table(index)
    }
}

// ============================================
// Migration API
// ============================================

/// Ordered, idempotent schema operations over one connection.
///
/// Hosting applications use this for their own migrations; the store uses
/// it for bootstrap. The manager does not open transactions; callers
/// bracket it.
pub struct SchemaManager<'a> {
    dialect: &'a dyn Dialect,
    schema: Option<&'a str>,
    conn: &'a mut dyn Connection,
}

impl<'a> SchemaManager<'a> {
    pub fn new(
        dialect: &'a dyn Dialect,
        schema: Option<&'a str>,
        conn: &'a mut dyn Connection,
    ) -> Self {
        Self {
            dialect,
            schema,
            conn,
        }
    }

    pub async fn table_exists(&mut self, name: &str) -> Result<bool> {
        let (sql, params) = self.dialect.table_exists(self.schema, name);
        let rows = self.conn.query(&sql, &params).await?;
        Ok(!rows.is_empty())
    }

    pub async fn create_table(&mut self, def: &TableDef) -> Result<()> {
        let sql = self.dialect.create_table(self.schema, def);
        tracing::debug!(table = %def.name, "Creating table");
        self.conn.execute(&sql, &[]).await?;
        Ok(())
    }

    /// Create the table unless it already exists. Returns true when it was
    /// created.
    pub async fn ensure_table(&mut self, def: &TableDef) -> Result<bool> {
        if self.table_exists(&def.name).await? {
            return Ok(false);
        }
        self.create_table(def).await?;
        Ok(true)
    }

    pub async fn alter_table(&mut self, table: &str, ops: &[AlterOp]) -> Result<()> {
        for op in ops {
            let sql = match op {
                AlterOp::AddColumn(col) => self.dialect.add_column(self.schema, table, col),
                AlterOp::DropColumn(name) => self.dialect.drop_column(self.schema, table, name),
            };
            self.conn.execute(&sql, &[]).await?;
        }
        Ok(())
    }

    pub async fn create_index(
        &mut self,
        table: &str,
        columns: &[&str],
        unique: bool,
    ) -> Result<()> {
        let name = index_name(table, columns);
        let sql = self
            .dialect
            .create_index(self.schema, table, &name, columns, unique);
        self.conn.execute(&sql, &[]).await?;
        Ok(())
    }

    pub async fn drop_index(&mut self, table: &str, columns: &[&str]) -> Result<()> {
        let name = index_name(table, columns);
        let sql = self.dialect.drop_index(self.schema, table, &name);
        self.conn.execute(&sql, &[]).await?;
        Ok(())
    }

    pub async fn drop_table(&mut self, name: &str) -> Result<()> {
        let sql = self.dialect.drop_table(self.schema, name);
        self.conn.execute(&sql, &[]).await?;
        Ok(())
    }

    pub async fn create_foreign_key(
        &mut self,
        table: &str,
        columns: &[&str],
        ref_table: &str,
        ref_columns: &[&str],
    ) -> Result<()> {
        let name = format!("FK_{}_{}", table, ref_table);
        let sql = self
            .dialect
            .create_foreign_key(self.schema, &name, table, columns, ref_table, ref_columns);
        self.conn.execute(&sql, &[]).await?;
        Ok(())
    }
}

/// Deterministic index name so create and drop agree.
fn index_name(table: &str, columns: &[&str]) -> String {
    format!("IX_{}_{}", table, columns.join("_"))
}

// ============================================
// Bootstrap plan
// ============================================

/// A secondary SQL index to create right after its table.
#[derive(Debug, Clone)]
pub struct IndexDdl {
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Tables and SQL indexes the store needs before any session runs.
#[derive(Debug, Clone, Default)]
pub struct BootstrapPlan {
    pub tables: Vec<TableDef>,
    pub indexes: Vec<IndexDdl>,
}

/// Compute the bootstrap plan for the configured collections and registered
/// indexes.
pub fn bootstrap_plan(
    naming: &Naming,
    collections: &[String],
    indexes: &[Arc<IndexSpec>],
) -> BootstrapPlan {
    let mut plan = BootstrapPlan::default();

    for collection in collections {
        plan.tables.push(
            TableDef::new(naming.document_table(collection))
                .column(ColumnDef::new("Id", SqlType::Int64).primary_key())
                .column(ColumnDef::new("Type", SqlType::String(255)))
                .column(ColumnDef::new("Content", SqlType::Blob))
                .column(ColumnDef::new("Version", SqlType::Int64)),
        );
    }

    plan.tables.push(
        TableDef::new(naming.identifiers_table())
            .column(ColumnDef::new("Dimension", SqlType::String(255)).primary_key())
            .column(ColumnDef::new("NextValue", SqlType::Int64)),
    );

    for index in indexes {
        match index.reduce_spec() {
            None => {
                let table = naming.map_table(index.name());
                let mut def = TableDef::new(&table)
                    .column(ColumnDef::new("DocumentId", SqlType::Int64));
                for col in index.columns() {
                    let mut c = ColumnDef::new(&col.name, col.ty);
                    if col.nullable {
                        c = c.nullable();
                    }
                    def = def.column(c);
                }
                plan.tables.push(def);
                plan.indexes.push(IndexDdl {
                    table,
                    columns: vec!["DocumentId".to_string()],
                    unique: false,
                });
            }
            Some(reduce) => {
                let reduced = naming.reduced_table(index.name());
                let mut def = TableDef::new(&reduced)
                    .column(ColumnDef::new("Id", SqlType::Int64).primary_key());
                for col in index.columns() {
                    let mut c = ColumnDef::new(&col.name, col.ty);
                    if col.nullable {
                        c = c.nullable();
                    }
                    def = def.column(c);
                }
                plan.tables.push(def);
                plan.indexes.push(IndexDdl {
                    table: reduced.clone(),
                    columns: index.columns()[..reduce.key_len]
                        .iter()
                        .map(|c| c.name.clone())
                        .collect(),
                    unique: false,
                });

                let bridge = naming.bridge_table(index.name());
                plan.tables.push(
                    TableDef::new(&bridge)
                        .column(ColumnDef::new("DocumentId", SqlType::Int64))
                        .column(ColumnDef::new("ReducedId", SqlType::Int64)),
                );
                plan.indexes.push(IndexDdl {
                    table: bridge.clone(),
                    columns: vec!["DocumentId".to_string()],
                    unique: false,
                });
                plan.indexes.push(IndexDdl {
                    table: bridge,
                    columns: vec!["ReducedId".to_string()],
                    unique: false,
                });
            }
        }
    }

    plan
}
