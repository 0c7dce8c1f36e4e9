//! SQL dialect abstraction
//!
//! Everything backend-specific the rest of the library needs is funneled
//! through the [`Dialect`] trait: identifier quoting, parameter placeholder
//! syntax, type names, paging, DDL rendering and batch-size ceilings.
//! Dialects are stateless; one is selected at store construction and never
//! changes.
//!
//! Built-in dialects: [`SqliteDialect`], [`PostgresDialect`],
//! [`MySqlDialect`], [`SqlServerDialect`].

mod mssql;
mod mysql;
mod postgres;
mod sqlite;

pub use mssql::SqlServerDialect;
pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use serde::Deserialize;

use crate::schema::{ColumnDef, TableDef};
use crate::types::{SqlType, Value};

/// Transaction isolation level requested for flushes.
///
/// The default is read-committed; SQLite ignores the setting (its
/// transactions are always serializable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn sql_name(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Per-backend SQL rendering capabilities.
///
/// All table names passed in are logical names with the store prefix already
/// applied; the dialect is responsible for quoting and schema qualification.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Quote a single identifier.
    fn quote(&self, ident: &str) -> String;

    /// Render a possibly schema-qualified table reference.
    fn table(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(s) => format!("{}.{}", self.quote(s), self.quote(name)),
            None => self.quote(name),
        }
    }

    /// Parameter placeholder for the 1-based position within a statement.
    fn placeholder(&self, position: usize) -> String;

    /// Native name for a portable column type.
    fn type_name(&self, ty: SqlType) -> String;

    /// Backend ceiling on parameters per statement; batch inserts chunk
    /// under this.
    fn max_parameters(&self) -> usize;

    /// Additional per-statement row cap for multi-row VALUES, if any.
    fn max_rows_per_insert(&self) -> Option<usize> {
        None
    }

    /// Whether the paging clause is only valid after an ORDER BY.
    fn requires_order_for_paging(&self) -> bool {
        false
    }

    /// Render the paging clause, leading space included. Empty string when
    /// neither skip nor take is set.
    fn paging(&self, skip: Option<u64>, take: Option<u64>) -> String;

    // ============================================
    // DDL
    // ============================================

    /// Column rendering inside CREATE TABLE / ADD COLUMN.
    fn column_sql(&self, column: &ColumnDef) -> String {
        let mut sql = format!("{} {}", self.quote(&column.name), self.type_name(column.ty));
        if column.identity {
            sql.push(' ');
            sql.push_str(self.identity_clause());
        }
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        sql
    }

    /// Keyword(s) marking an auto-generated column.
    fn identity_clause(&self) -> &'static str;

    fn create_table(&self, schema: Option<&str>, def: &TableDef) -> String {
        let mut sql = format!("CREATE TABLE {} (", self.table(schema, &def.name));
        let cols: Vec<String> = def.columns.iter().map(|c| self.column_sql(c)).collect();
        sql.push_str(&cols.join(", "));
        let pk: Vec<String> = def
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| self.quote(&c.name))
            .collect();
        if !pk.is_empty() {
            sql.push_str(&format!(", PRIMARY KEY ({})", pk.join(", ")));
        }
        sql.push(')');
        sql
    }

    fn add_column(&self, schema: Option<&str>, table: &str, column: &ColumnDef) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.table(schema, table),
            self.column_sql(column)
        )
    }

    fn drop_column(&self, schema: Option<&str>, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.table(schema, table),
            self.quote(column)
        )
    }

    fn create_index(
        &self,
        schema: Option<&str>,
        table: &str,
        name: &str,
        columns: &[&str],
        unique: bool,
    ) -> String {
        let cols: Vec<String> = columns.iter().map(|c| self.quote(c)).collect();
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            self.quote(name),
            self.table(schema, table),
            cols.join(", ")
        )
    }

    fn drop_index(&self, schema: Option<&str>, table: &str, name: &str) -> String {
        // Most backends scope index names to the table's schema; SQL Server
        // overrides with its ON-table form.
        let _ = table;
        match schema {
            Some(s) => format!("DROP INDEX {}.{}", self.quote(s), self.quote(name)),
            None => format!("DROP INDEX {}", self.quote(name)),
        }
    }

    fn drop_table(&self, schema: Option<&str>, name: &str) -> String {
        format!("DROP TABLE {}", self.table(schema, name))
    }

    fn create_foreign_key(
        &self,
        schema: Option<&str>,
        name: &str,
        table: &str,
        columns: &[&str],
        ref_table: &str,
        ref_columns: &[&str],
    ) -> String {
        let cols: Vec<String> = columns.iter().map(|c| self.quote(c)).collect();
        let ref_cols: Vec<String> = ref_columns.iter().map(|c| self.quote(c)).collect();
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.table(schema, table),
            self.quote(name),
            cols.join(", "),
            self.table(schema, ref_table),
            ref_cols.join(", ")
        )
    }

    /// Probe query returning at least one row when the table exists. Used
    /// for portable idempotent bootstrap.
    fn table_exists(&self, schema: Option<&str>, name: &str) -> (String, Vec<Value>);

    /// Statement toggling explicit inserts into an identity column, where
    /// the backend requires one.
    fn identity_insert(&self, _schema: Option<&str>, _table: &str, _enable: bool) -> Option<String> {
        None
    }

    /// Statement selecting the transaction isolation level, if the backend
    /// has one.
    fn isolation(&self, level: IsolationLevel) -> Option<String>;

    /// Whether the isolation statement runs inside the transaction
    /// (PostgreSQL) rather than before BEGIN (MySQL, SQL Server).
    fn isolation_after_begin(&self) -> bool {
        false
    }
}

// ============================================
// Batch inserts
// ============================================

/// Render a multi-row INSERT for `rows`, chunked so that every statement
/// stays under both the dialect's parameter ceiling and its per-statement
/// row cap. `max_parameters` of zero means "use the dialect default".
///
/// Returns one `(sql, params)` pair per chunk; the caller executes them all
/// inside its open transaction.
pub fn insert_batches(
    dialect: &dyn Dialect,
    max_parameters: usize,
    schema: Option<&str>,
    table: &str,
    columns: &[String],
    rows: Vec<Vec<Value>>,
) -> Vec<(String, Vec<Value>)> {
    if rows.is_empty() || columns.is_empty() {
        return Vec::new();
    }
    let ceiling = if max_parameters == 0 {
        dialect.max_parameters()
    } else {
        max_parameters
    };
    let mut per_stmt = std::cmp::max(1, ceiling / columns.len());
    if let Some(cap) = dialect.max_rows_per_insert() {
        per_stmt = std::cmp::min(per_stmt, cap);
    }

    let quoted: Vec<String> = columns.iter().map(|c| dialect.quote(c)).collect();
    let head = format!(
        "INSERT INTO {} ({}) VALUES ",
        dialect.table(schema, table),
        quoted.join(", ")
    );

    let mut batches = Vec::new();
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        let chunk: Vec<Vec<Value>> = rows.by_ref().take(per_stmt).collect();
        let mut sql = head.clone();
        let mut params = Vec::with_capacity(chunk.len() * columns.len());
        for (r, row) in chunk.into_iter().enumerate() {
            if r > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for (c, value) in row.into_iter().enumerate() {
                if c > 0 {
                    sql.push_str(", ");
                }
                params.push(value);
                sql.push_str(&dialect.placeholder(params.len()));
            }
            sql.push(')');
        }
        batches.push((sql, params));
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize) -> Vec<Vec<Value>> {
        (0..n)
            .map(|i| vec![Value::Int(i as i64), Value::Text(format!("v{i}"))])
            .collect()
    }

    #[test]
    fn batches_fit_under_parameter_ceiling() {
        let d = SqliteDialect;
        // 2 columns, ceiling 6 -> 3 rows per statement
        let batches = insert_batches(&d, 6, None, "T", &["A".into(), "B".into()], rows(7));
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].1.len(), 6);
        assert_eq!(batches[2].1.len(), 2);
        assert!(batches[0].0.starts_with("INSERT INTO \"T\" (\"A\", \"B\") VALUES "));
    }

    #[test]
    fn row_cap_applies_independently() {
        let d = SqlServerDialect;
        // Ceiling would allow 1050 two-column rows, but T-SQL caps a VALUES
        // list at 1000 rows.
        let batches = insert_batches(&d, 0, None, "T", &["A".into(), "B".into()], rows(1001));
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].1.len(), 2000);
    }

    #[test]
    fn empty_input_renders_nothing() {
        let d = SqliteDialect;
        assert!(insert_batches(&d, 0, None, "T", &["A".into()], vec![]).is_empty());
    }
}
