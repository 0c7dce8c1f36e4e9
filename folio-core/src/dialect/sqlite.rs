//! SQLite dialect

use super::{Dialect, IsolationLevel};
use crate::types::{SqlType, Value};

/// SQLite rendering. The default parameter ceiling is 999
/// (`SQLITE_MAX_VARIABLE_NUMBER` on stock builds).
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn table(&self, _schema: Option<&str>, name: &str) -> String {
        // SQLite has no schemas; attached-database names are out of scope.
        self.quote(name)
    }

    fn placeholder(&self, _position: usize) -> String {
        "?".to_string()
    }

    fn type_name(&self, ty: SqlType) -> String {
        match ty {
            SqlType::Int64 | SqlType::Int32 | SqlType::Bool => "INTEGER".to_string(),
            SqlType::String(_) | SqlType::Text | SqlType::Guid => "TEXT".to_string(),
            SqlType::DateTime => "TEXT".to_string(),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Decimal(_, _) => "NUMERIC".to_string(),
        }
    }

    fn max_parameters(&self) -> usize {
        999
    }

    fn paging(&self, skip: Option<u64>, take: Option<u64>) -> String {
        match (skip, take) {
            (None, None) => String::new(),
            (None, Some(t)) => format!(" LIMIT {t}"),
            // LIMIT -1 means "no limit" and is required before OFFSET.
            (Some(s), None) => format!(" LIMIT -1 OFFSET {s}"),
            (Some(s), Some(t)) => format!(" LIMIT {t} OFFSET {s}"),
        }
    }

    fn identity_clause(&self) -> &'static str {
        "AUTOINCREMENT"
    }

    fn create_table(&self, schema: Option<&str>, def: &crate::schema::TableDef) -> String {
        // AUTOINCREMENT is only legal as "INTEGER PRIMARY KEY AUTOINCREMENT"
        // inline on the column, so identity tables render their own key.
        let identity_pk = def.columns.iter().any(|c| c.identity && c.primary_key);
        if !identity_pk {
            return default_create_table(self, schema, def);
        }
        let mut cols = Vec::new();
        for c in &def.columns {
            if c.identity && c.primary_key {
                cols.push(format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", self.quote(&c.name)));
            } else {
                cols.push(self.column_sql(c));
            }
        }
        format!("CREATE TABLE {} ({})", self.table(schema, &def.name), cols.join(", "))
    }

    fn table_exists(&self, _schema: Option<&str>, name: &str) -> (String, Vec<Value>) {
        (
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?".to_string(),
            vec![Value::Text(name.to_string())],
        )
    }

    fn isolation(&self, _level: IsolationLevel) -> Option<String> {
        // SQLite transactions are always serializable.
        None
    }
}

fn default_create_table(
    d: &SqliteDialect,
    schema: Option<&str>,
    def: &crate::schema::TableDef,
) -> String {
    let mut sql = format!("CREATE TABLE {} (", d.table(schema, &def.name));
    let cols: Vec<String> = def.columns.iter().map(|c| d.column_sql(c)).collect();
    sql.push_str(&cols.join(", "));
    let pk: Vec<String> = def
        .columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| d.quote(&c.name))
        .collect();
    if !pk.is_empty() {
        sql.push_str(&format!(", PRIMARY KEY ({})", pk.join(", ")));
    }
    sql.push(')');
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, TableDef};

    #[test]
    fn paging_renders_limit_offset() {
        let d = SqliteDialect;
        assert_eq!(d.paging(Some(10), Some(5)), " LIMIT 5 OFFSET 10");
        assert_eq!(d.paging(Some(10), None), " LIMIT -1 OFFSET 10");
        assert_eq!(d.paging(None, None), "");
    }

    #[test]
    fn create_table_renders_primary_key() {
        let d = SqliteDialect;
        let def = TableDef::new("Document")
            .column(ColumnDef::new("Id", SqlType::Int64).primary_key())
            .column(ColumnDef::new("Type", SqlType::String(255)))
            .column(ColumnDef::new("Content", SqlType::Blob))
            .column(ColumnDef::new("Version", SqlType::Int64));
        let sql = d.create_table(None, &def);
        assert!(sql.contains("\"Id\" INTEGER NOT NULL"));
        assert!(sql.ends_with("PRIMARY KEY (\"Id\"))"));
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(SqliteDialect.quote("a\"b"), "\"a\"\"b\"");
    }
}
