//! SQL Server dialect (2019+)

use super::{Dialect, IsolationLevel};
use crate::types::{SqlType, Value};

#[derive(Debug, Default, Clone, Copy)]
pub struct SqlServerDialect;

impl Dialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn quote(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn placeholder(&self, position: usize) -> String {
        format!("@p{position}")
    }

    fn type_name(&self, ty: SqlType) -> String {
        match ty {
            SqlType::Int64 => "BIGINT".to_string(),
            SqlType::Int32 => "INT".to_string(),
            SqlType::Bool => "BIT".to_string(),
            SqlType::String(n) => format!("NVARCHAR({n})"),
            SqlType::Text => "NVARCHAR(MAX)".to_string(),
            SqlType::DateTime => "DATETIME2".to_string(),
            SqlType::Guid => "UNIQUEIDENTIFIER".to_string(),
            SqlType::Blob => "VARBINARY(MAX)".to_string(),
            SqlType::Decimal(p, s) => format!("DECIMAL({p}, {s})"),
        }
    }

    fn max_parameters(&self) -> usize {
        2100
    }

    fn max_rows_per_insert(&self) -> Option<usize> {
        // A VALUES table constructor accepts at most 1000 rows.
        Some(1000)
    }

    fn requires_order_for_paging(&self) -> bool {
        // OFFSET ... FETCH is only valid after ORDER BY.
        true
    }

    fn paging(&self, skip: Option<u64>, take: Option<u64>) -> String {
        match (skip, take) {
            (None, None) => String::new(),
            (s, Some(t)) => format!(
                " OFFSET {} ROWS FETCH NEXT {t} ROWS ONLY",
                s.unwrap_or(0)
            ),
            (Some(s), None) => format!(" OFFSET {s} ROWS"),
        }
    }

    fn identity_clause(&self) -> &'static str {
        "IDENTITY(1,1)"
    }

    fn add_column(&self, schema: Option<&str>, table: &str, column: &crate::schema::ColumnDef) -> String {
        // T-SQL omits the COLUMN keyword on ADD.
        format!(
            "ALTER TABLE {} ADD {}",
            self.table(schema, table),
            self.column_sql(column)
        )
    }

    fn drop_index(&self, schema: Option<&str>, table: &str, name: &str) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.quote(name),
            self.table(schema, table)
        )
    }

    fn table_exists(&self, schema: Option<&str>, name: &str) -> (String, Vec<Value>) {
        match schema {
            Some(s) => (
                "SELECT 1 FROM sys.tables t JOIN sys.schemas sc ON sc.schema_id = t.schema_id WHERE sc.name = @p1 AND t.name = @p2"
                    .to_string(),
                vec![Value::Text(s.to_string()), Value::Text(name.to_string())],
            ),
            None => (
                "SELECT 1 FROM sys.tables WHERE name = @p1".to_string(),
                vec![Value::Text(name.to_string())],
            ),
        }
    }

    fn identity_insert(&self, schema: Option<&str>, table: &str, enable: bool) -> Option<String> {
        Some(format!(
            "SET IDENTITY_INSERT {} {}",
            self.table(schema, table),
            if enable { "ON" } else { "OFF" }
        ))
    }

    fn isolation(&self, level: IsolationLevel) -> Option<String> {
        Some(format!(
            "SET TRANSACTION ISOLATION LEVEL {}",
            level.sql_name()
        ))
    }
}
