//! PostgreSQL dialect (11+)

use super::{Dialect, IsolationLevel};
use crate::types::{SqlType, Value};

#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn placeholder(&self, position: usize) -> String {
        format!("${position}")
    }

    fn type_name(&self, ty: SqlType) -> String {
        match ty {
            SqlType::Int64 => "BIGINT".to_string(),
            SqlType::Int32 => "INTEGER".to_string(),
            SqlType::Bool => "BOOLEAN".to_string(),
            SqlType::String(n) => format!("VARCHAR({n})"),
            SqlType::Text => "TEXT".to_string(),
            SqlType::DateTime => "TIMESTAMPTZ".to_string(),
            SqlType::Guid => "UUID".to_string(),
            SqlType::Blob => "BYTEA".to_string(),
            SqlType::Decimal(p, s) => format!("NUMERIC({p}, {s})"),
        }
    }

    fn max_parameters(&self) -> usize {
        65535
    }

    fn paging(&self, skip: Option<u64>, take: Option<u64>) -> String {
        let mut sql = String::new();
        if let Some(t) = take {
            sql.push_str(&format!(" LIMIT {t}"));
        }
        if let Some(s) = skip {
            sql.push_str(&format!(" OFFSET {s}"));
        }
        sql
    }

    fn identity_clause(&self) -> &'static str {
        "GENERATED BY DEFAULT AS IDENTITY"
    }

    fn table_exists(&self, schema: Option<&str>, name: &str) -> (String, Vec<Value>) {
        match schema {
            Some(s) => (
                "SELECT 1 FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2"
                    .to_string(),
                vec![Value::Text(s.to_string()), Value::Text(name.to_string())],
            ),
            None => (
                "SELECT 1 FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = $1"
                    .to_string(),
                vec![Value::Text(name.to_string())],
            ),
        }
    }

    fn isolation(&self, level: IsolationLevel) -> Option<String> {
        Some(format!(
            "SET TRANSACTION ISOLATION LEVEL {}",
            level.sql_name()
        ))
    }

    fn isolation_after_begin(&self) -> bool {
        // SET TRANSACTION applies to the transaction it runs inside.
        true
    }
}
