//! MySQL dialect (8+)

use super::{Dialect, IsolationLevel};
use crate::types::{SqlType, Value};

#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn placeholder(&self, _position: usize) -> String {
        "?".to_string()
    }

    fn type_name(&self, ty: SqlType) -> String {
        match ty {
            SqlType::Int64 => "BIGINT".to_string(),
            SqlType::Int32 => "INT".to_string(),
            SqlType::Bool => "TINYINT(1)".to_string(),
            SqlType::String(n) => format!("VARCHAR({n})"),
            SqlType::Text => "LONGTEXT".to_string(),
            SqlType::DateTime => "DATETIME(6)".to_string(),
            SqlType::Guid => "CHAR(36)".to_string(),
            SqlType::Blob => "LONGBLOB".to_string(),
            SqlType::Decimal(p, s) => format!("DECIMAL({p}, {s})"),
        }
    }

    fn max_parameters(&self) -> usize {
        65535
    }

    fn paging(&self, skip: Option<u64>, take: Option<u64>) -> String {
        match (skip, take) {
            (None, None) => String::new(),
            (None, Some(t)) => format!(" LIMIT {t}"),
            // MySQL has no offset-without-limit form; the documented idiom
            // is an unreachably large limit.
            (Some(s), None) => format!(" LIMIT 18446744073709551615 OFFSET {s}"),
            (Some(s), Some(t)) => format!(" LIMIT {t} OFFSET {s}"),
        }
    }

    fn identity_clause(&self) -> &'static str {
        "AUTO_INCREMENT"
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
                "SELECT 1 FROM information_schema.tables WHERE table_schema = ? AND table_name = ?"
                    .to_string(),
                vec![Value::Text(s.to_string()), Value::Text(name.to_string())],
            ),
            None => (
                "SELECT 1 FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = ?"
                    .to_string(),
                vec![Value::Text(name.to_string())],
            ),
        }
    }

    fn isolation(&self, level: IsolationLevel) -> Option<String> {
        // Runs before START TRANSACTION and applies to the next transaction.
        Some(format!(
            "SET TRANSACTION ISOLATION LEVEL {}",
            level.sql_name()
        ))
    }
}
