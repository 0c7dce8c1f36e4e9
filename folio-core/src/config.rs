//! Store configuration
//!
//! Options are built in code or loaded from a TOML file. Everything is
//! optional; the defaults suit an embedded SQLite store.

use std::path::Path;

use serde::Deserialize;

use crate::dialect::IsolationLevel;
use crate::error::Result;

/// Tunables fixed at store construction.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreOptions {
    /// Prefix applied to every table the store owns.
    #[serde(default)]
    pub table_prefix: String,

    /// Database schema to qualify table names with, where the backend has
    /// schemas.
    #[serde(default)]
    pub schema: Option<String>,

    /// How many ids each reservation grabs from the `Identifiers` table.
    #[serde(default = "default_id_block_size")]
    pub id_block_size: i64,

    /// Isolation level for flush transactions.
    #[serde(default)]
    pub isolation: IsolationLevel,

    /// Override for the dialect's parameter-count ceiling; zero keeps the
    /// dialect default. Mostly useful to force small batches in tests.
    #[serde(default)]
    pub max_parameters: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            table_prefix: String::new(),
            schema: None,
            id_block_size: default_id_block_size(),
            isolation: IsolationLevel::default(),
            max_parameters: 0,
        }
    }
}

fn default_id_block_size() -> i64 {
    64
}

impl StoreOptions {
    /// Load options from a TOML file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let opts = StoreOptions::default();
        assert_eq!(opts.table_prefix, "");
        assert_eq!(opts.id_block_size, 64);
        assert_eq!(opts.isolation, IsolationLevel::ReadCommitted);
        assert_eq!(opts.max_parameters, 0);
    }

    #[test]
    fn toml_overrides_defaults() {
        let opts = StoreOptions::from_toml_str(
            r#"
            table_prefix = "App_"
            id_block_size = 16
            isolation = "serializable"
            "#,
        )
        .unwrap();
        assert_eq!(opts.table_prefix, "App_");
        assert_eq!(opts.id_block_size, 16);
        assert_eq!(opts.isolation, IsolationLevel::Serializable);
        assert!(opts.schema.is_none());
    }

    #[test]
    fn bad_toml_is_a_configuration_error() {
        let err = StoreOptions::from_toml_str("id_block_size = \"lots\"").unwrap_err();
        assert!(matches!(err, crate::Error::Configuration(_)));
    }
}
