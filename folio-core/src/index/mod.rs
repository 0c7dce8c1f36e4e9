//! Index descriptors and registry
//!
//! An index is a user-declared projection from a document to rows of a
//! fixed relational shape. Map indexes emit zero or more rows per document;
//! reduce indexes additionally group map output by a key prefix and
//! aggregate the remaining columns across all contributing documents.
//!
//! Dispatch is dynamic: the registry is keyed by document type tag and
//! holds descriptors carrying the column schema and an erased map closure.
//! Registration wraps the caller's typed closure, so downstream code never
//! sees the document type.

pub mod engine;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{Document, SqlType, Value};

// ============================================
// Columns and rows
// ============================================

/// A typed column of an index projection.
#[derive(Debug, Clone)]
pub struct IndexColumn {
    pub name: String,
    pub ty: SqlType,
    pub nullable: bool,
}

impl IndexColumn {
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// One projected row; values in column-schema order. Rows have no identity
/// beyond their contents, so they compare and hash by value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexRow {
    values: Vec<Value>,
}

impl IndexRow {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

// ============================================
// Aggregation
// ============================================

/// Per-column aggregation function for reduce indexes.
///
/// `Count` and `Sum` are invertible (a monoid with subtraction), so removed
/// contributions can be un-merged in place. `Min` and `Max` are not; when a
/// contribution is removed, the affected group is re-aggregated from its
/// remaining documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Number of contributing map rows; the column value in map output is
    /// ignored.
    Count,
    Sum,
    Min,
    Max,
}

impl Aggregate {
    pub fn invertible(&self) -> bool {
        matches!(self, Aggregate::Count | Aggregate::Sum)
    }
}

/// Reduce shape: the first `key_len` columns are the group key, the rest
/// carry one [`Aggregate`] each.
#[derive(Debug, Clone)]
pub struct ReduceSpec {
    pub key_len: usize,
    pub aggregates: Vec<Aggregate>,
}

impl ReduceSpec {
    /// True when every column can be un-merged without a rescan.
    pub fn invertible(&self) -> bool {
        self.aggregates.iter().all(Aggregate::invertible)
    }
}

// ============================================
// Descriptors
// ============================================

type MapFn = Box<dyn Fn(&serde_json::Value) -> Result<Vec<IndexRow>> + Send + Sync>;

/// A registered index: name, target document type, column schema, the map
/// projection, and the optional reduce shape.
pub struct IndexSpec {
    name: String,
    doc_type: &'static str,
    collection: &'static str,
    columns: Vec<IndexColumn>,
    map: MapFn,
    reduce: Option<ReduceSpec>,
}

impl IndexSpec {
    /// Declare a map index over `T`.
    pub fn map<T, F>(name: &str, columns: Vec<IndexColumn>, f: F) -> Self
    where
        T: Document,
        F: Fn(&T) -> Vec<IndexRow> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            doc_type: T::TYPE,
            collection: T::COLLECTION,
            columns,
            map: erase(f),
            reduce: None,
        }
    }

    /// Declare a reduce index over `T`. `key_columns` form the group key;
    /// each aggregated column declares its aggregation function.
    pub fn reduce<T, F>(
        name: &str,
        key_columns: Vec<IndexColumn>,
        aggregated: Vec<(IndexColumn, Aggregate)>,
        f: F,
    ) -> Self
    where
        T: Document,
        F: Fn(&T) -> Vec<IndexRow> + Send + Sync + 'static,
    {
        let key_len = key_columns.len();
        let mut columns = key_columns;
        let mut aggregates = Vec::with_capacity(aggregated.len());
        for (col, agg) in aggregated {
            columns.push(col);
            aggregates.push(agg);
        }
        Self {
            name: name.to_string(),
            doc_type: T::TYPE,
            collection: T::COLLECTION,
            columns,
            map: erase(f),
            reduce: Some(ReduceSpec { key_len, aggregates }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc_type(&self) -> &'static str {
        self.doc_type
    }

    pub fn collection(&self) -> &'static str {
        self.collection
    }

    pub fn columns(&self) -> &[IndexColumn] {
        &self.columns
    }

    pub fn reduce_spec(&self) -> Option<&ReduceSpec> {
        self.reduce.as_ref()
    }

    /// Run the map projection over a decoded payload. Output is validated
    /// against the column schema and deduplicated — rows are a set.
    pub fn compute(&self, payload: &serde_json::Value) -> Result<Vec<IndexRow>> {
        let rows = (self.map)(payload)?;
        let mut set = std::collections::BTreeSet::new();
        for row in rows {
            if row.values().len() != self.columns.len() {
                return Err(Error::Configuration(format!(
                    "index {} produced a row with {} values, schema has {} columns",
                    self.name,
                    row.values().len(),
                    self.columns.len()
                )));
            }
            set.insert(row);
        }
        Ok(set.into_iter().collect())
    }

    /// Position of a column by name, if the index has it.
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Debug for IndexSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexSpec")
            .field("name", &self.name)
            .field("doc_type", &self.doc_type)
            .field("columns", &self.columns.len())
            .field("reduce", &self.reduce.is_some())
            .finish()
    }
}

fn erase<T, F>(f: F) -> MapFn
where
    T: Document,
    F: Fn(&T) -> Vec<IndexRow> + Send + Sync + 'static,
{
    Box::new(move |payload| {
        let doc: T = serde_json::from_value(payload.clone())?;
        Ok(f(&doc))
    })
}

// ============================================
// Registry
// ============================================

/// All registered indexes, looked up by document type at flush and by name
/// at query compile. Immutable after store construction.
#[derive(Default)]
pub struct IndexRegistry {
    by_type: HashMap<&'static str, Vec<Arc<IndexSpec>>>,
    by_name: BTreeMap<String, Arc<IndexSpec>>,
}

impl IndexRegistry {
    pub fn register(&mut self, spec: IndexSpec) -> Result<()> {
        if self.by_name.contains_key(spec.name()) {
            return Err(Error::Configuration(format!(
                "duplicate index name: {}",
                spec.name()
            )));
        }
        let spec = Arc::new(spec);
        self.by_name.insert(spec.name().to_string(), Arc::clone(&spec));
        self.by_type.entry(spec.doc_type()).or_default().push(spec);
        Ok(())
    }

    /// Indexes registered for a document type tag.
    pub fn for_type(&self, doc_type: &str) -> &[Arc<IndexSpec>] {
        self.by_type.get(doc_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, name: &str) -> Option<&Arc<IndexSpec>> {
        self.by_name.get(name)
    }

    /// All indexes in stable (name) order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<IndexSpec>> {
        self.by_name.values()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Person {
        id: i64,
        name: String,
    }

    impl Document for Person {
        const TYPE: &'static str = "Person";
        fn id(&self) -> i64 {
            self.id
        }
        fn set_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    fn by_name() -> IndexSpec {
        IndexSpec::map::<Person, _>(
            "ByName",
            vec![IndexColumn::new("Name", SqlType::Text)],
            |p| vec![IndexRow::new(vec![p.name.clone().into()])],
        )
    }

    #[test]
    fn compute_runs_typed_closure_on_payload() {
        let spec = by_name();
        let payload = serde_json::json!({"id": 1, "name": "ada"});
        let rows = spec.compute(&payload).unwrap();
        assert_eq!(rows, vec![IndexRow::new(vec!["ada".into()])]);
    }

    #[test]
    fn compute_collapses_duplicate_rows() {
        let spec = IndexSpec::map::<Person, _>(
            "Dup",
            vec![IndexColumn::new("Name", SqlType::Text)],
            |p| {
                vec![
                    IndexRow::new(vec![p.name.clone().into()]),
                    IndexRow::new(vec![p.name.clone().into()]),
                ]
            },
        );
        let rows = spec
            .compute(&serde_json::json!({"id": 1, "name": "x"}))
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn compute_rejects_arity_mismatch() {
        let spec = IndexSpec::map::<Person, _>(
            "Bad",
            vec![IndexColumn::new("Name", SqlType::Text)],
            |_| vec![IndexRow::new(vec![Value::Int(1), Value::Int(2)])],
        );
        let err = spec
            .compute(&serde_json::json!({"id": 1, "name": "x"}))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        let mut reg = IndexRegistry::default();
        reg.register(by_name()).unwrap();
        let err = reg.register(by_name()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(reg.for_type("Person").len(), 1);
        assert!(reg.get("ByName").is_some());
    }
}
