//! Index row diffing and reduce arithmetic
//!
//! Pure computation: given the rows a document used to contribute and the
//! rows it contributes now, produce the minimal insert/delete sets, and for
//! reduce indexes the per-group merge/un-merge math. The flush pipeline in
//! the session turns these results into DML.

use std::collections::{BTreeMap, BTreeSet};

use super::{Aggregate, IndexRow, ReduceSpec};
use crate::error::{Error, Result};
use crate::types::Value;

/// Minimal change set between two row sets.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RowDelta {
    pub added: Vec<IndexRow>,
    pub removed: Vec<IndexRow>,
}

impl RowDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Diff two row sets by full row equality. Inputs are treated as sets;
/// duplicates collapse.
pub fn diff(old: &[IndexRow], new: &[IndexRow]) -> RowDelta {
    let old: BTreeSet<&IndexRow> = old.iter().collect();
    let new: BTreeSet<&IndexRow> = new.iter().collect();
    RowDelta {
        added: new.difference(&old).map(|r| (*r).clone()).collect(),
        removed: old.difference(&new).map(|r| (*r).clone()).collect(),
    }
}

/// Group rows by their key prefix (the first `key_len` values).
pub fn group_by_key(rows: &[IndexRow], key_len: usize) -> BTreeMap<Vec<Value>, Vec<IndexRow>> {
    let mut groups: BTreeMap<Vec<Value>, Vec<IndexRow>> = BTreeMap::new();
    for row in rows {
        let key = row.values()[..key_len].to_vec();
        groups.entry(key).or_default().push(row.clone());
    }
    groups
}

/// Aggregate a group's rows from scratch. Returns one value per aggregated
/// column. Null cells are skipped, matching SQL aggregate semantics; a
/// group with only null cells aggregates to null (count excepted).
pub fn aggregate(reduce: &ReduceSpec, rows: &[IndexRow]) -> Vec<Value> {
    reduce
        .aggregates
        .iter()
        .enumerate()
        .map(|(i, agg)| {
            let col = reduce.key_len + i;
            let cells = rows.iter().map(|r| &r.values()[col]);
            match agg {
                Aggregate::Count => Value::Int(rows.len() as i64),
                Aggregate::Sum => cells
                    .filter(|v| !v.is_null())
                    .fold(Value::Int(0), |acc, v| numeric_add(&acc, v)),
                Aggregate::Min => cells
                    .filter(|v| !v.is_null())
                    .min()
                    .cloned()
                    .unwrap_or(Value::Null),
                Aggregate::Max => cells
                    .filter(|v| !v.is_null())
                    .max()
                    .cloned()
                    .unwrap_or(Value::Null),
            }
        })
        .collect()
}

/// Merge a group delta into existing aggregated values in place. Only valid
/// for fully invertible specs; the caller routes non-invertible specs with
/// removals through [`aggregate`] over the re-read group.
pub fn merge(
    reduce: &ReduceSpec,
    current: &[Value],
    added: &[IndexRow],
    removed: &[IndexRow],
) -> Result<Vec<Value>> {
    if !reduce.invertible() && !removed.is_empty() {
        return Err(Error::Configuration(
            "non-invertible aggregate cannot un-merge; re-aggregate the group".to_string(),
        ));
    }
    reduce
        .aggregates
        .iter()
        .enumerate()
        .map(|(i, agg)| {
            let col = reduce.key_len + i;
            let cur = &current[i];
            Ok(match agg {
                Aggregate::Count => Value::Int(
                    cur.as_i64().unwrap_or(0) + added.len() as i64 - removed.len() as i64,
                ),
                Aggregate::Sum => {
                    let mut acc = cur.clone();
                    if acc.is_null() {
                        acc = Value::Int(0);
                    }
                    for row in added {
                        let v = &row.values()[col];
                        if !v.is_null() {
                            acc = numeric_add(&acc, v);
                        }
                    }
                    for row in removed {
                        let v = &row.values()[col];
                        if !v.is_null() {
                            acc = numeric_sub(&acc, v);
                        }
                    }
                    acc
                }
                // Additions alone can merge into min/max; removals were
                // rejected above.
                Aggregate::Min => added
                    .iter()
                    .map(|r| &r.values()[col])
                    .filter(|v| !v.is_null())
                    .fold(cur.clone(), |acc, v| {
                        if acc.is_null() || *v < acc {
                            v.clone()
                        } else {
                            acc
                        }
                    }),
                Aggregate::Max => added
                    .iter()
                    .map(|r| &r.values()[col])
                    .filter(|v| !v.is_null())
                    .fold(cur.clone(), |acc, v| {
                        if acc.is_null() || *v > acc {
                            v.clone()
                        } else {
                            acc
                        }
                    }),
            })
        })
        .collect()
}

fn numeric_add(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(x + y),
        _ => Value::Real(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0)),
    }
}

fn numeric_sub(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(x - y),
        _ => Value::Real(a.as_f64().unwrap_or(0.0) - b.as_f64().unwrap_or(0.0)),
    }
}
