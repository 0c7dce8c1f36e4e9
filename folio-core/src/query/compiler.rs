//! Predicate tree to SQL
//!
//! A small visitor over the predicate variants appending into a shared
//! string buffer and parameter list. All literals become parameters; the
//! dialect supplies placeholders, quoting and the paging clause. The same
//! query shape renders differently per dialect and identically in meaning.

use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::index::{IndexRegistry, IndexSpec};
use crate::schema::Naming;
use crate::types::Value;

use super::{CompareOp, Order, Predicate};

/// What the query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Document ids (column `Id`).
    Ids,
    /// Document rows (`Id`, `Content`, `Version`), hydrated by the session.
    Documents,
    /// Matching row count (column `Total`).
    Count,
}

/// The logical query to render.
pub struct QueryShape<'a> {
    pub doc_type: &'static str,
    pub index: &'a str,
    pub joins: &'a [String],
    pub predicates: &'a [Predicate],
    pub order: &'a [Order],
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub selection: Selection,
}

/// A rendered statement with its ordered parameters.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub sql: String,
    pub params: Vec<Value>,
}

pub fn compile(
    dialect: &dyn Dialect,
    naming: &Naming,
    registry: &IndexRegistry,
    shape: &QueryShape<'_>,
) -> Result<Compiled> {
    let primary = registry
        .get(shape.index)
        .ok_or_else(|| Error::QueryCompile(format!("unknown index: {}", shape.index)))?;
    if primary.doc_type() != shape.doc_type {
        return Err(Error::QueryCompile(format!(
            "index {} projects {}, query expects {}",
            shape.index,
            primary.doc_type(),
            shape.doc_type
        )));
    }

    let mut joined: Vec<&IndexSpec> = Vec::new();
    for join in shape.joins {
        let spec = registry
            .get(join)
            .ok_or_else(|| Error::QueryCompile(format!("unknown join index: {join}")))?;
        if spec.reduce_spec().is_some() {
            return Err(Error::QueryCompile(format!(
                "cannot join reduce index {join}"
            )));
        }
        if spec.doc_type() != primary.doc_type() {
            return Err(Error::QueryCompile(format!(
                "incompatible join: {} projects {}, primary projects {}",
                join,
                spec.doc_type(),
                primary.doc_type()
            )));
        }
        joined.push(spec.as_ref());
    }

    let is_reduce = primary.reduce_spec().is_some();
    let need_bridge =
        is_reduce && (!matches!(shape.selection, Selection::Count) || !joined.is_empty());

    // Column resolution: primary first, then joins in declaration order.
    // `DocumentId` addresses the source-document link.
    let schema = naming.schema();
    let doc_id_expr = if is_reduce {
        need_bridge.then(|| format!("b0.{}", dialect.quote("DocumentId")))
    } else {
        Some(format!("i0.{}", dialect.quote("DocumentId")))
    };
    let resolve = |column: &str| -> Result<String> {
        if column.eq_ignore_ascii_case("DocumentId") {
            return doc_id_expr.clone().ok_or_else(|| {
                Error::QueryCompile(
                    "DocumentId is not addressable in this query shape".to_string(),
                )
            });
        }
        if let Some(pos) = primary.column_position(column) {
            return Ok(format!("i0.{}", dialect.quote(&primary.columns()[pos].name)));
        }
        for (j, spec) in joined.iter().enumerate() {
            if let Some(pos) = spec.column_position(column) {
                return Ok(format!(
                    "i{}.{}",
                    j + 1,
                    dialect.quote(&spec.columns()[pos].name)
                ));
            }
        }
        Err(Error::QueryCompile(format!(
            "column {column} is not on index {} or its joins",
            shape.index
        )))
    };

    let mut w = SqlWriter {
        dialect,
        sql: String::new(),
        params: Vec::new(),
    };

    // SELECT
    w.sql.push_str("SELECT ");
    match shape.selection {
        Selection::Ids => {
            let expr = doc_id_expr
                .clone()
                .ok_or_else(|| Error::QueryCompile("id selection needs a document link".into()))?;
            w.sql.push_str(&format!("{expr} AS {}", dialect.quote("Id")));
        }
        Selection::Documents => {
            w.sql.push_str(&format!(
                "d.{} AS {}, d.{} AS {}, d.{} AS {}",
                dialect.quote("Id"),
                dialect.quote("Id"),
                dialect.quote("Content"),
                dialect.quote("Content"),
                dialect.quote("Version"),
                dialect.quote("Version"),
            ));
        }
        Selection::Count => {
            w.sql.push_str(&format!("COUNT(*) AS {}", dialect.quote("Total")));
        }
    }

    // FROM + JOINs
    let primary_table = if is_reduce {
        naming.reduced_table(primary.name())
    } else {
        naming.map_table(primary.name())
    };
    w.sql.push_str(&format!(" FROM {} i0", dialect.table(schema, &primary_table)));

    if need_bridge {
        w.sql.push_str(&format!(
            " INNER JOIN {} b0 ON b0.{} = i0.{}",
            dialect.table(schema, &naming.bridge_table(primary.name())),
            dialect.quote("ReducedId"),
            dialect.quote("Id"),
        ));
    }

    let link = doc_id_expr.clone();
    for (j, spec) in joined.iter().enumerate() {
        let link = link
            .clone()
            .ok_or_else(|| Error::QueryCompile("join needs a document link".into()))?;
        w.sql.push_str(&format!(
            " INNER JOIN {} i{} ON i{}.{} = {}",
            dialect.table(schema, &naming.map_table(spec.name())),
            j + 1,
            j + 1,
            dialect.quote("DocumentId"),
            link,
        ));
    }

    if matches!(shape.selection, Selection::Documents) {
        let link = doc_id_expr
            .clone()
            .ok_or_else(|| Error::QueryCompile("document selection needs a document link".into()))?;
        w.sql.push_str(&format!(
            " INNER JOIN {} d ON d.{} = {}",
            dialect.table(schema, &naming.document_table(primary.collection())),
            dialect.quote("Id"),
            link,
        ));
    }

    // WHERE
    if !shape.predicates.is_empty() {
        w.sql.push_str(" WHERE ");
        if shape.predicates.len() == 1 {
            write_predicate(&mut w, &resolve, &shape.predicates[0])?;
        } else {
            write_predicate(&mut w, &resolve, &Predicate::And(shape.predicates.to_vec()))?;
        }
    }

    // ORDER BY and paging; a count has no meaningful order or page.
    if !matches!(shape.selection, Selection::Count) {
        let paged = shape.skip.is_some() || shape.take.is_some();
        let mut order_exprs = Vec::new();
        for key in shape.order {
            let (column, dir) = match key {
                Order::Asc(c) => (c, "ASC"),
                Order::Desc(c) => (c, "DESC"),
            };
            order_exprs.push(format!("{} {}", resolve(column)?, dir));
        }
        if order_exprs.is_empty() && paged && dialect.requires_order_for_paging() {
            // T-SQL refuses OFFSET without ORDER BY; fall back to a stable
            // key.
            let key = doc_id_expr
                .clone()
                .unwrap_or_else(|| format!("i0.{}", dialect.quote("Id")));
            order_exprs.push(format!("{key} ASC"));
        }
        if !order_exprs.is_empty() {
            w.sql.push_str(" ORDER BY ");
            w.sql.push_str(&order_exprs.join(", "));
        }
        w.sql.push_str(&dialect.paging(shape.skip, shape.take));
    }

    Ok(Compiled {
        sql: w.sql,
        params: w.params,
    })
}

struct SqlWriter<'d> {
    dialect: &'d dyn Dialect,
    sql: String,
    params: Vec<Value>,
}

impl SqlWriter<'_> {
    fn push_param(&mut self, value: Value) {
        self.params.push(value);
        let ph = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&ph);
    }
}

fn write_predicate(
    w: &mut SqlWriter<'_>,
    resolve: &impl Fn(&str) -> Result<String>,
    predicate: &Predicate,
) -> Result<()> {
    match predicate {
        Predicate::And(ps) => write_junction(w, resolve, ps, " AND ", "1 = 1"),
        Predicate::Or(ps) => write_junction(w, resolve, ps, " OR ", "1 = 0"),
        Predicate::Not(p) => {
            w.sql.push_str("NOT (");
            write_predicate(w, resolve, p)?;
            w.sql.push(')');
            Ok(())
        }
        Predicate::Compare { column, op, value } => {
            let col = resolve(column)?;
            // Comparing against NULL never matches in SQL; render the
            // intent instead.
            if value.is_null() && matches!(op, CompareOp::Eq | CompareOp::Ne) {
                w.sql.push_str(&col);
                w.sql.push_str(if *op == CompareOp::Eq {
                    " IS NULL"
                } else {
                    " IS NOT NULL"
                });
                return Ok(());
            }
            w.sql.push_str(&format!("{col} {} ", op.sql()));
            w.push_param(value.clone());
            Ok(())
        }
        Predicate::Between { column, low, high } => {
            let col = resolve(column)?;
            w.sql.push_str(&format!("{col} BETWEEN "));
            w.push_param(low.clone());
            w.sql.push_str(" AND ");
            w.push_param(high.clone());
            Ok(())
        }
        Predicate::In { column, values } => {
            if values.is_empty() {
                w.sql.push_str("1 = 0");
                return Ok(());
            }
            let col = resolve(column)?;
            w.sql.push_str(&format!("{col} IN ("));
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    w.sql.push_str(", ");
                }
                w.push_param(value.clone());
            }
            w.sql.push(')');
            Ok(())
        }
        Predicate::IsNull { column } => {
            let col = resolve(column)?;
            w.sql.push_str(&format!("{col} IS NULL"));
            Ok(())
        }
    }
}

fn write_junction(
    w: &mut SqlWriter<'_>,
    resolve: &impl Fn(&str) -> Result<String>,
    ps: &[Predicate],
    sep: &str,
    empty: &str,
) -> Result<()> {
    if ps.is_empty() {
        w.sql.push_str(empty);
        return Ok(());
    }
    w.sql.push('(');
    for (i, p) in ps.iter().enumerate() {
        if i > 0 {
            w.sql.push_str(sep);
        }
        write_predicate(w, resolve, p)?;
    }
    w.sql.push(')');
    Ok(())
}
