//! Typed query surface
//!
//! Queries run against a single "primary" index table, optionally joined to
//! other indexes by document id, with a predicate tree over index columns,
//! ordering and paging. Compilation to dialect-correct SQL happens when the
//! terminal method (`ids`, `list`, `first`, `count`) runs — before anything
//! touches the database — so shape errors surface as
//! [`Error::QueryCompile`](crate::Error::QueryCompile) without executing.
//!
//! Pending session mutations are flushed (without committing) into the
//! session's transaction before a query executes, so a read always observes
//! the session's own writes.

pub mod compiler;
pub mod filter;

use std::marker::PhantomData;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::session::Session;
use crate::types::{Document, Value};

// ============================================
// Predicate tree
// ============================================

/// Comparison operators over index columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl CompareOp {
    pub fn sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Like => "LIKE",
        }
    }
}

/// A predicate over the columns of the queried indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    /// Inclusive range.
    Between {
        column: String,
        low: Value,
        high: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    IsNull {
        column: String,
    },
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op: CompareOp::Ne,
            value: value.into(),
        }
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op: CompareOp::Lt,
            value: value.into(),
        }
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op: CompareOp::Le,
            value: value.into(),
        }
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op: CompareOp::Gt,
            value: value.into(),
        }
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op: CompareOp::Ge,
            value: value.into(),
        }
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op: CompareOp::Like,
            value: Value::Text(pattern.into()),
        }
    }

    pub fn between(
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Predicate::Between {
            column: column.into(),
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn is_in<V: Into<Value>>(column: impl Into<String>, values: Vec<V>) -> Self {
        Predicate::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::IsNull {
            column: column.into(),
        }
    }
}

/// An ordering key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Order {
    Asc(String),
    Desc(String),
}

// ============================================
// Builder
// ============================================

/// A typed query bound to a session. Building never suspends; the terminal
/// methods compile and execute.
pub struct Query<'q, 'a, T: Document> {
    session: &'q mut Session<'a>,
    index: String,
    predicates: Vec<Predicate>,
    joins: Vec<String>,
    order: Vec<Order>,
    skip: Option<u64>,
    take: Option<u64>,
    now: DateTime<Utc>,
    deferred_error: Option<Error>,
    _marker: PhantomData<fn() -> T>,
}

impl<'q, 'a, T: Document> Query<'q, 'a, T> {
    pub(crate) fn new(session: &'q mut Session<'a>, index: &str) -> Self {
        Self {
            session,
            index: index.to_string(),
            predicates: Vec::new(),
            joins: Vec::new(),
            order: Vec::new(),
            skip: None,
            take: None,
            now: Utc::now(),
            deferred_error: None,
            _marker: PhantomData,
        }
    }

    /// AND another predicate onto the query.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// AND a filter mini-language expression over a datetime column, e.g.
    /// `"@now-7..@now"`. Parse errors surface when the query compiles.
    pub fn filter_text(mut self, column: &str, expr: &str) -> Self {
        match filter::parse(expr, self.now) {
            Ok(parsed) => self.predicates.push(parsed.into_predicate(column)),
            Err(e) => {
                if self.deferred_error.is_none() {
                    self.deferred_error = Some(e);
                }
            }
        }
        self
    }

    /// Replace the wall clock `@now` resolves against. Must be called
    /// before `filter_text`.
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// INNER JOIN another index on document id; a document matches only if
    /// rows exist in every joined index.
    pub fn join(mut self, index: &str) -> Self {
        self.joins.push(index.to_string());
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order.push(Order::Asc(column.to_string()));
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order.push(Order::Desc(column.to_string()));
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn take(mut self, n: u64) -> Self {
        self.take = Some(n);
        self
    }

    fn compile(&mut self, selection: compiler::Selection) -> Result<compiler::Compiled> {
        if let Some(e) = self.deferred_error.take() {
            return Err(e);
        }
        let store = self.session.store();
        compiler::compile(
            store.dialect(),
            store.naming(),
            store.registry(),
            &compiler::QueryShape {
                doc_type: T::TYPE,
                index: &self.index,
                joins: &self.joins,
                predicates: &self.predicates,
                order: &self.order,
                skip: self.skip,
                take: self.take,
                selection,
            },
        )
    }

    /// Matching document ids, deduplicated, excluding documents deleted in
    /// this session.
    pub async fn ids(mut self) -> Result<Vec<i64>> {
        let compiled = self.compile(compiler::Selection::Ids)?;
        let rows = self.session.query_rows(&compiled.sql, &compiled.params).await?;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for row in rows {
            let id = row.i64("Id")?;
            if seen.insert(id) && !self.session.is_deleted(id) {
                out.push(id);
            }
        }
        Ok(out)
    }

    /// Matching documents, hydrated through the identity map: a document
    /// already tracked by the session is returned from its tracked
    /// instance.
    pub async fn list(mut self) -> Result<Vec<T>> {
        let compiled = self.compile(compiler::Selection::Documents)?;
        let rows = self.session.query_rows(&compiled.sql, &compiled.params).await?;
        self.session.hydrate::<T>(rows)
    }

    /// First matching document, if any.
    pub async fn first(mut self) -> Result<Option<T>> {
        self.take = Some(1);
        Ok(self.list().await?.into_iter().next())
    }

    /// Number of matching index rows.
    pub async fn count(mut self) -> Result<i64> {
        let compiled = self.compile(compiler::Selection::Count)?;
        let rows = self.session.query_rows(&compiled.sql, &compiled.params).await?;
        match rows.first() {
            Some(row) => row.i64("Total"),
            None => Ok(0),
        }
    }
}
