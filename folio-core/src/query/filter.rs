//! Filter mini-language for date and range predicates
//!
//! Grammar:
//!
//! ```text
//! expr    := op? value ( '..' value )?
//! op      := '>' | '>=' | '<' | '<='
//! value   := isoDateTime | nowExpr
//! nowExpr := '@now' ( signedInteger )?      // integer is a day offset
//! ```
//!
//! A single value with an operator compiles to a unary comparison; a bare
//! value to equality; `a..b` to an inclusive BETWEEN. `@now` resolves
//! against the caller-supplied UTC clock captured at query build time, so a
//! query is internally consistent even if it runs slowly. The language is
//! UTC-only; a timezone-qualified `@now` is rejected. Errors carry the byte
//! offset of the offending character.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

use super::{CompareOp, Predicate};
use crate::error::{Error, Result};
use crate::types::Value;

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpr {
    /// Bare value: equality.
    Eq(DateTime<Utc>),
    /// `op value`.
    Compare(CompareOp, DateTime<Utc>),
    /// `a..b`, both ends inclusive.
    Between(DateTime<Utc>, DateTime<Utc>),
}

impl FilterExpr {
    /// Lower to a predicate over the given index column.
    pub fn into_predicate(self, column: &str) -> Predicate {
        match self {
            FilterExpr::Eq(dt) => Predicate::Compare {
                column: column.to_string(),
                op: CompareOp::Eq,
                value: Value::DateTime(dt),
            },
            FilterExpr::Compare(op, dt) => Predicate::Compare {
                column: column.to_string(),
                op,
                value: Value::DateTime(dt),
            },
            FilterExpr::Between(low, high) => Predicate::Between {
                column: column.to_string(),
                low: Value::DateTime(low),
                high: Value::DateTime(high),
            },
        }
    }
}

/// Parse a filter expression against the given clock.
pub fn parse(input: &str, now: DateTime<Utc>) -> Result<FilterExpr> {
    let mut p = Parser {
        input,
        bytes: input.as_bytes(),
        pos: 0,
        now,
    };
    p.skip_ws();
    let op_pos = p.pos;
    let op = p.try_op();
    p.skip_ws();
    let first = p.value()?;
    p.skip_ws();

    if p.try_range_dots() {
        if op.is_some() {
            return Err(err(op_pos, "operator cannot be combined with a range"));
        }
        p.skip_ws();
        let second = p.value()?;
        p.skip_ws();
        p.expect_end()?;
        return Ok(FilterExpr::Between(first, second));
    }

    p.expect_end()?;
    Ok(match op {
        Some(op) => FilterExpr::Compare(op, first),
        None => FilterExpr::Eq(first),
    })
}

fn err(position: usize, message: impl Into<String>) -> Error {
    Error::Filter {
        position,
        message: message.into(),
    }
}

struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
    now: DateTime<Utc>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
    }

    fn try_op(&mut self) -> Option<CompareOp> {
        let rest = &self.bytes[self.pos..];
        let (op, len) = match rest {
            [b'>', b'=', ..] => (CompareOp::Ge, 2),
            [b'<', b'=', ..] => (CompareOp::Le, 2),
            [b'>', ..] => (CompareOp::Gt, 1),
            [b'<', ..] => (CompareOp::Lt, 1),
            _ => return None,
        };
        self.pos += len;
        Some(op)
    }

    fn try_range_dots(&mut self) -> bool {
        if self.bytes[self.pos..].starts_with(b"..") {
            self.pos += 2;
            true
        } else {
            false
        }
    }

    fn expect_end(&mut self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(_) => Err(err(self.pos, "unexpected trailing input")),
        }
    }

    fn value(&mut self) -> Result<DateTime<Utc>> {
        if self.peek() == Some(b'@') {
            return self.now_expr();
        }
        self.iso_value()
    }

    fn now_expr(&mut self) -> Result<DateTime<Utc>> {
        let start = self.pos;
        if !self.input[self.pos..].starts_with("@now") {
            return Err(err(start, "expected '@now'"));
        }
        self.pos += 4;

        let mut resolved = self.now;
        if matches!(self.peek(), Some(b'+') | Some(b'-')) {
            let sign = if self.peek() == Some(b'-') { -1i64 } else { 1 };
            self.pos += 1;
            let digits_start = self.pos;
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
            if self.pos == digits_start {
                return Err(err(digits_start, "expected a day offset after sign"));
            }
            let days: i64 = self.input[digits_start..self.pos]
                .parse()
                .map_err(|_| err(digits_start, "day offset out of range"))?;
            resolved = resolved + Duration::days(sign * days);
        }

        // UTC-only: nothing may follow @now except whitespace or '..'.
        match self.peek() {
            Some(b'Z') | Some(b'z') | Some(b':') => {
                Err(err(self.pos, "timezone-qualified @now is not supported"))
            }
            _ => Ok(resolved),
        }
    }

    fn iso_value(&mut self) -> Result<DateTime<Utc>> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b' ' || c == b'\t' {
                break;
            }
            // A single dot may be a fractional second; a double dot ends
            // the value.
            if c == b'.' && self.bytes.get(self.pos + 1) == Some(&b'.') {
                break;
            }
            self.pos += 1;
        }
        let text = &self.input[start..self.pos];
        if text.is_empty() {
            return Err(err(start, "expected an ISO date or '@now'"));
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Ok(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
            return Ok(naive.and_utc());
        }
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Ok(naive.and_utc());
            }
        }
        Err(err(start, format!("invalid date value '{text}'")))
    }
}
