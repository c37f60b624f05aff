// src/plan/filter.rs

//! Run filter predicates: `(column, operator, value)` triples.
//!
//! Predicates are parsed once at config-load time so that an unknown
//! operator never surfaces halfway through enumeration.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_yaml::Value;

use crate::errors::{CycledagError, Result};
use crate::render::format::value_to_string;
use crate::types::FilterOp;

/// Column values known about one run, keyed by column name.
pub type RunRow = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct FilterPredicate {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl FilterPredicate {
    pub fn new(column: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }

    /// Whether `row` satisfies this predicate. A column missing from the
    /// row never satisfies it.
    pub fn matches(&self, row: &RunRow) -> bool {
        let Some(actual) = row.get(&self.column) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => values_equal(actual, &self.value),
            FilterOp::Ne => !values_equal(actual, &self.value),
            FilterOp::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Le => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Ge => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::In => self
                .value
                .as_sequence()
                .map(|set| set.iter().any(|candidate| values_equal(actual, candidate)))
                .unwrap_or(false),
        }
    }
}

/// Logical AND over all predicates; an empty list keeps everything.
pub fn all_match(predicates: &[FilterPredicate], row: &RunRow) -> bool {
    predicates.iter().all(|p| p.matches(row))
}

/// Parse raw config triples into predicates.
pub fn parse_predicates(raw: &[(String, String, Value)]) -> Result<Vec<FilterPredicate>> {
    raw.iter()
        .map(|(column, op, value)| {
            let op: FilterOp = op.parse().map_err(|e: String| {
                CycledagError::config(format!("run filter on column '{column}': {e}"))
            })?;
            if op == FilterOp::In && value.as_sequence().is_none() {
                return Err(CycledagError::config(format!(
                    "run filter '{column} in {}' needs a list of values",
                    value_to_string(value)
                )));
            }
            Ok(FilterPredicate::new(column.clone(), op, value.clone()))
        })
        .collect()
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => Some(i.cmp(&j)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare(a, b) == Some(Ordering::Equal)
}
