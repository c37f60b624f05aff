// src/plan/grl.rs

//! Good-run-list parsing.
//!
//! A good-run-list is a whitespace-separated table with one or two header
//! lines:
//!
//! ```text
//! RunNum Good_i3 Good_i LiveTime ActiveStrings ActiveDOMs ActiveInIce OutDir Comments
//!        (1=good 0=bad)
//! 120156 1 1 28803.42 86 5160 5160 /data/exp/IceCube/2012/filtered/level2/0515/Run00120156 IC86_2012
//! ```
//!
//! Rows are exposed as [`RunRow`]s so that run filters can be evaluated
//! against them directly.

use std::collections::BTreeMap;
use std::path::Path;

use serde_yaml::Value;
use tracing::debug;

use crate::errors::{CycledagError, Result};
use crate::fs::{FileSystem, expand_glob};
use crate::plan::filter::RunRow;

pub const GRL_COLUMNS: [&str; 9] = [
    "RunNum",
    "Good_i3",
    "Good_i",
    "LiveTime",
    "ActiveStrings",
    "ActiveDOMs",
    "ActiveInIce",
    "OutDir",
    "Comments",
];

#[derive(Debug, Clone, Copy)]
enum ColumnKind {
    Int,
    Float,
    Text,
}

fn column_kind(index: usize) -> ColumnKind {
    match index {
        3 => ColumnKind::Float,
        7 | 8 => ColumnKind::Text,
        _ => ColumnKind::Int,
    }
}

/// Parsed good-run-list rows keyed by run number.
#[derive(Debug, Clone, Default)]
pub struct GoodRunList {
    rows: BTreeMap<u64, RunRow>,
}

impl GoodRunList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every file matching any of `patterns`.
    ///
    /// Files are de-duplicated and read in sorted order; a run listed twice
    /// (in the same or different files) is an error.
    pub fn load(fs: &dyn FileSystem, patterns: &[String]) -> Result<Self> {
        let mut files = Vec::new();
        for pattern in patterns {
            files.extend(expand_glob(fs, pattern)?);
        }
        files.sort();
        files.dedup();

        let mut grl = Self::new();
        for file in &files {
            let contents = fs.read_to_string(file)?;
            grl.extend_from_str(&contents, file)?;
        }
        debug!(files = files.len(), runs = grl.len(), "parsed good-run-lists");
        Ok(grl)
    }

    pub fn parse_str(contents: &str, source: &Path) -> Result<Self> {
        let mut grl = Self::new();
        grl.extend_from_str(contents, source)?;
        Ok(grl)
    }

    fn extend_from_str(&mut self, contents: &str, source: &Path) -> Result<()> {
        let lines: Vec<&str> = contents.lines().collect();
        let Some(header) = lines.first() else {
            return Ok(());
        };
        if !header.contains("RunNum") {
            return Err(CycledagError::config(format!(
                "good-run-list {source:?} does not start with a RunNum header"
            )));
        }
        let start = match lines.get(1) {
            Some(line) if line.contains("(1=good 0=bad)") => 2,
            _ => 1,
        };

        for (offset, line) in lines.iter().enumerate().skip(start) {
            if line.trim().is_empty() {
                continue;
            }
            let row = parse_row(line).map_err(|msg| {
                CycledagError::config(format!("good-run-list {source:?} line {}: {msg}", offset + 1))
            })?;
            let run = row
                .get("RunNum")
                .and_then(Value::as_u64)
                .ok_or_else(|| CycledagError::config(format!("good-run-list {source:?}: bad RunNum")))?;
            if self.rows.contains_key(&run) {
                return Err(CycledagError::config(format!(
                    "good-run-list {source:?}: duplicate entry for run {run}"
                )));
            }
            self.rows.insert(run, row);
        }
        Ok(())
    }

    pub fn get(&self, run: u64) -> Option<&RunRow> {
        self.rows.get(&run)
    }

    pub fn contains(&self, run: u64) -> bool {
        self.rows.contains_key(&run)
    }

    pub fn runs(&self) -> impl Iterator<Item = u64> + '_ {
        self.rows.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Split one data line into typed columns. Everything past the eighth
/// column belongs to the comment.
fn parse_row(line: &str) -> std::result::Result<RunRow, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let last = GRL_COLUMNS.len() - 1;
    if tokens.len() < last {
        return Err(format!(
            "expected at least {last} columns, found {}",
            tokens.len()
        ));
    }

    let mut row = RunRow::new();
    for (index, name) in GRL_COLUMNS.iter().enumerate() {
        let raw = if index == last {
            tokens[last..].join(" ")
        } else {
            tokens[index].to_string()
        };
        let value = match column_kind(index) {
            ColumnKind::Int => raw
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("column {name} is not an integer: {raw:?}"))?,
            ColumnKind::Float => raw
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| format!("column {name} is not a number: {raw:?}"))?,
            ColumnKind::Text => Value::String(raw),
        };
        row.insert((*name).to_string(), value);
    }
    Ok(row)
}
