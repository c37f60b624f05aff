// src/types.rs

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::Deserialize;

/// Kind of data a dataset holds.
///
/// Only `exp` changes enumeration behaviour (good-run-list discovery); the
/// others are carried into the job namespace unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Exp,
    Nugen,
    Corsika,
    Muongun,
    Misc,
    #[serde(rename = "non-i3")]
    NonI3,
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exp" => Ok(DataType::Exp),
            "nugen" => Ok(DataType::Nugen),
            "corsika" => Ok(DataType::Corsika),
            "muongun" => Ok(DataType::Muongun),
            "misc" => Ok(DataType::Misc),
            "non-i3" => Ok(DataType::NonI3),
            other => Err(format!(
                "data type {other} is not understood (expected one of: exp, nugen, corsika, muongun, misc, non-i3)"
            )),
        }
    }
}

/// Comparison operator of a run filter predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    In,
}

impl FromStr for FilterOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "==" => Ok(FilterOp::Eq),
            "!=" => Ok(FilterOp::Ne),
            "<" => Ok(FilterOp::Lt),
            ">" => Ok(FilterOp::Gt),
            "<=" => Ok(FilterOp::Le),
            ">=" => Ok(FilterOp::Ge),
            "in" => Ok(FilterOp::In),
            other => Err(format!(
                "unknown filter operator {other:?} (expected one of ==, !=, <, >, <=, >=, in)"
            )),
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterOp::Eq => "==",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Gt => ">",
            FilterOp::Le => "<=",
            FilterOp::Ge => ">=",
            FilterOp::In => "in",
        };
        f.write_str(s)
    }
}

/// How a generated batch is handed over for execution.
///
/// - `Dagman`: write the DAGMan submission files and `start_dagman.sh`.
/// - `Local`: run the generated job scripts right away on this machine.
/// - `None`: only write job scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SubmitMode {
    Dagman,
    Local,
    #[default]
    None,
}
