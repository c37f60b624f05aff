// src/errors.rs

//! Crate-wide error type.
//!
//! Everything that must stop generation before a single job script is
//! written is a `CycledagError`. Conditions that only affect one run unit
//! (missing good-run-list entries, corrupted inputs) are collected as data
//! in [`crate::plan::EnumerationReport`] instead.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CycledagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Path collision: jobs '{first}' and '{second}' both resolve to job script {path:?}")]
    PathCollision {
        path: PathBuf,
        first: String,
        second: String,
    },

    #[error("Template error: {0}")]
    TemplateError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CycledagError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        CycledagError::ConfigError(msg.into())
    }

    pub(crate) fn template(msg: impl Into<String>) -> Self {
        CycledagError::TemplateError(msg.into())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CycledagError>;
