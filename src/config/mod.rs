// src/config/mod.rs

//! Configuration loading and validation for cycledag.
//!
//! Responsibilities:
//! - Define the YAML-backed data model (`model.rs`).
//! - Keep the merged configuration tree immutable (`tree.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate every dataset variant up front (`validate.rs`).

pub mod loader;
pub mod model;
pub mod tree;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_with_defaults, parse_str};
pub use model::{
    BatchSettings, ConfigFile, DatasetConfig, DatasetSettings, DatasetVariant, RawConfigFile,
    Resources, Throttle,
};
pub use tree::ConfigTree;
