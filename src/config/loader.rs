// src/config/loader.rs

use std::fs;
use std::path::Path;

use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{CycledagError, Result};

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs YAML deserialization and splits off the `datasets`
/// block; it does **not** perform semantic validation. Use
/// [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let mut raw = parse_str(&contents)?;

    let base_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.trim_end_matches(".yaml").trim_end_matches(".yml").to_string())
        .unwrap_or_else(|| "config".to_string());
    let config_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().to_string(),
        _ => ".".to_string(),
    };

    insert_default(&mut raw.global, "config_base_name", Value::String(base_name));
    insert_default(&mut raw.global, "config_dir", Value::String(config_dir));
    raw.source = Some(path.to_path_buf());

    debug!(path = ?path, datasets = raw.datasets.len(), "loaded raw config");
    Ok(raw)
}

/// Parse a YAML document into a `RawConfigFile`.
pub fn parse_str(contents: &str) -> Result<RawConfigFile> {
    let doc: Value = serde_yaml::from_str(contents)?;
    let mut global = match doc {
        Value::Mapping(map) => map,
        Value::Null => Mapping::new(),
        _ => {
            return Err(CycledagError::config(
                "top level of the config must be a mapping",
            ));
        }
    };

    let datasets = match global.remove("datasets") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Mapping(map)) => {
            let mut datasets = Vec::with_capacity(map.len());
            for (name, block) in map {
                let name = match name {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    other => {
                        return Err(CycledagError::config(format!(
                            "dataset names must be strings, got {other:?}"
                        )));
                    }
                };
                let block = match block {
                    Value::Mapping(m) => m,
                    Value::Null => Mapping::new(),
                    _ => {
                        return Err(CycledagError::config(format!(
                            "dataset '{name}' must be a mapping of settings"
                        )));
                    }
                };
                datasets.push((name, block));
            }
            datasets
        }
        Some(_) => {
            return Err(CycledagError::config(
                "`datasets` must be a mapping of dataset name to settings",
            ));
        }
    };

    insert_default(
        &mut global,
        "cycledag_version",
        Value::String(env!("CARGO_PKG_VERSION").to_string()),
    );

    Ok(RawConfigFile {
        global,
        datasets,
        source: None,
    })
}

/// Load a configuration file from path and run validation.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads YAML.
/// - Merges every dataset onto the global scope and expands its cycler.
/// - Checks for:
///   - unknown filter operators and empty cycler lists,
///   - type-mismatched dataset overrides,
///   - missing run sources, invalid folder sizes and negative throttles.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    load_with_defaults(path, &Mapping::new())
}

/// Like [`load_and_validate`], but fills global keys the config does not set
/// from `defaults` (e.g. `--data-folder` on the command line). Values in the
/// config file win.
pub fn load_with_defaults(path: impl AsRef<Path>, defaults: &Mapping) -> Result<ConfigFile> {
    let mut raw = load_from_path(&path)?;
    for (key, value) in defaults {
        let name = key.as_str().unwrap_or_default();
        if raw.global.contains_key(key) {
            if raw.global.get(key) != Some(value) {
                info!(key = name, "config value overrides command-line value");
            }
        } else {
            raw.global.insert(key.clone(), value.clone());
        }
    }
    ConfigFile::try_from(raw)
}

fn insert_default(map: &mut Mapping, key: &str, value: Value) {
    if !map.contains_key(key) {
        map.insert(Value::String(key.to_string()), value);
    }
}
