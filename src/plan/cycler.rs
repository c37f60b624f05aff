// src/plan/cycler.rs

//! Cartesian-product expansion of the `cycler` block.
//!
//! ```yaml
//! cycler:
//!   energy_cut: [100, 1000]
//!   use_gpu: [false, true]
//! ```
//!
//! expands into four overlays, the last declared parameter varying fastest.

use serde_yaml::{Mapping, Value};

use crate::errors::{CycledagError, Result};
use crate::render::format::value_to_string;

/// Declared parameter lists, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CyclerSpec {
    params: Vec<(String, Vec<Value>)>,
}

impl CyclerSpec {
    pub fn new(params: Vec<(String, Vec<Value>)>) -> Self {
        Self { params }
    }

    /// Read a `cycler` value from the config. Absent or null means no
    /// cycled parameters.
    pub fn from_value(value: Option<&Value>) -> Result<Self> {
        let map = match value {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::Mapping(map)) => map,
            Some(other) => {
                return Err(CycledagError::config(format!(
                    "`cycler` must be a mapping of parameter name to list, got {}",
                    value_to_string(other)
                )));
            }
        };

        let mut params = Vec::with_capacity(map.len());
        for (key, values) in map {
            let name = key.as_str().ok_or_else(|| {
                CycledagError::config(format!(
                    "cycler parameter names must be strings, got {}",
                    value_to_string(key)
                ))
            })?;
            let list = values.as_sequence().ok_or_else(|| {
                CycledagError::config(format!("cycler parameter '{name}' must be a list"))
            })?;
            params.push((name.to_string(), list.clone()));
        }
        Ok(Self { params })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Product of all list lengths (1 for an empty spec).
    pub fn combination_count(&self) -> usize {
        self.params.iter().map(|(_, values)| values.len()).product()
    }
}

/// One concrete combination of cycled values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterOverlay {
    /// Position in the expansion order.
    pub index: usize,
    values: Vec<(String, Value)>,
}

impl ParameterOverlay {
    pub fn values(&self) -> &[(String, Value)] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_mapping(&self) -> Mapping {
        let mut map = Mapping::new();
        for (name, value) in &self.values {
            map.insert(Value::String(name.clone()), value.clone());
        }
        map
    }

    /// Short human-readable form, e.g. `energy_cut=100,use_gpu=false`.
    pub fn label(&self) -> String {
        self.values
            .iter()
            .map(|(n, v)| format!("{n}={}", value_to_string(v)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Expand a cycler spec into its Cartesian product.
///
/// Row-major over the declared order; zero parameters give exactly one
/// empty overlay. Any empty list is a configuration error.
pub fn expand(spec: &CyclerSpec) -> Result<Vec<ParameterOverlay>> {
    if let Some((name, _)) = spec.params.iter().find(|(_, values)| values.is_empty()) {
        return Err(CycledagError::config(format!(
            "cycler parameter '{name}' has an empty list of values"
        )));
    }

    let total = spec.combination_count();
    let mut overlays = Vec::with_capacity(total);
    let mut indices = vec![0usize; spec.params.len()];

    for index in 0..total {
        let values = spec
            .params
            .iter()
            .zip(indices.iter())
            .map(|((name, list), &i)| (name.clone(), list[i].clone()))
            .collect();
        overlays.push(ParameterOverlay { index, values });

        // Advance the odometer, last parameter fastest.
        for pos in (0..indices.len()).rev() {
            indices[pos] += 1;
            if indices[pos] < spec.params[pos].1.len() {
                break;
            }
            indices[pos] = 0;
        }
    }

    Ok(overlays)
}
