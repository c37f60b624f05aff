// src/plan/steps.rs

//! Processing steps and their processing units.
//!
//! A step is an environment (interpreter, library paths, resources) plus
//! an ordered list of `tray_segments`:
//!
//! ```yaml
//! processing_steps:
//!   - cvmfs_python: py3-v4.3.0
//!     resources: {gpus: 1}
//!     tray_segments:
//!       - ModuleClass: ic3_processing.modules.reco.reco.apply_dnn_recos
//!         ModuleKwargs:
//!           pulse_key: context-->pulse_key
//! ```
//!
//! Units are opaque to generation: they are resolved through a
//! [`SegmentRegistry`] and written out unchanged for the external runner.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::config::model::Resources;
use crate::errors::{CycledagError, Result};
use crate::plan::paths::{apply_final_out, format_pattern};

/// Marker of a deferred lookup resolved by the runner at execution time.
pub const CONTEXT_REF_PREFIX: &str = "context-->";

/// Directory intermediate step outputs are written to, relative to the
/// job's working directory.
pub const TEMP_STEP_FOLDER: &str = "./temp_step_files";

pub fn is_context_ref(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|s| s.starts_with(CONTEXT_REF_PREFIX))
}

/// Every `context-->` reference inside `value`, as dotted key paths.
pub fn context_refs(value: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_refs(value, &mut found);
    found
}

fn collect_refs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if let Some(path) = s.strip_prefix(CONTEXT_REF_PREFIX) {
                out.push(path.to_string());
            }
        }
        Value::Sequence(items) => items.iter().for_each(|v| collect_refs(v, out)),
        Value::Mapping(map) => map.values().for_each(|v| collect_refs(v, out)),
        Value::Tagged(tagged) => collect_refs(&tagged.value, out),
        _ => {}
    }
}

/// One `tray_segments` entry: a module identifier and its keyword arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingUnit {
    pub module_class: String,
    pub kwargs: Mapping,
}

impl ProcessingUnit {
    pub fn to_value(&self) -> Value {
        let mut map = Mapping::new();
        map.insert("ModuleClass".into(), Value::from(self.module_class.clone()));
        map.insert("ModuleKwargs".into(), Value::Mapping(self.kwargs.clone()));
        Value::Mapping(map)
    }
}

/// Read the `tray_segments` of a step block.
pub fn parse_units(step: &Mapping) -> Result<Vec<ProcessingUnit>> {
    let items = match step.get("tray_segments") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Sequence(items)) => items,
        Some(_) => return Err(CycledagError::config("`tray_segments` must be a list")),
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let map = item.as_mapping().ok_or_else(|| {
                CycledagError::config(format!("tray segment {i} must be a mapping"))
            })?;
            let module_class = map
                .get("ModuleClass")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    CycledagError::config(format!("tray segment {i} has no `ModuleClass`"))
                })?
                .to_string();
            let kwargs = match map.get("ModuleKwargs") {
                None | Some(Value::Null) => Mapping::new(),
                Some(Value::Mapping(kwargs)) => kwargs.clone(),
                Some(_) => {
                    return Err(CycledagError::config(format!(
                        "`ModuleKwargs` of {module_class} must be a mapping"
                    )));
                }
            };
            Ok(ProcessingUnit {
                module_class,
                kwargs,
            })
        })
        .collect()
}

/// Capability applied to a processing unit before it is written out.
///
/// Handlers may validate or annotate kwargs but must leave `context-->`
/// references alone.
pub trait SegmentHandler: Send + Sync {
    fn prepare(&self, unit: &ProcessingUnit) -> Result<ProcessingUnit>;
}

/// Hands the unit through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl SegmentHandler for PassThrough {
    fn prepare(&self, unit: &ProcessingUnit) -> Result<ProcessingUnit> {
        Ok(unit.clone())
    }
}

/// Module identifier → handler. Unregistered identifiers use [`PassThrough`].
#[derive(Default)]
pub struct SegmentRegistry {
    handlers: HashMap<String, Box<dyn SegmentHandler>>,
    fallback: PassThrough,
}

impl fmt::Debug for SegmentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("SegmentRegistry").field("handlers", &names).finish()
    }
}

impl SegmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module_class: impl Into<String>, handler: impl SegmentHandler + 'static) {
        self.handlers.insert(module_class.into(), Box::new(handler));
    }

    pub fn handler(&self, module_class: &str) -> &dyn SegmentHandler {
        self.handlers
            .get(module_class)
            .map(|h| h.as_ref())
            .unwrap_or(&self.fallback)
    }

    /// Parse and prepare the units of one step, in order.
    pub fn prepare_step(&self, step: &Mapping) -> Result<Vec<ProcessingUnit>> {
        parse_units(step)?
            .iter()
            .map(|unit| self.handler(&unit.module_class).prepare(unit))
            .collect()
    }
}

/// Names of the per-step files inside `sub_process_dir`.
pub fn step_file_paths(
    sub_process_dir: &Path,
    config_base_name: &str,
    script_name: &str,
    step: usize,
) -> (PathBuf, PathBuf) {
    let stem = script_name.strip_suffix(".py").unwrap_or(script_name);
    let yaml = sub_process_dir.join(format!("{config_base_name}_step_{step:04}.yaml"));
    let python = sub_process_dir.join(format!("{stem}_step_{step:04}.py"));
    (yaml, python)
}

/// Build the namespace of step `step` out of `count`.
///
/// The step block overrides the base namespace key by key. Intermediate
/// steps read and write `./temp_step_files`, so only the last step writes
/// to `data_folder`. When `base` carries a `run_number` the final output
/// paths are recomputed for the step.
pub fn step_namespace(
    base: &Mapping,
    step_block: &Mapping,
    step: usize,
    count: usize,
    resources: &Resources,
) -> Result<Mapping> {
    let mut ns = base.clone();
    ns.extend(step_block.clone());

    let step_resources = resources.overlay(&Resources::from_layer(step_block)?);
    ns.insert("resources".into(), serde_yaml::to_value(&step_resources)?);

    let user_base_key = match step_resources.gpu_count() {
        0 => "python_user_base_cpu",
        1 => "python_user_base_gpu",
        n => {
            return Err(CycledagError::config(format!(
                "step {step} requests {n} GPUs; more than 1 GPU is not supported"
            )));
        }
    };
    if let Some(user_base) = ns.get(user_base_key).cloned() {
        ns.insert("python_user_base".into(), user_base);
    }

    if step > 0 {
        let out_dir = format_pattern("out_dir_pattern", str_key(&ns, "out_dir_pattern")?, &ns)?;
        // Without a run the file name stays a pattern for the step script.
        let out_file = if ns.contains_key("run_number") {
            format_pattern("out_file_pattern", str_key(&ns, "out_file_pattern")?, &ns)?
        } else {
            str_key(&ns, "out_file_pattern")?.to_string()
        };
        let previous = Path::new(TEMP_STEP_FOLDER)
            .join(out_dir)
            .join(str_key(&ns, "folder_pattern")?)
            .join(format!(
                "{out_file}_step{:04}.{}",
                step - 1,
                str_key(&ns, "i3_ending")?
            ));
        ns.insert(
            "in_file_pattern".into(),
            Value::from(previous.to_string_lossy().to_string()),
        );
    }

    if step + 1 < count {
        let out_file = format!("{}_step{step:04}", str_key(&ns, "out_file_pattern")?);
        ns.insert("out_file_pattern".into(), Value::from(out_file));
        ns.insert("data_folder".into(), Value::from(TEMP_STEP_FOLDER));
        if !step_block.contains_key("write_i3") {
            ns.insert("write_i3".into(), Value::Bool(true));
        }
        if !step_block.contains_key("write_hdf5") {
            ns.insert("write_hdf5".into(), Value::Bool(false));
        }
    }

    if ns.contains_key("run_number") {
        apply_final_out(&mut ns)?;
    }
    Ok(ns)
}

fn str_key<'a>(ns: &'a Mapping, key: &str) -> Result<&'a str> {
    ns.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CycledagError::config(format!("`{key}` must be set to a string")))
}
