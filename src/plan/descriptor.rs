// src/plan/descriptor.rs

//! Job descriptors: everything needed to render one job, assembled once and
//! never mutated afterwards.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::{Mapping, Value};

use crate::config::model::{DatasetVariant, Resources, parse_bool_like};
use crate::errors::{CycledagError, Result};
use crate::plan::cycler::ParameterOverlay;
use crate::plan::paths::{PathBundle, resolve, unit_namespace};
use crate::plan::runs::RunUnit;
use crate::plan::steps::{ProcessingUnit, SegmentRegistry, step_file_paths, step_namespace};
use crate::render::template::JobTemplate;

/// Keys rendered as `true` / `false` whatever spelling the config used.
pub const BOOLEAN_FLAGS: [&str; 3] = ["keep_crashed_files", "write_hdf5", "write_i3"];

#[derive(Debug, Clone)]
pub struct StepDescriptor {
    pub index: usize,
    pub namespace: Mapping,
    pub units: Vec<ProcessingUnit>,
    pub resources: Resources,
    pub yaml_path: PathBuf,
    pub python_path: PathBuf,
    pub script_path: PathBuf,
    pub template: Arc<JobTemplate>,
}

#[derive(Debug, Clone)]
pub struct JobDescriptor {
    /// Position in the full batch order, before any resume/input skips.
    pub ordinal: usize,
    pub dataset: String,
    pub overlay: ParameterOverlay,
    pub unit: RunUnit,
    pub paths: PathBundle,
    pub namespace: Mapping,
    /// Element-wise maximum over the steps.
    pub resources: Resources,
    pub steps: Vec<StepDescriptor>,
}

impl JobDescriptor {
    /// Job identifier: the basename of the final output.
    pub fn id(&self) -> &str {
        &self.paths.job_name
    }

    /// Human-readable owner, used in collision reports.
    pub fn label(&self) -> String {
        if self.overlay.is_empty() {
            format!("{} run {}", self.dataset, self.unit.run_number)
        } else {
            format!(
                "{} [{}] run {}",
                self.dataset,
                self.overlay.label(),
                self.unit.run_number
            )
        }
    }

    pub fn last_step(&self) -> Option<&StepDescriptor> {
        self.steps.last()
    }
}

/// Per-variant inputs shared by every job of that variant.
pub struct BuildContext<'a> {
    pub sub_process_dir: &'a Path,
    pub config_base_name: &'a str,
    pub script_name: &'a str,
    /// One template per processing step.
    pub templates: &'a [Arc<JobTemplate>],
    pub registry: &'a SegmentRegistry,
}

pub fn build(
    variant: &DatasetVariant,
    unit: RunUnit,
    ordinal: usize,
    ctx: &BuildContext<'_>,
) -> Result<JobDescriptor> {
    let mut ns = unit_namespace(variant, unit.run_number, &unit.settings)?;
    ns.insert(
        "sub_process_dir".into(),
        Value::from(ctx.sub_process_dir.to_string_lossy().to_string()),
    );
    let paths = resolve(&mut ns)?;
    normalize_flags(&mut ns);

    let blocks = &variant.settings.processing_steps;
    let mut steps = Vec::with_capacity(blocks.len());
    for (index, block) in blocks.iter().enumerate() {
        let mut step_ns = step_namespace(&ns, block, index, blocks.len(), &variant.resources)?;
        let script_name = step_ns
            .get("script_name")
            .and_then(Value::as_str)
            .unwrap_or(ctx.script_name)
            .to_string();
        let (yaml_path, python_path) =
            step_file_paths(ctx.sub_process_dir, ctx.config_base_name, &script_name, index);
        step_ns.insert(
            "yaml_path".into(),
            Value::from(yaml_path.to_string_lossy().to_string()),
        );
        step_ns.insert(
            "python_path".into(),
            Value::from(python_path.to_string_lossy().to_string()),
        );
        normalize_flags(&mut step_ns);

        let resources = variant.resources.overlay(&Resources::from_layer(block)?);
        let template = ctx.templates.get(index).cloned().ok_or_else(|| {
            CycledagError::config(format!("no job template for step {index}"))
        })?;

        steps.push(StepDescriptor {
            index,
            namespace: step_ns,
            units: ctx.registry.prepare_step(block)?,
            resources,
            yaml_path,
            python_path,
            script_path: paths.step_script(index),
            template,
        });
    }

    let resources = max_resources(steps.iter().map(|s| &s.resources));
    Ok(JobDescriptor {
        ordinal,
        dataset: variant.dataset.clone(),
        overlay: variant.overlay.clone(),
        unit,
        paths,
        namespace: ns,
        resources,
        steps,
    })
}

/// Rewrite loosely spelled booleans (`"True"`, `0`, ...) to YAML booleans.
pub fn normalize_flags(ns: &mut Mapping) {
    for key in BOOLEAN_FLAGS {
        if let Some(flag) = ns.get(key).and_then(parse_bool_like) {
            ns.insert(key.into(), Value::Bool(flag));
        }
    }
}

/// Job-level request: the largest value any step asks for.
pub fn max_resources<'a>(steps: impl IntoIterator<Item = &'a Resources>) -> Resources {
    let mut out = Resources::default();
    for r in steps {
        out.cpus = out.cpus.max(r.cpus);
        out.gpus = out.gpus.max(r.gpus);
        out.memory = larger_size(out.memory.take(), r.memory.clone());
        out.disk = larger_size(out.disk.take(), r.disk.clone());
        out.only_sl6 = or_flag(out.only_sl6, r.only_sl6);
        out.has_ssse3 = or_flag(out.has_ssse3, r.has_ssse3);
        out.has_avx2 = or_flag(out.has_avx2, r.has_avx2);
        if let Some(caps) = &r.cuda_compute_capability {
            let merged = out.cuda_compute_capability.get_or_insert_with(Vec::new);
            for cap in caps {
                if !merged.contains(cap) {
                    merged.push(*cap);
                }
            }
        }
    }
    out
}

fn or_flag(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(false) || b.unwrap_or(false)),
    }
}

fn larger_size(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (None, b) => b,
        (a, None) => a,
        (Some(a), Some(b)) => match size_in_mb(&a).partial_cmp(&size_in_mb(&b)) {
            Some(Ordering::Less) => Some(b),
            _ => Some(a),
        },
    }
}

/// Parse sizes like `2gb`, `1.5 GB`, `512MB` or `3000` (megabytes) into
/// megabytes. Unparseable sizes compare as zero.
pub fn size_in_mb(size: &str) -> f64 {
    let s = size.trim().to_ascii_lowercase();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let Ok(number) = number.parse::<f64>() else {
        return 0.0;
    };
    let factor = match unit.trim() {
        "" | "m" | "mb" | "mib" => 1.0,
        "k" | "kb" | "kib" => 1.0 / 1024.0,
        "g" | "gb" | "gib" => 1024.0,
        "t" | "tb" | "tib" => 1024.0 * 1024.0,
        _ => return 0.0,
    };
    number * factor
}
