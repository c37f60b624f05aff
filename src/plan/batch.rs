// src/plan/batch.rs

//! Planning of a whole batch.
//!
//! Planning only reads from the filesystem. Every configuration, template
//! and path-collision error surfaces here, before the writers create a
//! single file.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::config::model::{ConfigFile, DatasetVariant};
use crate::errors::{CycledagError, Result};
use crate::fs::FileSystem;
use crate::plan::corrupt::{InputChecker, ReadableInputChecker};
use crate::plan::cycler::ParameterOverlay;
use crate::plan::descriptor::{BuildContext, JobDescriptor, build, normalize_flags};
use crate::plan::paths::{PathRegistry, processing_folder};
use crate::plan::runs::{EnumerateOptions, EnumerationReport, enumerate};
use crate::plan::steps::{SegmentRegistry, step_file_paths, step_namespace};
use crate::render::format::value_to_string;
use crate::render::template::{JobTemplate, resolve_template_path};

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Skip jobs whose final outputs already exist.
    pub resume: bool,
    /// Skip jobs whose inputs do not exist. `check_existing_input` in the
    /// config takes precedence.
    pub check_input: bool,
}

/// Files written once per dataset variant into its `sub_process_dir`.
#[derive(Debug, Clone)]
pub struct VariantStep {
    pub index: usize,
    /// Step configuration handed to the processing script.
    pub config: Mapping,
    pub yaml_path: PathBuf,
    pub python_path: PathBuf,
    /// Processing script with its interpreter header, when the script was
    /// found under `<script_folder>/scripts/`.
    pub python_source: Option<String>,
    pub template: Arc<JobTemplate>,
}

#[derive(Debug, Clone)]
pub struct VariantPlan {
    pub dataset: String,
    pub overlay: ParameterOverlay,
    pub processing_folder: PathBuf,
    pub sub_process_dir: PathBuf,
    pub steps: Vec<VariantStep>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    pub variants: Vec<VariantPlan>,
    /// Jobs to write, in batch order.
    pub jobs: Vec<JobDescriptor>,
    pub report: EnumerationReport,
}

impl BatchPlan {
    /// Wrapper scripts in batch order; this is what the scheduler runs.
    pub fn job_scripts(&self) -> Vec<&Path> {
        self.jobs.iter().map(|j| j.paths.job_script.as_path()).collect()
    }
}

pub fn plan_batch(
    cfg: &ConfigFile,
    fs: &dyn FileSystem,
    registry: &SegmentRegistry,
    opts: PlanOptions,
) -> Result<BatchPlan> {
    let check_input = cfg.batch.check_existing_input.unwrap_or(opts.check_input);
    if cfg.batch.check_existing_input.is_some_and(|c| c != opts.check_input) {
        info!(check_input, "`check_existing_input` in config overrides the command line");
    }

    let checker = ReadableInputChecker;
    let mut plan = BatchPlan::default();
    let mut claimed = PathRegistry::new();
    let mut allocated = HashSet::new();
    let mut templates: HashMap<PathBuf, Arc<JobTemplate>> = HashMap::new();
    let mut ordinal = 0usize;

    for dataset in &cfg.datasets {
        info!(dataset = %dataset.name, variants = dataset.variants.len(), "planning dataset");
        let mut counter = 0usize;

        for variant in &dataset.variants {
            let variant_plan = plan_variant(
                cfg,
                fs,
                registry,
                variant,
                &mut counter,
                &mut allocated,
                &mut templates,
            )?;

            let enumeration = enumerate(
                variant,
                fs,
                EnumerateOptions {
                    checker: variant
                        .settings
                        .exclude_corrupted_input_files
                        .then_some(&checker as &dyn InputChecker),
                    resolve_inputs: check_input,
                },
            )?;
            plan.report.merge(enumeration.report);

            let step_templates: Vec<Arc<JobTemplate>> =
                variant_plan.steps.iter().map(|s| s.template.clone()).collect();
            let ctx = BuildContext {
                sub_process_dir: &variant_plan.sub_process_dir,
                config_base_name: &cfg.batch.config_base_name,
                script_name: &cfg.batch.script_name,
                templates: &step_templates,
                registry,
            };

            for unit in enumeration.units {
                let job = build(variant, unit, ordinal, &ctx)?;
                ordinal += 1;
                claimed.claim(&job.paths.job_script, &job.label())?;

                if opts.resume && output_exists(fs, &job) {
                    debug!(job = job.id(), "output exists, skipping");
                    plan.report.skipped_existing_output += 1;
                    continue;
                }
                if check_input && job.namespace.contains_key("in_file_pattern") && job.unit.inputs.is_empty() {
                    debug!(job = job.id(), run_number = job.unit.run_number, "no input files, skipping");
                    plan.report.skipped_missing_input += 1;
                    continue;
                }
                plan.jobs.push(job);
            }

            plan.variants.push(variant_plan);
        }
    }

    info!(
        jobs = plan.jobs.len(),
        skipped_existing_output = plan.report.skipped_existing_output,
        skipped_missing_input = plan.report.skipped_missing_input,
        corrupted_inputs = plan.report.corrupted.len(),
        missing_from_grl = plan.report.warnings.len(),
        "batch planned"
    );
    Ok(plan)
}

fn plan_variant(
    cfg: &ConfigFile,
    fs: &dyn FileSystem,
    registry: &SegmentRegistry,
    variant: &DatasetVariant,
    counter: &mut usize,
    allocated: &mut HashSet<PathBuf>,
    templates: &mut HashMap<PathBuf, Arc<JobTemplate>>,
) -> Result<VariantPlan> {
    let mut ns = variant.tree.as_mapping().clone();
    let processing_folder = processing_folder(&ns)?;
    let sub_process_dir = allocate_sub_process_dir(fs, &processing_folder, counter, allocated);
    ns.insert(
        "processing_folder".into(),
        Value::from(processing_folder.to_string_lossy().to_string()),
    );
    ns.insert(
        "sub_process_dir".into(),
        Value::from(sub_process_dir.to_string_lossy().to_string()),
    );
    normalize_flags(&mut ns);

    let blocks = &variant.settings.processing_steps;
    let mut steps = Vec::with_capacity(blocks.len());
    for (index, block) in blocks.iter().enumerate() {
        let mut config = step_namespace(&ns, block, index, blocks.len(), &variant.resources)?;
        normalize_flags(&mut config);

        let units = registry.prepare_step(block)?;
        if !units.is_empty() {
            config.insert(
                "tray_segments".into(),
                Value::Sequence(units.iter().map(|u| u.to_value()).collect()),
            );
        }

        let script_name = config
            .get("script_name")
            .and_then(Value::as_str)
            .unwrap_or(cfg.batch.script_name.as_str())
            .to_string();
        let (yaml_path, python_path) =
            step_file_paths(&sub_process_dir, &cfg.batch.config_base_name, &script_name, index);

        let template = load_template(fs, &config, cfg.batch.config_dir.as_deref(), templates)?;
        let python_source = load_script(fs, &config, cfg.batch.config_dir.as_deref(), &script_name)?;

        steps.push(VariantStep {
            index,
            config,
            yaml_path,
            python_path,
            python_source,
            template,
        });
    }

    Ok(VariantPlan {
        dataset: variant.dataset.clone(),
        overlay: variant.overlay.clone(),
        processing_folder,
        sub_process_dir,
        steps,
    })
}

/// `<processing_folder>/processing_steps_NNNN`, the first counter that is
/// neither on disk nor taken by an earlier variant of this batch.
fn allocate_sub_process_dir(
    fs: &dyn FileSystem,
    processing_folder: &Path,
    counter: &mut usize,
    allocated: &mut HashSet<PathBuf>,
) -> PathBuf {
    loop {
        let candidate = processing_folder.join(format!("processing_steps_{:04}", *counter));
        *counter += 1;
        if !fs.exists(&candidate) && allocated.insert(candidate.clone()) {
            return candidate;
        }
    }
}

fn load_template(
    fs: &dyn FileSystem,
    step: &Mapping,
    config_dir: Option<&str>,
    cache: &mut HashMap<PathBuf, Arc<JobTemplate>>,
) -> Result<Arc<JobTemplate>> {
    let name = step
        .get("job_template")
        .and_then(Value::as_str)
        .ok_or_else(|| CycledagError::config("processing step has no `job_template`"))?;
    let path = resolve_template_path(fs, config_dir, name);
    if let Some(template) = cache.get(&path) {
        return Ok(template.clone());
    }
    let template = Arc::new(JobTemplate::load(fs, &path)?);
    debug!(path = ?path, placeholders = template.placeholders().len(), "loaded job template");
    cache.insert(path, template.clone());
    Ok(template)
}

/// Read `<script_folder>/scripts/<script_name>` and prepend the
/// interpreter header. `script_folder` defaults to the config directory.
fn load_script(
    fs: &dyn FileSystem,
    step: &Mapping,
    config_dir: Option<&str>,
    script_name: &str,
) -> Result<Option<String>> {
    let folder = step
        .get("script_folder")
        .and_then(Value::as_str)
        .or(config_dir)
        .unwrap_or(".");
    let path = Path::new(folder).join("scripts").join(script_name);
    if !fs.is_file(&path) {
        debug!(path = ?path, "no processing script found, step files only");
        return Ok(None);
    }
    let body = fs.read_to_string(&path)?;
    Ok(Some(format!("{}{body}", script_header(step))))
}

fn script_header(step: &Mapping) -> String {
    match step.get("cvmfs_python") {
        Some(python) => {
            let mut header = format!(
                "#!/bin/sh /cvmfs/icecube.opensciencegrid.org/{}/icetray-start\n",
                value_to_string(python)
            );
            if let Some(meta) = step.get("icetray_metaproject") {
                header.push_str(&format!("#METAPROJECT {}\n", value_to_string(meta)));
            }
            header
        }
        None => "#!/usr/bin/env python3\n".to_string(),
    }
}

/// Whether the outputs the last step declares are already on disk. A job
/// that declares neither hdf5 nor i3 output is never considered done.
pub fn output_exists(fs: &dyn FileSystem, job: &JobDescriptor) -> bool {
    let Some(last) = job.last_step() else {
        return false;
    };
    let ns = &last.namespace;
    let Some(final_out) = ns.get("final_out").and_then(Value::as_str) else {
        return false;
    };
    let flag = |key: &str| ns.get(key).and_then(Value::as_bool).unwrap_or(false);

    let mut expected = Vec::new();
    if flag("write_hdf5") {
        expected.push(PathBuf::from(format!("{final_out}.hdf5")));
    }
    if flag("write_i3") {
        let ending = ns.get("i3_ending").and_then(Value::as_str).unwrap_or("i3.zst");
        expected.push(PathBuf::from(format!("{final_out}.{ending}")));
    }
    !expected.is_empty() && expected.iter().all(|p| fs.is_file(p))
}
