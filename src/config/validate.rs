// src/config/validate.rs

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::config::model::{
    BatchSettings, ConfigFile, DatasetConfig, DatasetSettings, DatasetVariant, RawConfigFile,
    Resources, Throttle,
};
use crate::config::tree::{ConfigTree, ValueShape};
use crate::errors::{CycledagError, Result};
use crate::plan::cycler::{self, CyclerSpec};
use crate::plan::filter::parse_predicates;
use crate::plan::paths::ALLOWED_FOLDER_SIZES;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::CycledagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_datasets(&raw)?;

        let global = ConfigTree::from_mapping(raw.global.clone());
        let throttle = validate_throttle(&global)?;
        let batch: BatchSettings = global
            .to_typed()
            .map_err(|e| CycledagError::config(format!("global settings: {}", plain(e))))?;
        let global_resources = Resources::from_layer(global.as_mapping())
            .map_err(|e| CycledagError::config(format!("global `resources`: {}", plain(e))))?;

        let mut datasets = Vec::with_capacity(raw.datasets.len());
        for (name, block) in &raw.datasets {
            datasets.push(validate_dataset(&global, &global_resources, name, block)?);
        }

        let cfg = ConfigFile::new_unchecked(global, datasets, batch, throttle, raw.source);
        debug!(
            datasets = cfg.datasets.len(),
            variants = cfg.variant_count(),
            "config validated"
        );
        Ok(cfg)
    }
}

fn ensure_has_datasets(cfg: &RawConfigFile) -> Result<()> {
    if cfg.datasets.is_empty() {
        return Err(CycledagError::config(
            "config must contain at least one entry under `datasets`",
        ));
    }
    Ok(())
}

fn validate_throttle(global: &ConfigTree) -> Result<Throttle> {
    let throttle: Throttle = global
        .to_typed()
        .map_err(|e| CycledagError::config(format!("scheduler throttling: {}", plain(e))))?;
    for (key, value) in throttle.entries() {
        if let Some(v) = value {
            if v < 0 {
                return Err(CycledagError::config(format!(
                    "`{key}` must be >= 0 (got {v})"
                )));
            }
        }
    }
    Ok(throttle)
}

/// A dataset block may not replace a global mapping with a scalar or list,
/// or the other way round.
fn check_override_shapes(global: &ConfigTree, dataset: &str, block: &Mapping) -> Result<()> {
    for (key, value) in block {
        let Some(name) = key.as_str() else { continue };
        let Some(existing) = global.get(name) else { continue };
        let (was, now) = (ValueShape::of(existing), ValueShape::of(value));
        if !was.compatible_with(now) {
            return Err(CycledagError::config(format!(
                "dataset '{dataset}' overrides `{name}` with a {now:?} but the global value is a {was:?}"
            )));
        }
    }
    Ok(())
}

fn validate_dataset(
    global: &ConfigTree,
    global_resources: &Resources,
    name: &str,
    block: &Mapping,
) -> Result<DatasetConfig> {
    check_override_shapes(global, name, block)?;

    let tree = global.overlay(block).with("dataset_name", name);
    let cycler = CyclerSpec::from_value(tree.get("cycler"))
        .map_err(|e| CycledagError::config(format!("dataset '{name}': {}", plain(e))))?;
    let overlays = cycler::expand(&cycler)
        .map_err(|e| CycledagError::config(format!("dataset '{name}': {}", plain(e))))?;

    let dataset_resources = global_resources.overlay(
        &Resources::from_layer(block)
            .map_err(|e| CycledagError::config(format!("dataset '{name}' `resources`: {}", plain(e))))?,
    );

    let mut variants = Vec::with_capacity(overlays.len());
    for overlay in overlays {
        let layer = overlay.to_mapping();
        let vtree = tree.overlay(&layer);
        let context = if overlay.is_empty() {
            format!("dataset '{name}'")
        } else {
            format!("dataset '{name}' [{}]", overlay.label())
        };

        let settings: DatasetSettings = vtree
            .to_typed()
            .map_err(|e| CycledagError::config(format!("{context}: {}", plain(e))))?;
        validate_settings(&context, &settings)?;
        let vtree = with_defaults(vtree, &settings);

        let filters = parse_predicates(&settings.run_filter)?;
        let resources = dataset_resources.overlay(
            &Resources::from_layer(&layer)
                .map_err(|e| CycledagError::config(format!("{context} `resources`: {}", plain(e))))?,
        );
        validate_steps(&context, &settings, &resources)?;

        variants.push(DatasetVariant {
            dataset: name.to_string(),
            overlay,
            tree: vtree,
            settings,
            filters,
            resources,
        });
    }

    Ok(DatasetConfig {
        name: name.to_string(),
        block: block.clone(),
        tree,
        cycler,
        variants,
    })
}

/// Make serde defaults visible to pattern and template formatting.
fn with_defaults(mut tree: ConfigTree, settings: &DatasetSettings) -> ConfigTree {
    let defaults = [
        ("i3_ending", Value::from(settings.i3_ending.clone())),
        ("folder_offset", Value::from(settings.folder_offset)),
        ("script_name", Value::from("general_i3_processing.py")),
    ];
    for (key, value) in defaults {
        if !tree.contains(key) {
            tree.insert(key, value);
        }
    }
    tree
}

fn validate_settings(context: &str, settings: &DatasetSettings) -> Result<()> {
    if !ALLOWED_FOLDER_SIZES.contains(&settings.n_jobs_per_folder) {
        return Err(CycledagError::config(format!(
            "{context}: `n_jobs_per_folder` must be one of {ALLOWED_FOLDER_SIZES:?}, but is {}",
            settings.n_jobs_per_folder
        )));
    }

    if settings.data_folder.is_none() {
        return Err(CycledagError::config(format!(
            "{context}: `data_folder` is not set (use the config or --data-folder)"
        )));
    }

    if let Some(range) = &settings.runs_range {
        match range.as_slice() {
            [start, end] | [start, end, _] if start > end => {
                return Err(CycledagError::config(format!(
                    "{context}: `runs_range` start {start} is greater than end {end}"
                )));
            }
            [_, _, 0] => {
                return Err(CycledagError::config(format!(
                    "{context}: `runs_range` step must be > 0"
                )));
            }
            [_, _] | [_, _, _] => {}
            other => {
                return Err(CycledagError::config(format!(
                    "{context}: `runs_range` must be [start, end] or [start, end, step], got {other:?}"
                )));
            }
        }
    }

    let has_source = settings.exp_dataset_run_glob.is_some()
        || settings.runs_list.is_some()
        || settings.runs_range.is_some();
    if !has_source {
        return Err(CycledagError::config(format!(
            "{context}: no run source; set one of `exp_dataset_run_glob`, `runs_list` or `runs_range`"
        )));
    }

    if settings.exp_dataset_years.is_some() && settings.year.is_some() {
        return Err(CycledagError::config(format!(
            "{context}: set either `exp_dataset_years` or `year`, not both"
        )));
    }
    if let Some(months) = &settings.exp_dataset_months {
        if let Some(bad) = months.iter().find(|m| !(1..=12).contains(*m)) {
            return Err(CycledagError::config(format!(
                "{context}: invalid month {bad} in `exp_dataset_months`"
            )));
        }
    }

    if settings.n_runs_per_merge == Some(0) {
        return Err(CycledagError::config(format!(
            "{context}: `n_runs_per_merge` must be >= 1"
        )));
    }

    if settings.processing_steps.is_empty() {
        return Err(CycledagError::config(format!(
            "{context}: `processing_steps` must list at least one step"
        )));
    }

    Ok(())
}

fn validate_steps(context: &str, settings: &DatasetSettings, resources: &Resources) -> Result<()> {
    for (i, step) in settings.processing_steps.iter().enumerate() {
        let step_resources = Resources::from_layer(step).map_err(|e| {
            CycledagError::config(format!("{context}: step {i} `resources`: {}", plain(e)))
        })?;
        let effective = resources.overlay(&step_resources);
        if effective.gpu_count() > 1 {
            return Err(CycledagError::config(format!(
                "{context}: step {i} requests {} GPUs; more than 1 GPU is not supported",
                effective.gpu_count()
            )));
        }
        let has_template = step.get("job_template").and_then(Value::as_str).is_some()
            || settings.job_template.is_some();
        if !has_template {
            return Err(CycledagError::config(format!(
                "{context}: step {i} has no `job_template`"
            )));
        }
        if let Some(segments) = step.get("tray_segments") {
            if !matches!(segments, Value::Sequence(_) | Value::Null) {
                return Err(CycledagError::config(format!(
                    "{context}: step {i} `tray_segments` must be a list"
                )));
            }
        }
    }
    Ok(())
}

/// Strip the variant prefix so nested config errors don't read
/// "Configuration error: Configuration error: ...".
fn plain(err: CycledagError) -> String {
    match err {
        CycledagError::ConfigError(msg) => msg,
        other => other.to_string(),
    }
}
