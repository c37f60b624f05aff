// src/plan/paths.rs

//! Path resolution for run units.
//!
//! Every path is a pure function of the job namespace:
//!
//! ```text
//! <data_folder>/processing/<out_dir>/jobs/<folder>/job_<name>.sh
//! <data_folder>/processing/<out_dir>/logs/<folder>/
//! <data_folder>/<out_dir>/<folder>/<out_file>
//! ```
//!
//! where `<folder>` is the formatted `folder_pattern` and `<name>` the
//! basename of the final output.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::config::model::DatasetVariant;
use crate::errors::{CycledagError, Result};
use crate::fs::{FileSystem, expand_glob};
use crate::render::format::{format_str, unescape_path, value_to_string};

/// Folder sizes that keep directories reasonably small.
pub const ALLOWED_FOLDER_SIZES: [u64; 5] = [1, 10, 100, 1000, 10000];

/// Folder-numbering variables derived from a run number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderVars {
    pub run_number: u64,
    pub folder_num_pre_offset: u64,
    pub folder_num: u64,
    pub folder_num_pre_offset_n_merged: u64,
    pub folder_num_n_merged: u64,
}

/// `folder_num = offset + run // n` and the `_n_merged` variants computed
/// from `merge_factor * run`. Arithmetic overflow is a configuration error.
pub fn folder_vars(
    run_number: u64,
    folder_offset: u64,
    n_jobs_per_folder: u64,
    merge_factor: u64,
) -> Result<FolderVars> {
    let n = n_jobs_per_folder.max(1);
    let overflow = || {
        CycledagError::config(format!(
            "folder number overflows for run {run_number} (folder_offset {folder_offset}, merge factor {merge_factor})"
        ))
    };
    let merged = merge_factor.max(1).checked_mul(run_number).ok_or_else(overflow)?;
    Ok(FolderVars {
        run_number,
        folder_num_pre_offset: run_number / n,
        folder_num: folder_offset.checked_add(run_number / n).ok_or_else(overflow)?,
        folder_num_pre_offset_n_merged: merged / n,
        folder_num_n_merged: folder_offset.checked_add(merged / n).ok_or_else(overflow)?,
    })
}

impl FolderVars {
    pub fn apply(&self, ns: &mut Mapping) {
        ns.insert("run_number".into(), Value::from(self.run_number));
        ns.insert("folder_num_pre_offset".into(), Value::from(self.folder_num_pre_offset));
        ns.insert("folder_num".into(), Value::from(self.folder_num));
        ns.insert(
            "folder_num_pre_offset_n_merged".into(),
            Value::from(self.folder_num_pre_offset_n_merged),
        );
        ns.insert("folder_num_n_merged".into(), Value::from(self.folder_num_n_merged));
    }
}

/// Format a configured path pattern; unknown names are configuration
/// errors.
pub fn format_pattern(key: &str, pattern: &str, ns: &Mapping) -> Result<String> {
    format_str(pattern, ns).map_err(|e| CycledagError::config(format!("`{key}` ({pattern:?}): {e}")))
}

fn ns_str<'a>(ns: &'a Mapping, key: &str) -> Result<&'a str> {
    ns.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CycledagError::config(format!("`{key}` must be set to a string")))
}

/// Namespace of one run unit: the variant tree, the unit's own settings,
/// the folder variables and the formatted `folder_pattern`.
///
/// Run units of a merging dataset are represented by their lowest run, which
/// already is the first merged input run. Their `_n_merged` variables are
/// therefore computed with a factor of 1 and equal the plain ones.
pub fn unit_namespace(variant: &DatasetVariant, run_number: u64, unit_settings: &Mapping) -> Result<Mapping> {
    let settings = &variant.settings;
    let mut ns = variant.tree.overlay(unit_settings).into_mapping();
    folder_vars(run_number, settings.folder_offset, settings.n_jobs_per_folder, 1)?.apply(&mut ns);

    let folder = format_pattern("folder_pattern", &settings.folder_pattern, &ns)?;
    ns.insert("folder_pattern".into(), Value::from(folder));
    Ok(ns)
}

/// `<data_folder>/processing/<out_dir>`; needs no run-specific values.
pub fn processing_folder(ns: &Mapping) -> Result<PathBuf> {
    let data_folder = ns_str(ns, "data_folder")?;
    let out_dir = format_pattern("out_dir_pattern", ns_str(ns, "out_dir_pattern")?, ns)?;
    let joined = Path::new(&format!("{data_folder}/processing")).join(out_dir);
    Ok(PathBuf::from(unescape_path(&joined.to_string_lossy())))
}

/// Compute `final_out`, `final_out_scratch` and `output_folder` and store
/// them in `ns`. Returns the final output path.
pub fn apply_final_out(ns: &mut Mapping) -> Result<PathBuf> {
    let data_folder = ns_str(ns, "data_folder")?;
    let out_dir = format_pattern("out_dir_pattern", ns_str(ns, "out_dir_pattern")?, ns)?;
    let folder = format_pattern("folder_pattern", ns_str(ns, "folder_pattern")?, ns)?;
    let out_file = format_pattern("out_file_pattern", ns_str(ns, "out_file_pattern")?, ns)?;

    let joined = Path::new(data_folder).join(out_dir).join(folder).join(out_file);
    let final_out = PathBuf::from(unescape_path(&joined.to_string_lossy()));
    let scratch = final_out
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let output_folder = final_out.parent().map(Path::to_path_buf).unwrap_or_default();

    ns.insert("final_out".into(), Value::from(final_out.to_string_lossy().to_string()));
    ns.insert("final_out_scratch".into(), Value::from(scratch));
    ns.insert(
        "output_folder".into(),
        Value::from(output_folder.to_string_lossy().to_string()),
    );
    Ok(final_out)
}

/// The resolved paths of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathBundle {
    pub processing_folder: PathBuf,
    pub log_dir: PathBuf,
    pub jobs_output: PathBuf,
    pub final_out: PathBuf,
    pub final_out_scratch: String,
    pub output_folder: PathBuf,
    /// Basename of the final output; names the job and its scripts.
    pub job_name: String,
    pub job_script: PathBuf,
    pub steps_dir: PathBuf,
}

impl PathBundle {
    pub fn step_script(&self, step: usize) -> PathBuf {
        self.steps_dir.join(format!("job_{}_step_{step:04}.sh", self.job_name))
    }

    /// Store the directory paths in the job namespace.
    pub fn apply(&self, ns: &mut Mapping) {
        for (key, path) in [
            ("processing_folder", &self.processing_folder),
            ("log_dir", &self.log_dir),
            ("jobs_output", &self.jobs_output),
        ] {
            ns.insert(key.into(), Value::from(path.to_string_lossy().to_string()));
        }
    }
}

/// Resolve the path bundle of a unit namespace (see [`unit_namespace`]).
/// `final_out` and friends are written into `ns` as a side effect.
pub fn resolve(ns: &mut Mapping) -> Result<PathBundle> {
    let processing_folder = processing_folder(ns)?;
    let folder = ns_str(ns, "folder_pattern")?.to_string();
    let log_dir = processing_folder.join("logs").join(&folder);
    let jobs_output = processing_folder.join("jobs").join(&folder);

    let final_out = apply_final_out(ns)?;
    let job_name = ns_str(ns, "final_out_scratch")?.to_string();
    if job_name.is_empty() {
        return Err(CycledagError::config(format!(
            "`out_file_pattern` resolves to an empty file name for {final_out:?}"
        )));
    }
    let output_folder = PathBuf::from(ns_str(ns, "output_folder")?);

    let bundle = PathBundle {
        job_script: jobs_output.join(format!("job_{job_name}.sh")),
        steps_dir: jobs_output.join(format!("steps_{job_name}")),
        processing_folder,
        log_dir,
        jobs_output,
        final_out,
        final_out_scratch: job_name.clone(),
        output_folder,
        job_name,
    };
    bundle.apply(ns);
    Ok(bundle)
}

/// Expand `in_file_pattern` (a pattern or a list of them) into existing
/// files.
pub fn resolve_inputs(fs: &dyn FileSystem, ns: &Mapping) -> Result<Vec<PathBuf>> {
    let patterns: Vec<String> = match ns.get("in_file_pattern") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Sequence(items)) => items.iter().map(value_to_string).collect(),
        Some(other) => vec![value_to_string(other)],
    };

    let mut inputs = Vec::new();
    for pattern in patterns {
        let formatted = unescape_path(&format_pattern("in_file_pattern", &pattern, ns)?);
        inputs.extend(expand_glob(fs, &formatted)?.into_iter().filter(|p| fs.is_file(p)));
    }
    Ok(inputs)
}

/// Tracks which job owns each script path within one batch.
#[derive(Debug, Default)]
pub struct PathRegistry {
    owners: HashMap<PathBuf, String>,
}

impl PathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path` for `owner`; a second claim is a [`CycledagError::PathCollision`].
    pub fn claim(&mut self, path: &Path, owner: &str) -> Result<()> {
        if let Some(first) = self.owners.get(path) {
            return Err(CycledagError::PathCollision {
                path: path.to_path_buf(),
                first: first.clone(),
                second: owner.to_string(),
            });
        }
        self.owners.insert(path.to_path_buf(), owner.to_string());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
