// src/config/model.rs

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};

use crate::config::tree::ConfigTree;
use crate::plan::cycler::{CyclerSpec, ParameterOverlay};
use crate::plan::filter::FilterPredicate;
use crate::types::DataType;

/// Configuration as read from a YAML file, before validation.
///
/// ```yaml
/// resources: {cpus: 1, gpus: 0, memory: 2gb}
/// dagman_max_jobs: 500
/// out_dir_pattern: "{data_type}/{dataset_name}"
/// folder_pattern: "{folder_num:04d}"
/// n_jobs_per_folder: 1000
///
/// datasets:
///   nugen_21217:
///     data_type: nugen
///     runs_range: [0, 100]
///     cycler:
///       energy_cut: [100, 1000]
/// ```
///
/// Everything except `datasets` is the global scope that each dataset
/// inherits.
#[derive(Debug, Clone, Default)]
pub struct RawConfigFile {
    pub global: Mapping,
    /// Dataset blocks in declaration order.
    pub datasets: Vec<(String, Mapping)>,
    /// File the config was read from, if any.
    pub source: Option<PathBuf>,
}

/// A fully validated configuration.
///
/// Constructed through `TryFrom<RawConfigFile>`; every check that can fail
/// has already run, so nothing downstream needs to re-validate.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub global: ConfigTree,
    pub datasets: Vec<DatasetConfig>,
    pub batch: BatchSettings,
    pub throttle: Throttle,
    pub source: Option<PathBuf>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        global: ConfigTree,
        datasets: Vec<DatasetConfig>,
        batch: BatchSettings,
        throttle: Throttle,
        source: Option<PathBuf>,
    ) -> Self {
        Self {
            global,
            datasets,
            batch,
            throttle,
            source,
        }
    }

    /// Total number of (dataset, overlay) combinations.
    pub fn variant_count(&self) -> usize {
        self.datasets.iter().map(|d| d.variants.len()).sum()
    }
}

/// One entry of `datasets`, merged onto the global scope.
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub name: String,
    /// The dataset block exactly as written.
    pub block: Mapping,
    /// Global scope with the block applied and `dataset_name` set.
    pub tree: ConfigTree,
    pub cycler: CyclerSpec,
    /// One variant per parameter overlay, in cycler order.
    pub variants: Vec<DatasetVariant>,
}

/// A dataset with one parameter overlay applied.
#[derive(Debug, Clone)]
pub struct DatasetVariant {
    pub dataset: String,
    pub overlay: ParameterOverlay,
    pub tree: ConfigTree,
    pub settings: DatasetSettings,
    pub filters: Vec<FilterPredicate>,
    /// Resources merged field-wise global → dataset → overlay.
    pub resources: Resources,
}

/// Typed view of the keys the engine itself interprets.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetSettings {
    #[serde(deserialize_with = "de_data_type")]
    pub data_type: DataType,

    pub data_folder: Option<String>,

    #[serde(default)]
    pub in_file_pattern: Option<OneOrMany>,

    pub out_dir_pattern: String,
    pub out_file_pattern: String,
    pub folder_pattern: String,

    #[serde(default)]
    pub folder_offset: u64,

    pub n_jobs_per_folder: u64,

    #[serde(default)]
    pub n_runs_per_merge: Option<u64>,

    #[serde(default = "default_i3_ending")]
    pub i3_ending: String,

    /// Default job-script template; a step may name its own.
    #[serde(default)]
    pub job_template: Option<String>,

    /// `[start, end)` or `[start, end, step]`.
    #[serde(default)]
    pub runs_range: Option<Vec<u64>>,

    #[serde(default)]
    pub runs_list: Option<Vec<u64>>,

    #[serde(default)]
    pub runs_to_ignore: Vec<u64>,

    /// `(column, operator, value)` triples, all of which must hold.
    #[serde(default, alias = "exp_dataset_filter")]
    pub run_filter: Vec<(String, String, Value)>,

    #[serde(default)]
    pub run_number_settings: Option<Mapping>,

    #[serde(default)]
    pub exp_dataset_run_glob: Option<String>,
    #[serde(default)]
    pub exp_dataset_grl_paths: Option<OneOrMany>,
    #[serde(default)]
    pub exp_dataset_years: Option<Vec<i32>>,
    #[serde(default)]
    pub year: Option<Value>,
    #[serde(default)]
    pub exp_dataset_months: Option<Vec<u32>>,
    #[serde(default)]
    pub exp_dataset_days: Option<Vec<u32>>,
    #[serde(default = "default_subrun_pattern")]
    pub exp_dataset_subrun_pattern: String,
    #[serde(default = "default_gcd_pattern")]
    pub exp_dataset_gcd_pattern: String,
    /// Gaps files of a discovered run; formatted with the run's settings.
    #[serde(default = "default_gaps_pattern")]
    pub exp_dataset_gaps_pattern: String,
    #[serde(default = "default_true", deserialize_with = "de_bool_like")]
    pub exp_data_warn_missing: bool,

    #[serde(default, alias = "filter_corrupted_files", deserialize_with = "de_bool_like")]
    pub exclude_corrupted_input_files: bool,

    #[serde(default)]
    pub processing_steps: Vec<Mapping>,
}

fn default_i3_ending() -> String {
    "i3.zst".to_string()
}

fn default_subrun_pattern() -> String {
    "Level2*Run*_Subrun00000000_????????.i3.zst".to_string()
}

fn default_gcd_pattern() -> String {
    "Level2*GCD*.i3*".to_string()
}

fn default_gaps_pattern() -> String {
    "{run_folder}/*_gaps.txt".to_string()
}

fn default_true() -> bool {
    true
}

impl DatasetSettings {
    /// Runs merged into one job (`n_runs_per_merge`, default 1).
    pub fn merge_factor(&self) -> u64 {
        self.n_runs_per_merge.unwrap_or(1).max(1)
    }
}

/// A value that may be written as a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s.clone()],
            OneOrMany::Many(v) => v.clone(),
        }
    }
}

/// Batch-wide settings read from the global scope only.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSettings {
    pub data_folder: Option<String>,

    #[serde(default)]
    pub processing_scratch: Option<String>,

    #[serde(default = "default_script_name")]
    pub script_name: String,

    #[serde(default = "default_config_base_name")]
    pub config_base_name: String,

    /// Directory of the config file; relative template and script paths
    /// are resolved against it.
    #[serde(default)]
    pub config_dir: Option<String>,

    /// Keep all scheduler logs in one directory instead of 1000-job buckets.
    #[serde(default, deserialize_with = "de_bool_like")]
    pub merge_files: bool,

    /// Optional script run once after every job of the batch finished.
    #[serde(default)]
    pub dagman_final_script: Option<String>,

    #[serde(default, deserialize_with = "de_opt_bool_like")]
    pub check_existing_input: Option<bool>,
}

fn default_script_name() -> String {
    "general_i3_processing.py".to_string()
}

fn default_config_base_name() -> String {
    "config".to_string()
}

/// Scheduler throttling directives; passed through to `dagman.config`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Throttle {
    #[serde(default)]
    pub dagman_max_jobs: Option<i64>,
    #[serde(default)]
    pub dagman_submits_interval: Option<i64>,
    #[serde(default)]
    pub dagman_scan_interval: Option<i64>,
    #[serde(default)]
    pub dagman_submit_delay: Option<i64>,
}

impl Throttle {
    pub const DEFAULT_MAX_JOBS: i64 = 1000;

    pub fn max_jobs(&self) -> i64 {
        self.dagman_max_jobs.unwrap_or(Self::DEFAULT_MAX_JOBS)
    }

    /// Named directives, for validation and diagnostics.
    pub fn entries(&self) -> [(&'static str, Option<i64>); 4] {
        [
            ("dagman_max_jobs", self.dagman_max_jobs),
            ("dagman_submits_interval", self.dagman_submits_interval),
            ("dagman_scan_interval", self.dagman_scan_interval),
            ("dagman_submit_delay", self.dagman_submit_delay),
        ]
    }
}

/// Resource request of a job or processing step.
///
/// Every field is optional so that layers can be merged field by field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Resources {
    #[serde(default)]
    pub cpus: Option<u32>,
    #[serde(default)]
    pub gpus: Option<u32>,
    #[serde(default, deserialize_with = "de_opt_string_or_number")]
    pub memory: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string_or_number")]
    pub disk: Option<String>,
    #[serde(default, deserialize_with = "de_opt_bool_like")]
    pub only_sl6: Option<bool>,
    #[serde(default, deserialize_with = "de_opt_bool_like")]
    pub has_ssse3: Option<bool>,
    #[serde(default, deserialize_with = "de_opt_bool_like")]
    pub has_avx2: Option<bool>,
    #[serde(default)]
    pub cuda_compute_capability: Option<Vec<f64>>,
}

impl Resources {
    /// Fields set in `more_specific` win; unset fields are inherited.
    pub fn overlay(&self, more_specific: &Resources) -> Resources {
        Resources {
            cpus: more_specific.cpus.or(self.cpus),
            gpus: more_specific.gpus.or(self.gpus),
            memory: more_specific.memory.clone().or_else(|| self.memory.clone()),
            disk: more_specific.disk.clone().or_else(|| self.disk.clone()),
            only_sl6: more_specific.only_sl6.or(self.only_sl6),
            has_ssse3: more_specific.has_ssse3.or(self.has_ssse3),
            has_avx2: more_specific.has_avx2.or(self.has_avx2),
            cuda_compute_capability: more_specific
                .cuda_compute_capability
                .clone()
                .or_else(|| self.cuda_compute_capability.clone()),
        }
    }

    pub fn gpu_count(&self) -> u32 {
        self.gpus.unwrap_or(0)
    }

    /// Read the `resources` key of a layer; absent means "no overrides".
    pub fn from_layer(layer: &Mapping) -> crate::errors::Result<Resources> {
        match layer.get("resources") {
            None | Some(Value::Null) => Ok(Resources::default()),
            Some(value) => Ok(serde_yaml::from_value(value.clone())?),
        }
    }
}

fn de_data_type<'de, D>(deserializer: D) -> Result<DataType, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

fn de_opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {other:?}"
        ))),
    }
}

fn de_bool_like<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_bool_like(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("expected a boolean, got {value:?}")))
}

fn de_opt_bool_like<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => parse_bool_like(&value)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("expected a boolean, got {value:?}"))),
    }
}

/// Parse the loose boolean spellings found in configs: YAML booleans,
/// `"True"`/`"False"` strings and `0`/`1` integers.
pub fn parse_bool_like(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
