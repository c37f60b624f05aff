#![allow(dead_code)]

use cycledag::config::{ConfigFile, RawConfigFile};
use cycledag::errors::Result;
use serde_yaml::{Mapping, Value};

/// Template path used by [`ConfigFileBuilder::new`].
pub const TEMPLATE_PATH: &str = "/templates/job.sh";

/// Minimal job template: every step runs the python script on its YAML.
pub const TEMPLATE_SOURCE: &str = "#!/bin/bash\n\
python {python_path} {yaml_path} --run {run_number}\n\
JOB_RC=$?\n\
exit $JOB_RC\n";

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from a global scope that passes validation once a dataset with a
/// run source is added.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        let mut global = Mapping::new();
        for (key, value) in [
            ("data_folder", Value::from("/data/user")),
            ("out_dir_pattern", Value::from("{data_type}/{dataset_name}")),
            ("out_file_pattern", Value::from("{dataset_name}_{run_number:06d}")),
            ("folder_pattern", Value::from("{folder_num:04d}")),
            ("n_jobs_per_folder", Value::from(1000)),
            ("job_template", Value::from(TEMPLATE_PATH)),
            ("config_base_name", Value::from("config")),
            ("write_hdf5", Value::Bool(true)),
            ("write_i3", Value::Bool(false)),
        ] {
            global.insert(key.into(), value);
        }
        let mut step = Mapping::new();
        step.insert("tray_segments".into(), Value::Sequence(Vec::new()));
        global.insert("processing_steps".into(), Value::Sequence(vec![Value::Mapping(step)]));

        Self {
            config: RawConfigFile {
                global,
                datasets: Vec::new(),
                source: None,
            },
        }
    }

    pub fn global(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.config.global.insert(key.into(), value.into());
        self
    }

    /// Set a global key from a YAML snippet, e.g. `"[1, 2, 3]"`.
    pub fn global_yaml(self, key: &str, yaml: &str) -> Self {
        let value: Value = serde_yaml::from_str(yaml).expect("invalid YAML in test builder");
        self.global(key, value)
    }

    pub fn without_global(mut self, key: &str) -> Self {
        self.config.global.remove(key);
        self
    }

    pub fn with_dataset(mut self, name: &str, dataset: DatasetBuilder) -> Self {
        self.config.datasets.push((name.to_string(), dataset.block));
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build().expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for one `datasets` entry.
pub struct DatasetBuilder {
    block: Mapping,
}

impl DatasetBuilder {
    pub fn new(data_type: &str) -> Self {
        let mut block = Mapping::new();
        block.insert("data_type".into(), Value::from(data_type));
        Self { block }
    }

    pub fn runs_range(self, start: u64, end: u64) -> Self {
        self.set(
            "runs_range",
            Value::Sequence(vec![Value::from(start), Value::from(end)]),
        )
    }

    pub fn runs_list(self, runs: &[u64]) -> Self {
        self.set(
            "runs_list",
            Value::Sequence(runs.iter().map(|r| Value::from(*r)).collect()),
        )
    }

    /// Add a cycled parameter.
    pub fn cycle(mut self, key: &str, values: Vec<Value>) -> Self {
        if !self.block.contains_key("cycler") {
            self.block.insert("cycler".into(), Value::Mapping(Mapping::new()));
        }
        if let Some(Value::Mapping(map)) = self.block.get_mut("cycler") {
            map.insert(key.into(), Value::Sequence(values));
        }
        self
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.block.insert(key.into(), value.into());
        self
    }

    pub fn set_yaml(self, key: &str, yaml: &str) -> Self {
        let value: Value = serde_yaml::from_str(yaml).expect("invalid YAML in test builder");
        self.set(key, value)
    }

    pub fn build(self) -> Mapping {
        self.block
    }
}
