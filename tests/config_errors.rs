// tests/config_errors.rs

mod common;
use crate::common::write_config;

use std::error::Error;

use serde_yaml::{Mapping, Value};
use tempfile::TempDir;

use cycledag::config::{load_and_validate, load_with_defaults};
use cycledag::errors::CycledagError;

type TestResult = Result<(), Box<dyn Error>>;

const GLOBAL: &str = r#"
data_folder: /data/user
out_dir_pattern: "{data_type}/{dataset_name}"
out_file_pattern: "{dataset_name}_{run_number:06d}"
folder_pattern: "{folder_num:04d}"
n_jobs_per_folder: 1000
job_template: templates/job_template.sh
resources:
  cpus: 1
  memory: 2gb
processing_steps:
  - tray_segments: []
"#;

fn config_with(datasets: &str) -> String {
    format!("{GLOBAL}\ndatasets:\n{datasets}")
}

fn expect_config_error(yaml: &str, needle: &str) {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "batch.yaml", yaml);
    match load_and_validate(&path) {
        Err(CycledagError::ConfigError(msg)) => {
            assert!(msg.contains(needle), "expected {needle:?} in {msg:?}")
        }
        Err(e) => panic!("Expected ConfigError, got: {e:?}"),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn valid_config_loads_with_derived_keys() -> TestResult {
    let dir = TempDir::new()?;
    let path = write_config(
        &dir,
        "nugen_batch.yaml",
        &config_with(
            r#"
  nugen_21217:
    data_type: NuGen
    runs_range: [0, 100]
"#,
        ),
    );

    let cfg = load_and_validate(&path)?;
    assert_eq!(cfg.batch.config_base_name, "nugen_batch");
    assert_eq!(
        cfg.batch.config_dir.as_deref(),
        Some(dir.path().to_string_lossy().as_ref())
    );
    assert_eq!(cfg.source.as_deref(), Some(path.as_path()));
    assert!(cfg.global.get_str("cycledag_version").is_some());
    assert_eq!(cfg.throttle.max_jobs(), 1000);

    let variant = &cfg.datasets[0].variants[0];
    assert_eq!(variant.tree.get_str("dataset_name"), Some("nugen_21217"));
    assert_eq!(variant.resources.cpus, Some(1));
    assert_eq!(variant.resources.memory.as_deref(), Some("2gb"));
    Ok(())
}

#[test]
fn empty_cycler_list() {
    expect_config_error(
        &config_with(
            r#"
  nugen:
    data_type: nugen
    runs_range: [0, 10]
    cycler:
      energy_cut: []
"#,
        ),
        "energy_cut",
    );
}

#[test]
fn type_mismatched_override() {
    expect_config_error(
        &config_with(
            r#"
  nugen:
    data_type: nugen
    runs_range: [0, 10]
    resources: 4
"#,
        ),
        "resources",
    );
}

#[test]
fn unknown_data_type() {
    expect_config_error(
        &config_with(
            r#"
  sim:
    data_type: genie
    runs_range: [0, 10]
"#,
        ),
        "genie",
    );
}

#[test]
fn folder_size_must_be_a_power_of_ten() {
    expect_config_error(
        &config_with(
            r#"
  nugen:
    data_type: nugen
    runs_range: [0, 10]
    n_jobs_per_folder: 500
"#,
        ),
        "n_jobs_per_folder",
    );
}

#[test]
fn missing_run_source() {
    expect_config_error(
        &config_with(
            r#"
  nugen:
    data_type: nugen
"#,
        ),
        "no run source",
    );
}

#[test]
fn reversed_run_range() {
    expect_config_error(
        &config_with(
            r#"
  nugen:
    data_type: nugen
    runs_range: [10, 0]
"#,
        ),
        "runs_range",
    );
}

#[test]
fn no_datasets() {
    expect_config_error(GLOBAL, "datasets");
}

#[test]
fn negative_throttle() {
    let yaml = format!(
        "dagman_max_jobs: -1\n{}",
        config_with(
            r#"
  nugen:
    data_type: nugen
    runs_range: [0, 10]
"#
        )
    );
    expect_config_error(&yaml, "dagman_max_jobs");
}

#[test]
fn more_than_one_gpu_per_step() {
    expect_config_error(
        &config_with(
            r#"
  nugen:
    data_type: nugen
    runs_range: [0, 10]
    processing_steps:
      - tray_segments: []
        resources:
          gpus: 2
"#,
        ),
        "GPU",
    );
}

#[test]
fn command_line_defaults_fill_but_never_override() -> TestResult {
    let dir = TempDir::new()?;
    let without_folder = config_with(
        r#"
  nugen:
    data_type: nugen
    runs_range: [0, 10]
"#,
    )
    .replace("data_folder: /data/user\n", "");
    let path = write_config(&dir, "batch.yaml", &without_folder);

    let mut defaults = Mapping::new();
    defaults.insert("data_folder".into(), Value::from("/from/cli"));
    let cfg = load_with_defaults(&path, &defaults)?;
    assert_eq!(cfg.batch.data_folder.as_deref(), Some("/from/cli"));

    // Without the default the same file is rejected.
    assert!(matches!(
        load_and_validate(&path),
        Err(CycledagError::ConfigError(_))
    ));

    let with_folder = write_config(
        &dir,
        "other.yaml",
        &config_with(
            r#"
  nugen:
    data_type: nugen
    runs_range: [0, 10]
"#,
        ),
    );
    let cfg = load_with_defaults(&with_folder, &defaults)?;
    assert_eq!(cfg.batch.data_folder.as_deref(), Some("/data/user"));
    Ok(())
}

#[test]
fn malformed_yaml_is_a_yaml_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "broken.yaml", "datasets: [unclosed\n");
    assert!(matches!(
        load_and_validate(&path),
        Err(CycledagError::YamlError(_))
    ));
}
