// tests/run_filters.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, DatasetBuilder};
use crate::common::{init_tracing, mock_fs};

use std::error::Error;

use serde_yaml::Value;

use cycledag::errors::CycledagError;
use cycledag::plan::filter::{all_match, FilterPredicate, RunRow};
use cycledag::plan::{enumerate, EnumerateOptions};
use cycledag::types::FilterOp;

type TestResult = Result<(), Box<dyn Error>>;

const GRL: &str = "\
RunNum Good_i3 Good_i LiveTime ActiveStrings ActiveDOMs ActiveInIce OutDir Comments
       (1=good 0=bad)
120156 1 1 28803.42 86 5160 5160 /data/Run00120156 IC86_2012
120157 0 1 100.0 86 5160 5160 /data/Run00120157
";

fn row(pairs: &[(&str, Value)]) -> RunRow {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn predicates_combine_with_and() {
    let predicates = vec![
        FilterPredicate::new("Good_i3", FilterOp::Eq, Value::from(1)),
        FilterPredicate::new("LiveTime", FilterOp::Ge, Value::from(3600)),
        FilterPredicate::new(
            "ActiveStrings",
            FilterOp::In,
            Value::Sequence(vec![Value::from(78), Value::from(86)]),
        ),
    ];

    let good = row(&[
        ("Good_i3", Value::from(1)),
        ("LiveTime", Value::from(28803.42)),
        ("ActiveStrings", Value::from(86)),
    ]);
    assert!(all_match(&predicates, &good));

    let short = row(&[
        ("Good_i3", Value::from(1)),
        ("LiveTime", Value::from(100.0)),
        ("ActiveStrings", Value::from(86)),
    ]);
    assert!(!all_match(&predicates, &short));

    let partial = row(&[("Good_i3", Value::from(1)), ("LiveTime", Value::from(28803.42))]);
    assert!(
        !all_match(&predicates, &partial),
        "a missing column must not satisfy a predicate"
    );

    assert!(all_match(&[], &partial));
}

#[test]
fn run_number_filters_and_ignore_list() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_dataset(
            "nugen",
            DatasetBuilder::new("nugen")
                .runs_list(&[1, 2, 3, 4, 5, 6, 7, 8])
                .set_yaml("run_filter", r#"[["RunNum", ">=", 3], ["run_number", "in", [3, 4, 7]]]"#)
                .set_yaml("runs_to_ignore", "[4]"),
        )
        .try_build()?;

    let fs = mock_fs();
    let enumeration = enumerate(&cfg.datasets[0].variants[0], &fs, EnumerateOptions::default())?;
    let runs: Vec<u64> = enumeration.units.iter().map(|u| u.run_number).collect();
    assert_eq!(runs, vec![3, 7]);
    Ok(())
}

#[test]
fn good_run_list_columns_are_filterable() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_dataset(
            "exp_2012",
            DatasetBuilder::new("exp")
                .runs_list(&[120156, 120157, 120158])
                .set("exp_dataset_grl_paths", "/grl/*_GoodRunInfo.txt")
                .set_yaml("exp_dataset_filter", r#"[["Good_i3", "==", 1]]"#),
        )
        .try_build()?;

    let fs = mock_fs();
    fs.add_file("/grl/IC86_2012_GoodRunInfo.txt", GRL);

    let enumeration = enumerate(&cfg.datasets[0].variants[0], &fs, EnumerateOptions::default())?;
    let runs: Vec<u64> = enumeration.units.iter().map(|u| u.run_number).collect();
    assert_eq!(runs, vec![120156]);

    // 120158 is not in the list: reported, not fatal.
    assert_eq!(enumeration.report.warnings.len(), 1);
    assert_eq!(enumeration.report.warnings[0].run_number, 120158);
    assert_eq!(enumeration.report.warnings[0].dataset, "exp_2012");
    Ok(())
}

#[test]
fn runs_missing_from_good_run_list_are_kept_without_filters() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_dataset(
            "exp_2012",
            DatasetBuilder::new("exp")
                .runs_list(&[120156, 120158])
                .set("exp_dataset_grl_paths", "/grl/*_GoodRunInfo.txt")
                .set("exp_data_warn_missing", false),
        )
        .try_build()?;

    let fs = mock_fs();
    fs.add_file("/grl/IC86_2012_GoodRunInfo.txt", GRL);

    let enumeration = enumerate(&cfg.datasets[0].variants[0], &fs, EnumerateOptions::default())?;
    assert_eq!(enumeration.units.len(), 2);
    assert_eq!(enumeration.report.warnings.len(), 1);
    Ok(())
}

#[test]
fn unknown_operator_is_rejected_at_load() {
    let err = ConfigFileBuilder::new()
        .with_dataset(
            "nugen",
            DatasetBuilder::new("nugen")
                .runs_range(0, 10)
                .set_yaml("run_filter", r#"[["RunNum", "=~", 3]]"#),
        )
        .try_build()
        .unwrap_err();

    match err {
        CycledagError::ConfigError(msg) => {
            assert!(msg.contains("=~"), "{msg}");
            assert!(msg.contains("RunNum"), "{msg}");
        }
        other => panic!("Expected ConfigError, got: {other:?}"),
    }
}

#[test]
fn in_operator_needs_a_list() {
    let err = ConfigFileBuilder::new()
        .with_dataset(
            "nugen",
            DatasetBuilder::new("nugen")
                .runs_range(0, 10)
                .set_yaml("run_filter", r#"[["RunNum", "in", 3]]"#),
        )
        .try_build()
        .unwrap_err();
    assert!(matches!(err, CycledagError::ConfigError(_)));
}
