// tests/cycler_expansion.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, DatasetBuilder};

use std::collections::HashSet;
use std::error::Error;

use proptest::prelude::*;
use serde_yaml::Value;

use cycledag::errors::CycledagError;
use cycledag::plan::cycler::{expand, CyclerSpec};

type TestResult = Result<(), Box<dyn Error>>;

fn spec(params: &[(&str, &[i64])]) -> CyclerSpec {
    CyclerSpec::new(
        params
            .iter()
            .map(|(name, values)| {
                (
                    name.to_string(),
                    values.iter().map(|v| Value::from(*v)).collect(),
                )
            })
            .collect(),
    )
}

#[test]
fn last_parameter_varies_fastest() -> TestResult {
    let overlays = expand(&spec(&[("a", &[1, 2]), ("b", &[10, 20, 30])]))?;

    let labels: Vec<String> = overlays.iter().map(|o| o.label()).collect();
    assert_eq!(
        labels,
        vec![
            "a=1,b=10", "a=1,b=20", "a=1,b=30", "a=2,b=10", "a=2,b=20", "a=2,b=30",
        ]
    );
    let indices: Vec<usize> = overlays.iter().map(|o| o.index).collect();
    assert_eq!(indices, (0..6).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn no_parameters_give_one_empty_overlay() -> TestResult {
    let overlays = expand(&CyclerSpec::default())?;
    assert_eq!(overlays.len(), 1);
    assert!(overlays[0].is_empty());
    assert_eq!(overlays[0].label(), "");
    Ok(())
}

#[test]
fn empty_value_list_is_a_config_error() {
    let err = expand(&spec(&[("a", &[1]), ("b", &[])])).unwrap_err();
    match err {
        CycledagError::ConfigError(msg) => assert!(msg.contains("'b'"), "{msg}"),
        other => panic!("Expected ConfigError, got: {other:?}"),
    }
}

#[test]
fn cycler_must_be_a_mapping_of_lists() {
    let err = CyclerSpec::from_value(Some(&Value::from("energy"))).unwrap_err();
    assert!(matches!(err, CycledagError::ConfigError(_)));

    let mut map = serde_yaml::Mapping::new();
    map.insert("energy".into(), Value::from(5));
    let err = CyclerSpec::from_value(Some(&Value::Mapping(map))).unwrap_err();
    match err {
        CycledagError::ConfigError(msg) => assert!(msg.contains("must be a list")),
        other => panic!("Expected ConfigError, got: {other:?}"),
    }
}

#[test]
fn each_variant_sees_its_own_values() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_dataset(
            "nugen_21217",
            DatasetBuilder::new("nugen")
                .runs_range(0, 2)
                .cycle("energy_cut", vec![Value::from(100), Value::from(1000)]),
        )
        .try_build()?;

    let dataset = &cfg.datasets[0];
    assert_eq!(dataset.variants.len(), 2);
    assert_eq!(
        dataset.variants[0].tree.get("energy_cut"),
        Some(&Value::from(100))
    );
    assert_eq!(
        dataset.variants[1].tree.get("energy_cut"),
        Some(&Value::from(1000))
    );
    // The dataset tree itself stays untouched.
    assert!(dataset.tree.get("energy_cut").is_none());
    Ok(())
}

proptest! {
    #[test]
    fn overlay_count_is_product_of_list_lengths(
        lengths in proptest::collection::vec(1usize..5, 0..4)
    ) {
        let params: Vec<(String, Vec<Value>)> = lengths
            .iter()
            .enumerate()
            .map(|(i, &len)| {
                (format!("p{i}"), (0..len).map(|v| Value::from(v as u64)).collect())
            })
            .collect();
        let spec = CyclerSpec::new(params);

        let overlays = expand(&spec).unwrap();
        let expected: usize = lengths.iter().product();
        prop_assert_eq!(overlays.len(), expected);
        prop_assert_eq!(spec.combination_count(), expected);

        // Every combination occurs exactly once.
        let distinct: HashSet<String> = overlays.iter().map(|o| o.label()).collect();
        prop_assert_eq!(distinct.len(), expected);
    }
}
