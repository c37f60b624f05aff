// tests/pattern_format.rs

use std::error::Error;

use serde_yaml::{Mapping, Value};

use cycledag::errors::CycledagError;
use cycledag::render::format::{escape_path, format_str, unescape_path, FormatError};
use cycledag::render::JobTemplate;

type TestResult = Result<(), Box<dyn Error>>;

fn ns(pairs: &[(&str, Value)]) -> Mapping {
    let mut map = Mapping::new();
    for (k, v) in pairs {
        map.insert(Value::from(*k), v.clone());
    }
    map
}

#[test]
fn format_specs_follow_brace_format() -> TestResult {
    let ns = ns(&[
        ("run", Value::from(42)),
        ("energy", Value::from(3.14159)),
        ("name", Value::from("nugen")),
    ]);

    assert_eq!(format_str("{run:08d}", &ns)?, "00000042");
    assert_eq!(format_str("{run:>5}", &ns)?, "   42");
    assert_eq!(format_str("{energy:.2f}", &ns)?, "3.14");
    assert_eq!(format_str("{name:_<8s}|", &ns)?, "nugen___|");
    assert_eq!(format_str("{name:^9}", &ns)?, "  nugen  ");
    assert_eq!(format_str("{{literal}} {name}", &ns)?, "{literal} nugen");
    Ok(())
}

#[test]
fn float_precision_without_type_counts_significant_digits() -> TestResult {
    let cases = [
        (3.14159, "{v:.3}", "3.14"),
        (12.0, "{v:.3}", "12.0"),
        (9.999, "{v:.3}", "10.0"),
        (100.0, "{v:.3}", "1e+02"),
        (1234.5, "{v:.3}", "1.23e+03"),
        (0.0001234, "{v:.2}", "0.00012"),
        (0.00001234, "{v:.2}", "1.2e-05"),
        (-0.5, "{v:.3}", "-0.5"),
        (2.5, "{v:>8.2}", "     2.5"),
    ];
    for (value, pattern, expected) in cases {
        let ns = ns(&[("v", Value::from(value))]);
        assert_eq!(format_str(pattern, &ns)?, expected, "{value} with {pattern}");
    }
    Ok(())
}

#[test]
fn shell_expansions_are_left_alone() -> TestResult {
    let ns = ns(&[("dir", Value::from("/scratch"))]);
    assert_eq!(
        format_str("cd ${TMPDIR:-/tmp} && ls {dir} ${HOME}", &ns)?,
        "cd ${TMPDIR:-/tmp} && ls /scratch ${HOME}"
    );
    Ok(())
}

#[test]
fn unknown_names_and_bad_specs_are_errors() {
    let ns = ns(&[("name", Value::from("nugen"))]);
    assert_eq!(
        format_str("{missing}", &ns),
        Err(FormatError::Missing("missing".to_string()))
    );
    assert!(matches!(
        format_str("{name:d}", &ns),
        Err(FormatError::BadSpec { .. })
    ));
}

#[test]
fn escape_roundtrip() {
    let raw = r"cut=high dir\x";
    let escaped = escape_path(raw);
    assert_eq!(escaped, r"cut\=high\ dir\\x");
    assert_eq!(unescape_path(&escaped), raw);
}

#[test]
fn template_render_and_parse_back() -> TestResult {
    let template = JobTemplate::new(
        "#!/bin/bash\n\
         eval $(/cvmfs/setup.sh)\n\
         python {python_path} {yaml_path} --run {run_number:06d} --keep {keep_crashed_files}\n\
         JOB_RC=$?\n\
         exit $JOB_RC\n",
    );
    let names: Vec<String> = template.placeholders().into_iter().collect();
    assert_eq!(
        names,
        vec!["keep_crashed_files", "python_path", "run_number", "yaml_path"]
    );

    let ns = ns(&[
        ("python_path", Value::from("/p/steps/script_step_0000.py")),
        ("yaml_path", Value::from("/p/steps/config_step_0000.yaml")),
        ("run_number", Value::from(17)),
        ("keep_crashed_files", Value::Bool(false)),
    ]);
    let rendered = template.render(&ns)?;
    assert!(rendered.contains("--run 000017 --keep false"));
    assert!(rendered.ends_with("exit $JOB_RC\n"));

    let back = template.parse_rendered(&rendered)?;
    assert_eq!(back["python_path"], "/p/steps/script_step_0000.py");
    assert_eq!(back["yaml_path"], "/p/steps/config_step_0000.yaml");
    assert_eq!(back["run_number"], "000017");
    assert_eq!(back["keep_crashed_files"], "false");
    Ok(())
}

#[test]
fn missing_template_value_is_a_template_error() {
    let template = JobTemplate::new("echo {not_configured}\n");
    let err = template.render(&Mapping::new()).unwrap_err();
    match err {
        CycledagError::TemplateError(msg) => assert!(msg.contains("not_configured"), "{msg}"),
        other => panic!("Expected TemplateError, got: {other:?}"),
    }
}
