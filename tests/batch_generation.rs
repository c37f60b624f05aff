// tests/batch_generation.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, DatasetBuilder};
use crate::common::{init_tracing, mock_fs, truncated_zst_payload, zst_payload};

use std::collections::HashSet;
use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_yaml::Value;

use cycledag::errors::CycledagError;
use cycledag::generate;
use cycledag::plan::{plan_batch, InputChecker, PlanOptions, ReadableInputChecker, SegmentRegistry};
use cycledag::types::SubmitMode;

type TestResult = Result<(), Box<dyn Error>>;

fn energies() -> Vec<Value> {
    vec![Value::from(100), Value::from(1000), Value::from(10000)]
}

#[test]
fn cycled_dataset_yields_one_job_per_run_and_overlay() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .global("out_file_pattern", "{dataset_name}_E{energy_cut}_{run_number:06d}")
        .with_dataset(
            "nugen_21217",
            DatasetBuilder::new("nugen")
                .runs_range(0, 2)
                .cycle("energy_cut", energies()),
        )
        .try_build()?;

    let fs = mock_fs();
    let generated = generate(
        &cfg,
        &fs,
        &SegmentRegistry::new(),
        PlanOptions::default(),
        SubmitMode::None,
    )?;
    let plan = &generated.plan;
    assert!(generated.dagman.is_none());

    assert_eq!(plan.variants.len(), 3);
    assert_eq!(plan.jobs.len(), 6);

    let ids: HashSet<&str> = plan.jobs.iter().map(|j| j.id()).collect();
    assert_eq!(ids.len(), 6);
    let scripts: HashSet<&Path> = plan.job_scripts().into_iter().collect();
    assert_eq!(scripts.len(), 6);
    let ordinals: Vec<usize> = plan.jobs.iter().map(|j| j.ordinal).collect();
    assert_eq!(ordinals, (0..6).collect::<Vec<_>>());

    // Variants are processed in cycler order, runs in range order.
    assert_eq!(plan.jobs[0].id(), "nugen_21217_E100_000000");
    assert_eq!(plan.jobs[1].id(), "nugen_21217_E100_000001");
    assert_eq!(plan.jobs[5].id(), "nugen_21217_E10000_000001");

    // Each variant gets its own steps directory.
    let dirs: HashSet<&PathBuf> = plan.variants.iter().map(|v| &v.sub_process_dir).collect();
    assert_eq!(dirs.len(), 3);

    for job in &plan.jobs {
        let wrapper = fs.contents(&job.paths.job_script).expect("wrapper written");
        assert!(wrapper.starts_with("#!/bin/bash\n"));
        assert!(wrapper.trim_end().ends_with("exit $JOB_RC"));
        assert!(fs.is_executable(&job.paths.job_script));

        let step = fs.contents(job.paths.step_script(0)).expect("step script written");
        assert!(step.contains(&format!("--run {}", job.unit.run_number)));
        assert!(step.contains(&job.steps[0].yaml_path.to_string_lossy().to_string()));
    }

    let yaml = fs
        .contents(&plan.variants[1].steps[0].yaml_path)
        .expect("step config written");
    let parsed: serde_yaml::Mapping = serde_yaml::from_str(&yaml)?;
    assert_eq!(parsed.get("energy_cut"), Some(&Value::from(1000)));
    assert_eq!(parsed.get("dataset_name"), Some(&Value::from("nugen_21217")));
    Ok(())
}

#[test]
fn merged_runs_form_one_unit() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_dataset(
            "nugen",
            DatasetBuilder::new("nugen")
                .runs_range(0, 10)
                .set("n_runs_per_merge", 5),
        )
        .try_build()?;

    let fs = mock_fs();
    let plan = plan_batch(&cfg, &fs, &SegmentRegistry::new(), PlanOptions::default())?;
    assert_eq!(plan.jobs.len(), 2);

    let first = &plan.jobs[0].unit;
    assert_eq!(first.run_number, 0);
    assert_eq!(first.runs, vec![0, 1, 2, 3, 4]);
    assert_eq!(plan.jobs[1].unit.run_number, 5);
    assert_eq!(plan.jobs[1].unit.runs, vec![5, 6, 7, 8, 9]);
    assert_eq!(
        plan.jobs[1].namespace.get("merged_runs"),
        Some(&Value::Sequence((5u64..10).map(Value::from).collect()))
    );
    assert_eq!(
        plan.jobs[1].namespace.get("folder_num_n_merged"),
        Some(&Value::from(0u64))
    );
    Ok(())
}

#[test]
fn merged_units_use_their_first_run_for_folders() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .global("n_jobs_per_folder", 10)
        .global("folder_pattern", "{folder_num_n_merged:04d}")
        .with_dataset(
            "nugen",
            DatasetBuilder::new("nugen")
                .runs_range(0, 40)
                .set("n_runs_per_merge", 10),
        )
        .try_build()?;

    let fs = mock_fs();
    let plan = plan_batch(&cfg, &fs, &SegmentRegistry::new(), PlanOptions::default())?;
    let reps: Vec<u64> = plan.jobs.iter().map(|j| j.unit.run_number).collect();
    assert_eq!(reps, vec![0, 10, 20, 30]);

    // Run 20 is the first input of the third unit and lives in folder 2.
    let third = &plan.jobs[2];
    assert_eq!(third.namespace.get("folder_num"), Some(&Value::from(2u64)));
    assert_eq!(third.namespace.get("folder_num_n_merged"), Some(&Value::from(2u64)));
    assert_eq!(
        third.namespace.get("folder_num_pre_offset_n_merged"),
        Some(&Value::from(2u64))
    );
    assert!(third.paths.jobs_output.ends_with("0002"));
    Ok(())
}

#[test]
fn loosely_spelled_flags_render_as_booleans() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .global("job_template", "/templates/flags.sh")
        .with_dataset("upper", DatasetBuilder::new("nugen").runs_list(&[1]).set("keep_crashed_files", "True"))
        .with_dataset("one", DatasetBuilder::new("nugen").runs_list(&[1]).set("keep_crashed_files", 1))
        .with_dataset("zero", DatasetBuilder::new("nugen").runs_list(&[1]).set("keep_crashed_files", 0))
        .try_build()?;

    let fs = mock_fs();
    fs.add_file(
        "/templates/flags.sh",
        "#!/bin/bash\nif [ \"{keep_crashed_files}\" != \"true\" ]; then rm -f core; fi\n",
    );
    let generated = generate(&cfg, &fs, &SegmentRegistry::new(), PlanOptions::default(), SubmitMode::None)?;

    let rendered: Vec<(String, String)> = generated
        .plan
        .jobs
        .iter()
        .map(|job| {
            let step = fs.contents(job.paths.step_script(0)).unwrap_or_default();
            (job.dataset.clone(), step)
        })
        .collect();
    assert_eq!(rendered.len(), 3);
    for (dataset, step) in &rendered {
        let expected = if dataset == "zero" { "\"false\"" } else { "\"true\"" };
        assert!(step.contains(&format!("if [ {expected} != \"true\" ]")), "{dataset}: {step}");
    }
    Ok(())
}

#[test]
fn corruption_flag_accepts_string_spelling() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .global("in_file_pattern", "/data/in/run_{run_number:06d}.i3.zst")
        .with_dataset(
            "nugen",
            DatasetBuilder::new("nugen")
                .runs_list(&[1, 2])
                .set("exclude_corrupted_input_files", "True"),
        )
        .try_build()?;

    let fs = mock_fs();
    fs.add_file("/data/in/run_000001.i3.zst", zst_payload());
    fs.add_file("/data/in/run_000002.i3.zst", b"garbage".to_vec());

    let plan = plan_batch(&cfg, &fs, &SegmentRegistry::new(), PlanOptions::default())?;
    let runs: Vec<u64> = plan.jobs.iter().map(|j| j.unit.run_number).collect();
    assert_eq!(runs, vec![1]);
    assert_eq!(plan.report.excluded_units, vec![2]);
    Ok(())
}

#[test]
fn corrupted_inputs_exclude_their_run() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .global("in_file_pattern", "/data/in/run_{run_number:06d}.i3.zst")
        .global("exclude_corrupted_input_files", true)
        .with_dataset("nugen", DatasetBuilder::new("nugen").runs_list(&[1, 2, 3, 4, 5]))
        .try_build()?;

    let fs = mock_fs();
    for run in [1, 2, 4, 5] {
        fs.add_file(format!("/data/in/run_{run:06}.i3.zst"), zst_payload());
    }
    fs.add_file("/data/in/run_000003.i3.zst", Vec::<u8>::new());

    let plan = plan_batch(&cfg, &fs, &SegmentRegistry::new(), PlanOptions::default())?;
    let runs: Vec<u64> = plan.jobs.iter().map(|j| j.unit.run_number).collect();
    assert_eq!(runs, vec![1, 2, 4, 5]);

    assert_eq!(plan.report.corrupted.len(), 1);
    let record = &plan.report.corrupted[0];
    assert_eq!(record.run_number, 3);
    assert_eq!(record.path, PathBuf::from("/data/in/run_000003.i3.zst"));
    assert_eq!(record.reason, "file is empty");
    assert_eq!(plan.report.excluded_units, vec![3]);
    Ok(())
}

#[test]
fn inputs_are_decompressed_to_the_end() -> TestResult {
    let fs = mock_fs();
    fs.add_file("/in/good.i3.zst", zst_payload());
    fs.add_file("/in/truncated.i3.zst", truncated_zst_payload());
    fs.add_file("/in/junk.i3.zst", vec![0x28, 0xB5, 0x2F, 0xFD, 0xFF, 0xFF, 0xFF]);

    let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    gz.write_all(&b"I3 frames ".repeat(200))?;
    let gz = gz.finish()?;
    fs.add_file("/in/good.i3.gz", gz);
    fs.add_file("/in/plain.i3", b"uncompressed".to_vec());

    let checker = ReadableInputChecker;
    for good in ["/in/good.i3.zst", "/in/good.i3.gz", "/in/plain.i3"] {
        assert_eq!(checker.check(&fs, Path::new(good)), Ok(()), "{good}");
    }
    for bad in ["/in/truncated.i3.zst", "/in/junk.i3.zst"] {
        let reason = checker.check(&fs, Path::new(bad)).unwrap_err();
        assert!(reason.starts_with("cannot decompress"), "{bad}: {reason}");
    }
    Ok(())
}

#[test]
fn truncated_input_excludes_its_run() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .global("in_file_pattern", "/data/in/run_{run_number:06d}.i3.zst")
        .global("exclude_corrupted_input_files", true)
        .with_dataset("nugen", DatasetBuilder::new("nugen").runs_list(&[1, 2, 3, 4, 5]))
        .try_build()?;

    let fs = mock_fs();
    for run in [1, 2, 3, 5] {
        fs.add_file(format!("/data/in/run_{run:06}.i3.zst"), zst_payload());
    }
    fs.add_file("/data/in/run_000004.i3.zst", vec![0x28, 0xB5, 0x2F, 0xFD, 0xFF, 0xFF, 0xFF]);

    let plan = plan_batch(&cfg, &fs, &SegmentRegistry::new(), PlanOptions::default())?;
    assert_eq!(plan.jobs.len(), 4);
    assert_eq!(plan.report.excluded_units, vec![4]);
    Ok(())
}

#[test]
fn partially_corrupted_unit_keeps_usable_inputs() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .global("in_file_pattern", "/data/in/run_{run_number:06d}_*.i3.zst")
        .global("exclude_corrupted_input_files", true)
        .with_dataset("nugen", DatasetBuilder::new("nugen").runs_list(&[7]))
        .try_build()?;

    let fs = mock_fs();
    fs.add_file("/data/in/run_000007_0.i3.zst", zst_payload());
    fs.add_file("/data/in/run_000007_1.i3.zst", b"not zstd at all".to_vec());
    fs.add_file("/data/in/run_000007_2.i3.zst", zst_payload());

    let plan = plan_batch(&cfg, &fs, &SegmentRegistry::new(), PlanOptions::default())?;
    assert_eq!(plan.jobs.len(), 1);
    let job = &plan.jobs[0];
    assert_eq!(
        job.unit.inputs,
        vec![
            PathBuf::from("/data/in/run_000007_0.i3.zst"),
            PathBuf::from("/data/in/run_000007_2.i3.zst"),
        ]
    );
    assert_eq!(
        job.namespace.get("in_file_pattern"),
        Some(&Value::Sequence(vec![
            Value::from("/data/in/run_000007_0.i3.zst"),
            Value::from("/data/in/run_000007_2.i3.zst"),
        ]))
    );
    assert_eq!(plan.report.corrupted.len(), 1);
    assert!(plan.report.corrupted[0].reason.starts_with("bad header"));
    assert!(plan.report.excluded_units.is_empty());
    Ok(())
}

#[test]
fn resume_skips_finished_jobs_and_keeps_ordinals() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_dataset("nugen", DatasetBuilder::new("nugen").runs_range(0, 3))
        .try_build()?;

    let fs = mock_fs();
    fs.add_file("/data/user/nugen/nugen/0000/nugen_000000.hdf5", b"done".to_vec());

    let opts = PlanOptions {
        resume: true,
        check_input: false,
    };
    let plan = plan_batch(&cfg, &fs, &SegmentRegistry::new(), opts)?;
    let runs: Vec<u64> = plan.jobs.iter().map(|j| j.unit.run_number).collect();
    assert_eq!(runs, vec![1, 2]);
    let ordinals: Vec<usize> = plan.jobs.iter().map(|j| j.ordinal).collect();
    assert_eq!(ordinals, vec![1, 2]);
    assert_eq!(plan.report.skipped_existing_output, 1);
    Ok(())
}

#[test]
fn check_input_skips_jobs_without_files() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .global("in_file_pattern", "/data/in/run_{run_number:06d}.i3.zst")
        .with_dataset("nugen", DatasetBuilder::new("nugen").runs_list(&[1, 2]))
        .try_build()?;

    let fs = mock_fs();
    fs.add_file("/data/in/run_000002.i3.zst", zst_payload());

    let opts = PlanOptions {
        resume: false,
        check_input: true,
    };
    let plan = plan_batch(&cfg, &fs, &SegmentRegistry::new(), opts)?;
    let runs: Vec<u64> = plan.jobs.iter().map(|j| j.unit.run_number).collect();
    assert_eq!(runs, vec![2]);
    assert_eq!(plan.report.skipped_missing_input, 1);
    Ok(())
}

#[test]
fn config_check_existing_input_overrides_cli() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .global("in_file_pattern", "/data/in/run_{run_number:06d}.i3.zst")
        .global("check_existing_input", false)
        .with_dataset("nugen", DatasetBuilder::new("nugen").runs_list(&[1, 2]))
        .try_build()?;

    let fs = mock_fs();
    let opts = PlanOptions {
        resume: false,
        check_input: true,
    };
    let plan = plan_batch(&cfg, &fs, &SegmentRegistry::new(), opts)?;
    assert_eq!(plan.jobs.len(), 2);
    Ok(())
}

#[test]
fn intermediate_steps_write_to_temp_folder() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .global_yaml(
            "processing_steps",
            r#"
- tray_segments: []
- tray_segments: []
  write_hdf5: true
"#,
        )
        .global("python_user_base_cpu", "/cvmfs/cpu")
        .with_dataset("nugen", DatasetBuilder::new("nugen").runs_list(&[3]))
        .try_build()?;

    let fs = mock_fs();
    let generated = generate(
        &cfg,
        &fs,
        &SegmentRegistry::new(),
        PlanOptions::default(),
        SubmitMode::None,
    )?;
    let job = &generated.plan.jobs[0];
    assert_eq!(job.steps.len(), 2);

    let first = &job.steps[0].namespace;
    assert_eq!(first.get("data_folder"), Some(&Value::from("./temp_step_files")));
    assert_eq!(first.get("write_i3"), Some(&Value::Bool(true)));
    assert_eq!(first.get("write_hdf5"), Some(&Value::Bool(false)));
    assert_eq!(first.get("python_user_base"), Some(&Value::from("/cvmfs/cpu")));
    assert_eq!(
        first.get("final_out"),
        Some(&Value::from("./temp_step_files/nugen/nugen/0000/nugen_000003_step0000"))
    );

    let second = &job.steps[1].namespace;
    assert_eq!(
        second.get("in_file_pattern"),
        Some(&Value::from(
            "./temp_step_files/nugen/nugen/0000/nugen_000003_step0000.i3.zst"
        ))
    );
    assert_eq!(
        second.get("final_out"),
        Some(&Value::from("/data/user/nugen/nugen/0000/nugen_000003"))
    );

    let wrapper = fs.contents(&job.paths.job_script).expect("wrapper written");
    assert!(wrapper.contains("job_nugen_000003_step_0000.sh"));
    assert!(wrapper.contains("job_nugen_000003_step_0001.sh"));
    assert!(wrapper.contains(
        "rm -f './temp_step_files/nugen/nugen/0000/nugen_000003_step0000'*"
    ));
    Ok(())
}

#[test]
fn existing_step_directories_are_not_reused() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_dataset("nugen", DatasetBuilder::new("nugen").runs_list(&[1]))
        .try_build()?;

    let fs = mock_fs();
    fs.add_dir("/data/user/processing/nugen/nugen/processing_steps_0000");

    let plan = plan_batch(&cfg, &fs, &SegmentRegistry::new(), PlanOptions::default())?;
    assert_eq!(
        plan.variants[0].sub_process_dir,
        PathBuf::from("/data/user/processing/nugen/nugen/processing_steps_0001")
    );
    Ok(())
}

#[test]
fn processing_script_is_copied_with_shebang() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .global("config_dir", "/cfg")
        .with_dataset("nugen", DatasetBuilder::new("nugen").runs_list(&[1]))
        .try_build()?;

    let fs = mock_fs();
    fs.add_file("/cfg/scripts/general_i3_processing.py", "print('hello')\n");

    generate(
        &cfg,
        &fs,
        &SegmentRegistry::new(),
        PlanOptions::default(),
        SubmitMode::None,
    )?;

    let python = PathBuf::from(
        "/data/user/processing/nugen/nugen/processing_steps_0000/general_i3_processing_step_0000.py",
    );
    let source = fs.contents(&python).expect("script copied");
    assert_eq!(source, "#!/usr/bin/env python3\nprint('hello')\n");
    assert!(fs.is_executable(&python));
    Ok(())
}

#[test]
fn unknown_template_placeholder_writes_nothing() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .global("job_template", "/templates/broken.sh")
        .with_dataset("nugen", DatasetBuilder::new("nugen").runs_list(&[1]))
        .try_build()?;

    let fs = mock_fs();
    fs.add_file("/templates/broken.sh", "#!/bin/bash\necho {does_not_exist}\n");
    let before = fs.file_paths();

    let err = generate(
        &cfg,
        &fs,
        &SegmentRegistry::new(),
        PlanOptions::default(),
        SubmitMode::None,
    )
    .unwrap_err();
    match err {
        CycledagError::TemplateError(msg) => assert!(msg.contains("does_not_exist"), "{msg}"),
        other => panic!("Expected TemplateError, got: {other:?}"),
    }
    assert_eq!(fs.file_paths(), before);
    Ok(())
}
