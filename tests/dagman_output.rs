// tests/dagman_output.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, DatasetBuilder};
use crate::common::{init_tracing, mock_fs};

use std::error::Error;
use std::path::{Path, PathBuf};

use cycledag::config::model::Throttle;
use cycledag::dag::graph::{log_bucket, process_name};
use cycledag::dag::writer::{read_fingerprint, render_config};
use cycledag::dag::{AssembleOptions, allocate_dagman_folder, assemble};
use cycledag::fs::FileSystem;
use cycledag::generate;
use cycledag::plan::{PlanOptions, SegmentRegistry, plan_batch};
use cycledag::types::SubmitMode;

type TestResult = Result<(), Box<dyn Error>>;

const SCRATCH: &str = "/scratch/user/processing";

#[test]
fn dagman_submit_writes_full_folder() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .global("processing_scratch", SCRATCH)
        .global_yaml("resources", "{cpus: 1, memory: 2gb}")
        .with_dataset("nugen_21217", DatasetBuilder::new("nugen").runs_range(0, 3))
        .with_dataset(
            "corsika_20904",
            DatasetBuilder::new("corsika")
                .runs_range(0, 2)
                .set_yaml("resources", "{memory: 8gb}"),
        )
        .try_build()?;

    let fs = mock_fs();
    let generated = generate(
        &cfg,
        &fs,
        &SegmentRegistry::new(),
        PlanOptions::default(),
        SubmitMode::Dagman,
    )?;
    let files = generated.dagman.expect("dagman files written");

    assert_eq!(files.folder, Path::new(SCRATCH).join("config_0000"));

    let config = fs.contents(&files.config).expect("dagman.config");
    assert_eq!(config, "DAGMAN_MAX_JOBS_SUBMITTED=1000\n");

    // Two distinct resource requests, two submit files.
    assert_eq!(files.submits.len(), 2);
    assert_eq!(files.submits[0], files.folder.join("OneJob.submit"));
    assert_eq!(files.submits[1], files.folder.join("OneJob_0001.submit"));
    let first = fs.contents(&files.submits[0]).expect("first submit file");
    assert!(first.contains("request_memory = 2gb"));
    assert!(first.contains("request_cpus = 1"));
    assert!(first.contains("executable = $(script_file)"));
    assert!(first.trim_end().ends_with("queue"));
    let second = fs.contents(&files.submits[1]).expect("second submit file");
    assert!(second.contains("request_memory = 8gb"));
    assert!(second.contains("request_cpus = 1"));

    let options = fs.contents(&files.options).expect("dagman.options");
    let name = process_name(&cfg.batch.script_name, &cfg.batch.config_base_name);
    assert_eq!(name, "general_i3_processing_config");
    for job in &generated.plan.jobs {
        let node = format!("{name}_{}", job.ordinal);
        let submit = if job.dataset == "nugen_21217" {
            &files.submits[0]
        } else {
            &files.submits[1]
        };
        assert!(options.contains(&format!("JOB {node} {}\n", submit.display())));
        assert!(options.contains(&format!(
            "VARS {node} script_file=\"{}\" run=\"{}\"",
            job.paths.job_script.display(),
            job.ordinal
        )));
    }
    assert!(options.contains("log_dir=\"/scratch/user/processing/config_0000/logs/0000000-0000999\""));
    assert!(!options.contains("PARENT"));
    assert!(fs.is_dir(&files.folder.join("logs").join("0000000-0000999")));

    let start = fs.contents(&files.start_script).expect("start_dagman.sh");
    assert_eq!(
        start,
        format!(
            "condor_submit_dag -config {} {}\n",
            files.config.display(),
            files.options.display()
        )
    );
    assert!(fs.is_executable(&files.start_script));
    Ok(())
}

#[test]
fn final_script_runs_after_every_job() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .global("processing_scratch", SCRATCH)
        .global("dagman_final_script", "/home/user/notify.sh")
        .with_dataset("nugen_21217", DatasetBuilder::new("nugen").runs_range(0, 3))
        .try_build()?;

    let fs = mock_fs();
    let generated = generate(
        &cfg,
        &fs,
        &SegmentRegistry::new(),
        PlanOptions::default(),
        SubmitMode::Dagman,
    )?;
    let files = generated.dagman.expect("dagman files written");

    assert!(files.submits.contains(&files.folder.join("Final.submit")));
    let options = fs.contents(&files.options).expect("dagman.options");
    assert!(options.contains(&format!(
        "JOB final {}\n",
        files.folder.join("Final.submit").display()
    )));
    assert!(options.contains("VARS final script_file=\"/home/user/notify.sh\" run=\"final\""));
    assert!(options.contains(
        "PARENT general_i3_processing_config_0 general_i3_processing_config_1 \
         general_i3_processing_config_2 CHILD final\n"
    ));
    Ok(())
}

#[test]
fn graph_orders_jobs_before_final_node() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_dataset("nugen_21217", DatasetBuilder::new("nugen").runs_range(0, 4))
        .try_build()?;
    let fs = mock_fs();
    let plan = plan_batch(&cfg, &fs, &SegmentRegistry::new(), PlanOptions::default())?;

    let opts = AssembleOptions {
        process_name: "proc_cfg".to_string(),
        log_root: PathBuf::from("/dag/logs"),
        merge_files: false,
        final_script: Some(PathBuf::from("/dag/final.sh")),
    };
    let graph = assemble(&plan.jobs, &Throttle::default(), &opts)?;
    assert_eq!(graph.len(), 4);

    let order = graph.topological_order()?;
    assert_eq!(order.len(), 5);
    assert_eq!(order.last().map(String::as_str), Some("final"));

    let mut parents = graph.parents_of("final");
    parents.sort_unstable();
    assert_eq!(parents, vec!["proc_cfg_0", "proc_cfg_1", "proc_cfg_2", "proc_cfg_3"]);
    assert!(graph.parents_of("proc_cfg_0").is_empty());

    // Same jobs, same fingerprint.
    let again = assemble(&plan.jobs, &Throttle::default(), &opts)?;
    assert_eq!(graph.fingerprint(), again.fingerprint());

    let without_final = assemble(
        &plan.jobs,
        &Throttle::default(),
        &AssembleOptions {
            final_script: None,
            ..opts.clone()
        },
    )?;
    assert_ne!(graph.fingerprint(), without_final.fingerprint());
    Ok(())
}

#[test]
fn fingerprint_header_is_read_back() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .global("processing_scratch", SCRATCH)
        .with_dataset("nugen_21217", DatasetBuilder::new("nugen").runs_list(&[4, 9]))
        .try_build()?;
    let fs = mock_fs();
    let generated = generate(
        &cfg,
        &fs,
        &SegmentRegistry::new(),
        PlanOptions::default(),
        SubmitMode::Dagman,
    )?;
    let files = generated.dagman.expect("dagman files written");

    let options = fs.read_to_string(&files.options)?;
    let fingerprint = read_fingerprint(&options).expect("fingerprint header");
    assert_eq!(fingerprint.len(), 64);
    assert!(options.contains("# jobs 2\n"));
    assert_eq!(read_fingerprint("JOB a b\n"), None);
    Ok(())
}

#[test]
fn merge_files_keeps_logs_in_one_directory() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_dataset("nugen_21217", DatasetBuilder::new("nugen").runs_range(0, 2))
        .try_build()?;
    let fs = mock_fs();
    let plan = plan_batch(&cfg, &fs, &SegmentRegistry::new(), PlanOptions::default())?;

    let opts = AssembleOptions {
        process_name: "proc_cfg".to_string(),
        log_root: PathBuf::from("/dag/logs"),
        merge_files: true,
        final_script: None,
    };
    let graph = assemble(&plan.jobs, &Throttle::default(), &opts)?;
    assert!(graph.nodes.iter().all(|n| n.log_dir == Path::new("/dag/logs")));
    Ok(())
}

#[test]
fn log_buckets_hold_a_thousand_runs() {
    assert_eq!(log_bucket(0), "0000000-0000999");
    assert_eq!(log_bucket(999), "0000000-0000999");
    assert_eq!(log_bucket(1000), "0001000-0001999");
    assert_eq!(log_bucket(12345), "0012000-0012999");
}

#[test]
fn throttle_directives_are_passed_through() {
    let throttle = Throttle {
        dagman_max_jobs: Some(500),
        dagman_submits_interval: Some(100),
        dagman_scan_interval: Some(1),
        dagman_submit_delay: Some(0),
    };
    assert_eq!(
        render_config(&throttle),
        "DAGMAN_MAX_JOBS_SUBMITTED=500\n\
         DAGMAN_SUBMIT_DELAY=0\n\
         DAGMAN_USER_LOG_SCAN_INTERVAL=1\n\
         DAGMAN_MAX_SUBMITS_PER_INTERVAL=100\n"
    );
}

#[test]
fn dagman_folder_counter_skips_existing() {
    let fs = mock_fs();
    let scratch = Path::new(SCRATCH);
    assert_eq!(allocate_dagman_folder(&fs, scratch, "nugen"), scratch.join("nugen_0000"));

    fs.add_dir(scratch.join("nugen_0000"));
    fs.add_dir(scratch.join("nugen_0001"));
    assert_eq!(allocate_dagman_folder(&fs, scratch, "nugen"), scratch.join("nugen_0002"));
}
