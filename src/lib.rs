// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod plan;
pub mod render;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use serde_yaml::{Mapping, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command, CreateArgs, RunLocalArgs};
use crate::config::load_with_defaults;
use crate::config::model::ConfigFile;
use crate::dag::graph::{log_root, process_name};
use crate::dag::{AssembleOptions, DagmanFiles, allocate_dagman_folder, assemble, write_dagman_files};
use crate::errors::CycledagError;
use crate::exec::{
    JobLogBook, LocalJob, ProcessBackend, RunSummary, RunnerOptions, collect_jobs, local_job,
    run_jobs, select_resumed,
};
use crate::fs::{FileSystem, RealFileSystem};
use crate::plan::{BatchPlan, EnumerationReport, PlanOptions, SegmentRegistry, plan_batch};
use crate::render::{render_batch, write_rendered};
use crate::types::SubmitMode;

/// Directory name for local-runner logs below the processing scratch.
pub const LOCAL_LOG_DIR: &str = "local_logs";

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Create(create) => run_create(create).await,
        Command::RunLocal(local) => run_local(local).await,
    }
}

/// Result of generating one batch.
#[derive(Debug)]
pub struct Generated {
    pub plan: BatchPlan,
    pub dagman: Option<DagmanFiles>,
}

/// Plan, render and write a batch; with `SubmitMode::Dagman` also write
/// the DAGMan folder.
///
/// Every fatal check (config, templates, path collisions) runs before the
/// first file is written.
pub fn generate(
    cfg: &ConfigFile,
    fs: &dyn FileSystem,
    registry: &SegmentRegistry,
    opts: PlanOptions,
    submit: SubmitMode,
) -> errors::Result<Generated> {
    let plan = plan_batch(cfg, fs, registry, opts)?;
    let rendered = render_batch(&plan)?;
    write_rendered(fs, &rendered)?;
    log_report(&plan.report);

    let dagman = match submit {
        SubmitMode::Dagman => Some(write_dagman(cfg, fs, &plan)?),
        SubmitMode::Local | SubmitMode::None => None,
    };
    Ok(Generated { plan, dagman })
}

/// Assemble the submission graph and write it to a fresh DAGMan folder.
pub fn write_dagman(cfg: &ConfigFile, fs: &dyn FileSystem, plan: &BatchPlan) -> errors::Result<DagmanFiles> {
    let scratch = processing_scratch(cfg)?;
    let folder = allocate_dagman_folder(fs, &scratch, &cfg.batch.config_base_name);
    let opts = AssembleOptions {
        process_name: process_name(&cfg.batch.script_name, &cfg.batch.config_base_name),
        log_root: log_root(&folder),
        merge_files: cfg.batch.merge_files,
        final_script: cfg.batch.dagman_final_script.as_ref().map(PathBuf::from),
    };
    let graph = assemble(&plan.jobs, &cfg.throttle, &opts)?;
    write_dagman_files(fs, &graph, &folder)
}

/// `processing_scratch`, falling back to `<data_folder>/processing`.
pub fn processing_scratch(cfg: &ConfigFile) -> errors::Result<PathBuf> {
    if let Some(scratch) = &cfg.batch.processing_scratch {
        return Ok(PathBuf::from(scratch));
    }
    match &cfg.batch.data_folder {
        Some(data_folder) => {
            let fallback = Path::new(data_folder).join("processing");
            info!(path = ?fallback, "`processing_scratch` not set, using data folder");
            Ok(fallback)
        }
        None => Err(CycledagError::config(
            "`processing_scratch` is not set (use the config or --processing-scratch)",
        )),
    }
}

async fn run_create(args: CreateArgs) -> Result<()> {
    let defaults = cli_defaults(&args);
    let cfg = load_with_defaults(&args.config, &defaults)?;
    info!(
        config = ?args.config,
        datasets = cfg.datasets.len(),
        variants = cfg.variant_count(),
        "loaded config"
    );

    let fs = RealFileSystem;
    let registry = SegmentRegistry::new();
    let opts = PlanOptions {
        resume: args.resume,
        check_input: args.check_input,
    };

    if args.dry_run {
        let plan = plan_batch(&cfg, &fs, &registry, opts)?;
        print_dry_run(&plan);
        log_report(&plan.report);
        return Ok(());
    }

    let generated = generate(&cfg, &fs, &registry, opts, args.submit)?;
    println!("Created {} jobs", generated.plan.jobs.len());
    if let Some(dagman) = &generated.dagman {
        println!("Submit the batch with: {}", dagman.start_script.display());
    }

    if args.submit == SubmitMode::Local {
        let scratch = processing_scratch(&cfg)?;
        let log_dir = scratch.join(LOCAL_LOG_DIR);
        let jobs: Vec<LocalJob> = generated
            .plan
            .job_scripts()
            .into_iter()
            .map(|script| local_job(script.to_path_buf(), &scratch, &log_dir))
            .collect();
        let summary = execute_local(&fs, jobs, args.jobs, log_dir).await?;
        return finish_local(&summary);
    }
    Ok(())
}

async fn run_local(args: RunLocalArgs) -> Result<()> {
    let fs = RealFileSystem;
    let log_dir = args
        .log_dir
        .clone()
        .unwrap_or_else(|| args.dir.join(LOCAL_LOG_DIR));

    let mut jobs = collect_jobs(&fs, &args.dir, &args.pattern, &log_dir)?;
    if let Some(resume) = &args.resume {
        let book = JobLogBook::load(&fs, resume)?;
        jobs = select_resumed(jobs, &book, args.retry_failed);
    }
    if jobs.is_empty() {
        warn!(dir = ?args.dir, pattern = %args.pattern, "no job scripts to run");
        return Ok(());
    }

    let summary = execute_local(&fs, jobs, args.jobs, log_dir).await?;
    finish_local(&summary)
}

async fn execute_local(
    fs: &dyn FileSystem,
    jobs: Vec<LocalJob>,
    max_parallel: usize,
    log_dir: PathBuf,
) -> Result<RunSummary> {
    let (cancel_tx, cancel_rx) = watch::channel(false);

    // Ctrl-C → stop launching; running jobs are left to finish.
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            return;
        }
        info!("Ctrl-C received, no further jobs will be started");
        let _ = cancel_tx.send(true);
    });

    let opts = RunnerOptions {
        max_parallel,
        log_dir,
    };
    Ok(run_jobs(Arc::new(ProcessBackend), fs, jobs, &opts, cancel_rx).await?)
}

fn finish_local(summary: &RunSummary) -> Result<()> {
    println!(
        "{} succeeded, {} failed, {} skipped, {} not started",
        summary.succeeded.len(),
        summary.failed.len(),
        summary.skipped.len(),
        summary.not_started.len()
    );
    for (job, code) in &summary.failed {
        println!("  failed: {job} (exit code {code})");
    }
    if !summary.failed.is_empty() {
        bail!("{} job(s) failed", summary.failed.len());
    }
    Ok(())
}

fn cli_defaults(args: &CreateArgs) -> Mapping {
    let mut defaults = Mapping::new();
    if let Some(data_folder) = &args.data_folder {
        defaults.insert("data_folder".into(), Value::from(data_folder.clone()));
    }
    if let Some(scratch) = &args.processing_scratch {
        defaults.insert("processing_scratch".into(), Value::from(scratch.clone()));
    }
    defaults
}

fn log_report(report: &EnumerationReport) {
    for corrupted in &report.corrupted {
        info!(
            dataset = %corrupted.dataset,
            run_number = corrupted.run_number,
            path = ?corrupted.path,
            reason = %corrupted.reason,
            "excluded corrupted input"
        );
    }
    if !report.excluded_units.is_empty() {
        info!(runs = ?report.excluded_units, "run units excluded, all inputs corrupted");
    }
    if !report.warnings.is_empty() {
        info!(count = report.warnings.len(), "runs missing from good run lists");
    }
    debug!(
        skipped_existing_output = report.skipped_existing_output,
        skipped_missing_input = report.skipped_missing_input,
        "skip summary"
    );
}

/// Dry-run output: one line per job plus the per-variant step files.
fn print_dry_run(plan: &BatchPlan) {
    println!("cycledag dry-run");
    println!("variants ({}):", plan.variants.len());
    for variant in &plan.variants {
        if variant.overlay.is_empty() {
            println!("  - {}", variant.dataset);
        } else {
            println!("  - {} [{}]", variant.dataset, variant.overlay.label());
        }
        println!("      steps dir: {}", variant.sub_process_dir.display());
        for step in &variant.steps {
            println!("      step {}: {}", step.index, step.yaml_path.display());
        }
    }
    println!();

    println!("jobs ({}):", plan.jobs.len());
    for job in &plan.jobs {
        println!("  - {} ({})", job.id(), job.label());
        println!("      script: {}", job.paths.job_script.display());
        println!("      output: {}", job.paths.final_out.display());
        if job.unit.runs.len() > 1 {
            println!("      merged runs: {:?}", job.unit.runs);
        }
    }
    println!();
    println!(
        "skipped: {} with existing output, {} without input; {} corrupted inputs",
        plan.report.skipped_existing_output,
        plan.report.skipped_missing_input,
        plan.report.corrupted.len()
    );

    debug!("dry-run complete (nothing written)");
}
