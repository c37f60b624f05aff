// src/exec/pool.rs

//! Bounded-concurrency local runner.
//!
//! Jobs are launched in order, at most `max_parallel` at a time. After
//! every completion the log book is flushed to `<log_dir>/resume.txt` so an
//! interrupted batch can be picked up again with `--resume`.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::errors::{CycledagError, Result};
use crate::fs::{expand_glob, FileSystem};

use super::backend::{ExecutorBackend, LocalJob};
use super::logbook::{JobLogBook, JobStatus, RESUME_FILE};

/// Default pattern for job wrappers below a `jobs/` directory.
pub const DEFAULT_JOB_PATTERN: &str = "*/job_*.sh";

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub max_parallel: usize,
    pub log_dir: PathBuf,
}

/// What happened to the jobs of one local run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, i32)>,
    pub skipped: Vec<String>,
    /// Jobs never launched because the run was cancelled.
    pub not_started: Vec<String>,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && self.not_started.is_empty()
    }
}

/// Build the job list for the scripts matching `pattern` below `dir`.
pub fn collect_jobs(
    fs: &dyn FileSystem,
    dir: &Path,
    pattern: &str,
    log_dir: &Path,
) -> Result<Vec<LocalJob>> {
    let full = dir.join(pattern);
    let scripts = expand_glob(fs, &full.to_string_lossy())?;
    Ok(scripts
        .into_iter()
        .filter(|p| fs.is_file(p))
        .map(|script| local_job(script, dir, log_dir))
        .collect())
}

/// A job named after the script's path below `root`, without the extension
/// (`0003/job_nugen_000007`). The log file mirrors that path below `log_dir`,
/// so scripts sharing a file name in different job folders stay apart.
pub fn local_job(script: PathBuf, root: &Path, log_dir: &Path) -> LocalJob {
    let relative = script.strip_prefix(root).unwrap_or(&script);
    let mut parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if let Some(last) = parts.last_mut() {
        if let Some((stem, _ext)) = last.rsplit_once('.').filter(|(stem, _)| !stem.is_empty()) {
            *last = stem.to_string();
        }
    }
    let name = parts.join("/");
    let log_file = log_dir.join(format!("{name}.log"));
    LocalJob {
        name,
        script,
        log_file,
    }
}

/// Restrict `jobs` to the ones a previous run left to do.
pub fn select_resumed(jobs: Vec<LocalJob>, book: &JobLogBook, retry_failed: bool) -> Vec<LocalJob> {
    let pending = book.pending(retry_failed);
    let selected: Vec<LocalJob> = jobs
        .into_iter()
        .filter(|job| pending.iter().any(|name| name == &job.name))
        .collect();
    info!(
        pending = pending.len(),
        matched = selected.len(),
        retry_failed,
        "resuming local run"
    );
    selected
}

/// Run `jobs` through `backend` with bounded concurrency.
///
/// Once `cancel` flips to `true` no further job is launched; jobs already
/// running are awaited.
pub async fn run_jobs<B>(
    backend: Arc<B>,
    fs: &dyn FileSystem,
    jobs: Vec<LocalJob>,
    opts: &RunnerOptions,
    mut cancel: watch::Receiver<bool>,
) -> Result<RunSummary>
where
    B: ExecutorBackend + 'static,
{
    let max_parallel = opts.max_parallel.max(1);
    fs.create_dir_all(&opts.log_dir)?;
    let resume_path = opts.log_dir.join(RESUME_FILE);

    let mut book = JobLogBook::with_jobs(jobs.iter().map(|j| j.name.clone()));
    book.save(fs, &resume_path)?;

    info!(
        jobs = jobs.len(),
        max_parallel,
        log_dir = ?opts.log_dir,
        "starting local run"
    );

    let semaphore = Arc::new(Semaphore::new(max_parallel));
    let mut running: JoinSet<(String, Result<i32>)> = JoinSet::new();
    let mut summary = RunSummary::default();
    let mut queue = jobs.into_iter();

    while let Some(job) = queue.next() {
        if *cancel.borrow() {
            summary.not_started.push(job.name);
            break;
        }

        if !backend.can_execute(&job) {
            warn!(job = %job.name, script = ?job.script, "script is not executable; skipping");
            book.record(&job.name, JobStatus::Skipped);
            book.save(fs, &resume_path)?;
            summary.skipped.push(job.name);
            continue;
        }

        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => permit.map_err(anyhow::Error::from)?,
            _ = cancelled(&mut cancel) => {
                summary.not_started.push(job.name);
                break;
            }
        };

        while let Some(done) = running.try_join_next() {
            finish(done, &mut book, &mut summary)?;
            book.save(fs, &resume_path)?;
        }

        debug!(job = %job.name, "launching job");
        let backend = Arc::clone(&backend);
        running.spawn(async move {
            let _permit = permit;
            let name = job.name.clone();
            (name, backend.run_job(job).await)
        });
    }

    let rest: Vec<String> = queue.map(|job| job.name).collect();
    if !summary.not_started.is_empty() || !rest.is_empty() {
        summary.not_started.extend(rest);
        warn!(
            not_started = summary.not_started.len(),
            "cancelled; waiting for running jobs to finish"
        );
    }

    while let Some(done) = running.join_next().await {
        finish(done, &mut book, &mut summary)?;
        book.save(fs, &resume_path)?;
    }

    info!(
        succeeded = summary.succeeded.len(),
        failed = summary.failed.len(),
        skipped = summary.skipped.len(),
        not_started = summary.not_started.len(),
        "local run finished"
    );
    Ok(summary)
}

fn finish(
    done: std::result::Result<(String, Result<i32>), tokio::task::JoinError>,
    book: &mut JobLogBook,
    summary: &mut RunSummary,
) -> Result<()> {
    let (name, outcome) = done.map_err(|e| CycledagError::Other(anyhow::Error::from(e)))?;
    match outcome {
        Ok(0) => {
            book.record(&name, JobStatus::Exited(0));
            summary.succeeded.push(name);
        }
        Ok(code) => {
            book.record(&name, JobStatus::Exited(code));
            summary.failed.push((name, code));
        }
        Err(err) => {
            warn!(job = %name, error = %err, "job could not be run");
            book.record(&name, JobStatus::Exited(-1));
            summary.failed.push((name, -1));
        }
    }
    Ok(())
}

/// Resolves once the flag is set. A dropped sender never cancels.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
