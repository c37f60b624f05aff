// src/exec/task_runner.rs

//! Individual job process runner.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::backend::LocalJob;

/// Run a single job script with stdout and stderr appended to its log
/// file. Returns the exit code; `-1` when the process died from a signal.
///
/// Running jobs are never killed: cancellation only stops new launches.
pub async fn run_script(job: &LocalJob) -> Result<i32> {
    if let Some(parent) = job.log_file.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating log dir {:?}", parent))?;
    }
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&job.log_file)
        .with_context(|| format!("opening log file {:?}", job.log_file))?;
    let log_err = log
        .try_clone()
        .with_context(|| format!("duplicating log handle {:?}", job.log_file))?;

    info!(job = %job.name, script = ?job.script, "starting job process");

    let mut cmd = Command::new(&job.script);
    if let Some(dir) = job.script.parent() {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning job script {:?}", job.script))?;
    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for job '{}'", job.name))?;

    let code = status.code().unwrap_or(-1);
    if status.success() {
        debug!(job = %job.name, "job process exited cleanly");
    } else {
        warn!(job = %job.name, exit_code = code, log = ?job.log_file, "job process failed");
    }
    Ok(code)
}

#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}
