// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The local runner talks to an `ExecutorBackend` instead of spawning
//! processes itself. This makes it easy to swap in a fake executor in tests.
//!
//! - `ProcessBackend` is the implementation used by `cycledag run-local`.
//!   It runs the job script as a child process with stdout and stderr
//!   appended to the job's log file.
//! - Tests can provide their own `ExecutorBackend` that, for example,
//!   records which jobs were started and returns canned exit codes.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::errors::Result;

use super::task_runner::{is_executable, run_script};

/// One job script handed to the local runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalJob {
    /// Identifier recorded in `resume.txt`: the script path below the run
    /// directory, without extension.
    pub name: String,
    pub script: PathBuf,
    pub log_file: PathBuf,
}

/// Trait abstracting how a job script is executed.
pub trait ExecutorBackend: Send + Sync {
    /// Run the job to completion and return its exit code.
    ///
    /// A process killed by a signal reports `-1`.
    fn run_job(&self, job: LocalJob) -> Pin<Box<dyn Future<Output = Result<i32>> + Send + '_>>;

    /// Whether the job can be started at all. Jobs that cannot are skipped
    /// and recorded.
    fn can_execute(&self, job: &LocalJob) -> bool {
        is_executable(&job.script)
    }
}

/// Runs job scripts as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessBackend;

impl ExecutorBackend for ProcessBackend {
    fn run_job(&self, job: LocalJob) -> Pin<Box<dyn Future<Output = Result<i32>> + Send + '_>> {
        Box::pin(async move { Ok(run_script(&job).await?) })
    }
}
