// src/exec/mod.rs

//! Local execution of generated job scripts.
//!
//! - [`backend`] provides the `ExecutorBackend` trait and the
//!   `ProcessBackend` used in production; tests replace it with a fake.
//! - [`task_runner`] runs one script as a child process.
//! - [`pool`] launches jobs with bounded concurrency and honours Ctrl-C.
//! - [`logbook`] reads and writes `resume.txt`.

pub mod backend;
pub mod logbook;
pub mod pool;
pub mod task_runner;

pub use backend::{ExecutorBackend, LocalJob, ProcessBackend};
pub use logbook::{JobLogBook, JobStatus, RESUME_FILE};
pub use pool::{collect_jobs, local_job, run_jobs, select_resumed, RunSummary, RunnerOptions};
