// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::types::SubmitMode;

/// Command-line arguments for `cycledag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cycledag",
    version,
    about = "Expand cycled processing configs into job scripts and DAGMan files.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CYCLEDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Expand a config into job scripts and, optionally, submit them.
    Create(CreateArgs),
    /// Run already generated job scripts on this machine.
    RunLocal(RunLocalArgs),
}

#[derive(Debug, Clone, clap::Args)]
pub struct CreateArgs {
    /// Path to the YAML config.
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Default `data_folder` when the config sets none.
    #[arg(short = 'd', long, value_name = "DIR")]
    pub data_folder: Option<String>,

    /// Default `processing_scratch` (DAGMan files) when the config sets none.
    #[arg(short = 'p', long, value_name = "DIR")]
    pub processing_scratch: Option<String>,

    /// What to do with the generated jobs.
    #[arg(long, value_enum, default_value_t = SubmitMode::None)]
    pub submit: SubmitMode,

    /// Parallel jobs for `--submit local`.
    #[arg(short = 'j', long, value_name = "N", default_value_t = 1)]
    pub jobs: usize,

    /// Skip jobs whose outputs already exist.
    #[arg(long)]
    pub resume: bool,

    /// Skip jobs whose input files are missing.
    #[arg(long)]
    pub check_input: bool,

    /// Plan and print the jobs without writing anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, clap::Args)]
pub struct RunLocalArgs {
    /// Directory holding the job scripts (usually `<processing>/jobs`).
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Parallel jobs.
    #[arg(short = 'j', long, value_name = "N", default_value_t = 1)]
    pub jobs: usize,

    /// Glob selecting job scripts below DIR.
    #[arg(long, value_name = "GLOB", default_value = crate::exec::pool::DEFAULT_JOB_PATTERN)]
    pub pattern: String,

    /// Where job logs and `resume.txt` go. Default: `DIR/local_logs`.
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Resume from a previous `resume.txt`, running only unfinished jobs.
    #[arg(long, value_name = "FILE")]
    pub resume: Option<PathBuf>,

    /// With `--resume`, also rerun failed jobs.
    #[arg(long, requires = "resume")]
    pub retry_failed: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
