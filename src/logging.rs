// src/logging.rs

//! Logging setup for `cycledag` using `tracing` + `tracing-subscriber`.
//!
//! The filter is taken from, in order:
//! 1. `--log-level`
//! 2. `CYCLEDAG_LOG`, either a bare level (`debug`) or full directives
//!    (`info,cycledag::plan=trace`)
//! 3. `info`
//!
//! Logs go to stderr; stdout carries only the dry-run plan and summaries.

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "CYCLEDAG_LOG";

pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let directives = filter_directives(cli_level, std::env::var(LOG_ENV_VAR).ok().as_deref());
    let filter = EnvFilter::try_new(&directives)
        .with_context(|| format!("invalid log filter {directives:?}"))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// The filter directives `init_logging` installs.
///
/// An environment value that is neither a level name nor valid directives
/// is ignored.
pub fn filter_directives(cli_level: Option<LogLevel>, env_value: Option<&str>) -> String {
    if let Some(lvl) = cli_level {
        return level_name(Level::from(lvl));
    }
    let Some(raw) = env_value.map(str::trim).filter(|v| !v.is_empty()) else {
        return level_name(Level::INFO);
    };
    if let Some(level) = parse_level_str(raw) {
        return level_name(level);
    }
    let looks_like_directives = raw.contains('=') || raw.contains(',');
    if looks_like_directives && EnvFilter::try_new(raw).is_ok() {
        raw.to_string()
    } else {
        level_name(Level::INFO)
    }
}

impl From<LogLevel> for Level {
    fn from(lvl: LogLevel) -> Self {
        match lvl {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

fn level_name(level: Level) -> String {
    level.as_str().to_lowercase()
}

fn parse_level_str(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
