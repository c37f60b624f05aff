// src/exec/logbook.rs

//! `resume.txt` bookkeeping for the local runner.
//!
//! One line per job, `<job>;<status>`, where status is the exit code, empty
//! for a job that never finished, or `skipped` for a job that could not be
//! started.

use std::path::Path;

use crate::errors::{CycledagError, Result};
use crate::fs::FileSystem;

pub const RESUME_FILE: &str = "resume.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Unfinished,
    Exited(i32),
    Skipped,
}

impl JobStatus {
    pub fn is_success(self) -> bool {
        matches!(self, JobStatus::Exited(0))
    }

    fn render(self) -> String {
        match self {
            JobStatus::Unfinished => String::new(),
            JobStatus::Exited(code) => code.to_string(),
            JobStatus::Skipped => "skipped".to_string(),
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "" => Some(JobStatus::Unfinished),
            "skipped" => Some(JobStatus::Skipped),
            code => code.parse().ok().map(JobStatus::Exited),
        }
    }
}

/// Per-job status in launch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobLogBook {
    entries: Vec<(String, JobStatus)>,
}

impl JobLogBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log book with every job unfinished.
    pub fn with_jobs<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: names
                .into_iter()
                .map(|n| (n.into(), JobStatus::Unfinished))
                .collect(),
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut book = Self::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let (name, raw) = line.rsplit_once(';').ok_or_else(|| {
                CycledagError::config(format!(
                    "resume file line {}: expected '<job>;<status>', got '{line}'",
                    lineno + 1
                ))
            })?;
            let status = JobStatus::parse(raw).ok_or_else(|| {
                CycledagError::config(format!(
                    "resume file line {}: invalid status '{raw}'",
                    lineno + 1
                ))
            })?;
            book.record(name.trim(), status);
        }
        Ok(book)
    }

    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        let contents = fs.read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, status) in &self.entries {
            out.push_str(name);
            out.push(';');
            out.push_str(&status.render());
            out.push('\n');
        }
        out
    }

    pub fn save(&self, fs: &dyn FileSystem, path: &Path) -> Result<()> {
        fs.write(path, self.render().as_bytes())?;
        Ok(())
    }

    /// Set the status of `name`, appending it if unknown.
    pub fn record(&mut self, name: &str, status: JobStatus) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = status,
            None => self.entries.push((name.to_string(), status)),
        }
    }

    pub fn status(&self, name: &str) -> Option<JobStatus> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| *s)
    }

    /// Jobs a resumed run has to start again: unfinished ones, plus failed
    /// and skipped ones when `retry_failed` is set.
    pub fn pending(&self, retry_failed: bool) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, status)| match status {
                JobStatus::Unfinished => true,
                JobStatus::Exited(0) => false,
                JobStatus::Exited(_) | JobStatus::Skipped => retry_failed,
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, JobStatus)> {
        self.entries.iter().map(|(n, s)| (n.as_str(), *s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
