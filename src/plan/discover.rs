// src/plan/discover.rs

//! Discovery of experimental-data runs from a directory glob.
//!
//! `exp_dataset_run_glob` looks like
//! `/data/exp/IceCube/{year}/filtered/level2/{month:02d}{day:02d}/Run*`;
//! every matching directory named `Run<digits>` is one run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::config::model::DatasetSettings;
use crate::errors::{CycledagError, Result};
use crate::fs::{FileSystem, expand_glob};
use crate::render::format::{format_str, value_to_string};

/// A run directory found on disk, with the settings derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredRun {
    pub run_number: u64,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub run_folder: PathBuf,
    /// Sorted subrun files inside the run folder.
    pub inputs: Vec<PathBuf>,
    pub gcd: Option<PathBuf>,
}

impl DiscoveredRun {
    /// Keys merged into the run's namespace.
    pub fn settings(&self) -> Mapping {
        let mut map = Mapping::new();
        map.insert("year".into(), Value::from(self.year));
        map.insert("month".into(), Value::from(self.month));
        map.insert("day".into(), Value::from(self.day));
        map.insert(
            "run_folder".into(),
            Value::from(self.run_folder.to_string_lossy().to_string()),
        );
        map.insert(
            "in_file_pattern".into(),
            Value::Sequence(
                self.inputs
                    .iter()
                    .map(|p| Value::from(p.to_string_lossy().to_string()))
                    .collect(),
            ),
        );
        if let Some(gcd) = &self.gcd {
            map.insert("gcd".into(), Value::from(gcd.to_string_lossy().to_string()));
        }
        map
    }
}

/// Walk years, months and days and collect every run directory matching
/// the dataset's run glob. Runs are returned in discovery order
/// (chronological, then by path); a run seen twice keeps its first entry.
pub fn discover_runs(fs: &dyn FileSystem, settings: &DatasetSettings) -> Result<Vec<DiscoveredRun>> {
    let Some(run_glob) = settings.exp_dataset_run_glob.as_deref() else {
        return Ok(Vec::new());
    };

    let years = match (&settings.exp_dataset_years, &settings.year) {
        (Some(years), _) => years.clone(),
        (None, Some(year)) => vec![parse_year(year)?],
        (None, None) => {
            let found = discover_years(fs, run_glob)?;
            info!(?found, "no years specified, using the ones found on disk");
            found
        }
    };
    let months: Vec<u32> = settings
        .exp_dataset_months
        .clone()
        .unwrap_or_else(|| (1..=12).collect());

    let mut seen = HashSet::new();
    let mut runs = Vec::new();

    for &year in &years {
        for &month in &months {
            let days: Vec<u32> = match &settings.exp_dataset_days {
                Some(days) => days.clone(),
                None => (1..=days_in_month(year, month)).collect(),
            };
            for day in days {
                let mut ns = Mapping::new();
                ns.insert("year".into(), Value::from(year));
                ns.insert("month".into(), Value::from(month));
                ns.insert("day".into(), Value::from(day));
                let pattern = format_str(run_glob, &ns).map_err(|e| {
                    CycledagError::config(format!("`exp_dataset_run_glob`: {e}"))
                })?;

                for run_folder in expand_glob(fs, &pattern)? {
                    let Some(run_number) = run_number_from_dir(&run_folder) else {
                        debug!(path = ?run_folder, "skipping non-run entry");
                        continue;
                    };
                    if !seen.insert(run_number) {
                        continue;
                    }
                    let inputs = files_in(fs, &run_folder, &settings.exp_dataset_subrun_pattern)?;
                    let gcd = files_in(fs, &run_folder, &settings.exp_dataset_gcd_pattern)?
                        .into_iter()
                        .next();
                    runs.push(DiscoveredRun {
                        run_number,
                        year,
                        month,
                        day,
                        run_folder,
                        inputs,
                        gcd,
                    });
                }
            }
        }
    }

    debug!(runs = runs.len(), "discovered experimental runs");
    Ok(runs)
}

fn parse_year(value: &Value) -> Result<i32> {
    let text = value_to_string(value);
    text.trim()
        .parse()
        .map_err(|_| CycledagError::config(format!("`year` is not a valid year: {text:?}")))
}

/// Years are the `20??` directories at the glob prefix that contain at
/// least one match for the date-free run glob.
fn discover_years(fs: &dyn FileSystem, run_glob: &str) -> Result<Vec<i32>> {
    let Some((prefix, _)) = run_glob.split_once("{year}") else {
        return Err(CycledagError::config(
            "`exp_dataset_run_glob` has no {year} field and no years are configured",
        ));
    };
    let date_free = run_glob
        .replace("{month:02d}{day:02d}", "*")
        .replace("{month:02d}", "*")
        .replace("{day:02d}", "*");

    let mut years = Vec::new();
    for candidate in expand_glob(fs, &format!("{prefix}20??"))? {
        let Some(year) = candidate
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<i32>().ok())
        else {
            continue;
        };
        let mut ns = Mapping::new();
        ns.insert("year".into(), Value::from(year));
        let pattern = format_str(&date_free, &ns)
            .map_err(|e| CycledagError::config(format!("`exp_dataset_run_glob`: {e}")))?;
        if !expand_glob(fs, &pattern)?.is_empty() {
            years.push(year);
        }
    }
    Ok(years)
}

fn files_in(fs: &dyn FileSystem, dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let joined = dir.join(pattern);
    let found = expand_glob(fs, &joined.to_string_lossy())?;
    Ok(found.into_iter().filter(|p| fs.is_file(p)).collect())
}

/// `Run00120156` → `120156`.
pub fn run_number_from_dir(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let digits = name.strip_prefix("Run")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 => 29,
        2 => 28,
        _ => 0,
    }
}
