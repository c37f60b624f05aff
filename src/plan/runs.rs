// src/plan/runs.rs

//! The job enumerator: turns one dataset variant into run units.
//!
//! Order of operations:
//! 1. collect candidate runs from the run source
//!    (`exp_dataset_run_glob` > `runs_list` > `runs_range`),
//! 2. evaluate the run filters against each run's row,
//! 3. drop `runs_to_ignore`,
//! 4. attach livetimes and good-run-list GCD files,
//! 5. group into merge buckets,
//! 6. optionally exclude corrupted inputs.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

use crate::config::model::DatasetVariant;
use crate::errors::{CycledagError, Result};
use crate::fs::FileSystem;
use crate::plan::corrupt::{CorruptedInput, InputChecker, partition_inputs};
use crate::plan::discover::{DiscoveredRun, discover_runs};
use crate::plan::filter::{RunRow, all_match};
use crate::plan::grl::GoodRunList;
use crate::plan::livetime::{RunLivetime, gcd_from_grl, livetime_settings, run_livetime};
use crate::plan::paths::{resolve_inputs, unit_namespace};

/// The smallest schedulable quantum of work.
#[derive(Debug, Clone, PartialEq)]
pub struct RunUnit {
    /// Representative run: the lowest run of a merge bucket.
    pub run_number: u64,
    /// Every run in this unit, ascending for merged units.
    pub runs: Vec<u64>,
    /// Per-run settings merged into the job namespace.
    pub settings: Mapping,
    /// Input files, when they were resolved.
    pub inputs: Vec<PathBuf>,
}

/// A run referenced by the run source but absent from the good-run-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDiscoveryWarning {
    pub dataset: String,
    pub run_number: u64,
    pub message: String,
}

/// Non-fatal findings collected while planning a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumerationReport {
    pub warnings: Vec<InputDiscoveryWarning>,
    pub corrupted: Vec<CorruptedInput>,
    /// Units dropped because every input was corrupted.
    pub excluded_units: Vec<u64>,
    pub skipped_existing_output: usize,
    pub skipped_missing_input: usize,
}

impl EnumerationReport {
    pub fn merge(&mut self, other: EnumerationReport) {
        self.warnings.extend(other.warnings);
        self.corrupted.extend(other.corrupted);
        self.excluded_units.extend(other.excluded_units);
        self.skipped_existing_output += other.skipped_existing_output;
        self.skipped_missing_input += other.skipped_missing_input;
    }
}

#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    pub units: Vec<RunUnit>,
    pub report: EnumerationReport,
}

/// Knobs of one enumeration pass.
#[derive(Clone, Copy, Default)]
pub struct EnumerateOptions<'a> {
    /// Excludes inputs it rejects; implies `resolve_inputs`.
    pub checker: Option<&'a dyn InputChecker>,
    /// Expand `in_file_pattern` for every unit.
    pub resolve_inputs: bool,
}

/// `gcd` value asking for the GCD file next to the run's good-run-list
/// output directory.
pub const GCD_FROM_GRL: &str = "GET_GCD_FROM_GRL";

struct Candidate {
    run: u64,
    row: RunRow,
    discovered: Option<DiscoveredRun>,
    livetime: Option<RunLivetime>,
    gcd: Option<PathBuf>,
}

pub fn enumerate(
    variant: &DatasetVariant,
    fs: &dyn FileSystem,
    opts: EnumerateOptions<'_>,
) -> Result<Enumeration> {
    let settings = &variant.settings;
    let dataset = variant.dataset.as_str();
    let mut report = EnumerationReport::default();

    let grl = match &settings.exp_dataset_grl_paths {
        Some(paths) => Some(GoodRunList::load(fs, &paths.to_vec())?),
        None => None,
    };

    let candidates = collect_candidates(variant, fs)?;
    let total = candidates.len();

    // Filters, with the good-run-list row when there is one.
    let mut passed = Vec::with_capacity(total);
    for mut candidate in candidates {
        if let Some(grl) = &grl {
            match grl.get(candidate.run) {
                Some(row) => candidate.row.extend(row.clone()),
                None => {
                    let message = format!(
                        "run {} is missing in the good-run-list; either the wrong lists were loaded or this is not a physics run",
                        candidate.run
                    );
                    if settings.exp_data_warn_missing {
                        warn!(dataset, run_number = candidate.run, "{message}");
                    }
                    report.warnings.push(InputDiscoveryWarning {
                        dataset: dataset.to_string(),
                        run_number: candidate.run,
                        message,
                    });
                }
            }
        }
        candidate.row.insert("RunNum".into(), Value::from(candidate.run));
        candidate.row.insert("run_number".into(), Value::from(candidate.run));

        if all_match(&variant.filters, &candidate.row) {
            passed.push(candidate);
        }
    }

    let ignore: HashSet<u64> = settings.runs_to_ignore.iter().copied().collect();
    passed.retain(|c| !ignore.contains(&c.run));

    attach_run_metadata(variant, fs, grl.as_ref(), &mut passed)?;

    let mut units = group_units(variant, passed)?;

    let resolve = opts.resolve_inputs || opts.checker.is_some();
    if resolve {
        for unit in &mut units {
            if unit.inputs.is_empty() {
                unit.inputs = unit_inputs(variant, fs, unit)?;
            }
        }
    }

    if let Some(checker) = opts.checker {
        units.retain_mut(|unit| {
            if unit.inputs.is_empty() {
                return true;
            }
            let (usable, corrupted) =
                partition_inputs(checker, fs, dataset, unit.run_number, &unit.inputs);
            if corrupted.is_empty() {
                return true;
            }
            report.corrupted.extend(corrupted);
            if usable.is_empty() {
                warn!(dataset, run_number = unit.run_number, "all inputs corrupted, excluding run unit");
                report.excluded_units.push(unit.run_number);
                return false;
            }
            unit.settings.insert(
                "in_file_pattern".into(),
                Value::Sequence(
                    usable
                        .iter()
                        .map(|p| Value::from(p.to_string_lossy().to_string()))
                        .collect(),
                ),
            );
            unit.inputs = usable;
            true
        });
    }

    info!(
        dataset,
        overlay = %variant.overlay.label(),
        candidates = total,
        units = units.len(),
        "enumerated run units"
    );
    Ok(Enumeration { units, report })
}

/// Livetimes of discovered runs and, for `gcd: GET_GCD_FROM_GRL`, the GCD
/// file from each run's good-run-list entry.
fn attach_run_metadata(
    variant: &DatasetVariant,
    fs: &dyn FileSystem,
    grl: Option<&GoodRunList>,
    passed: &mut [Candidate],
) -> Result<()> {
    let settings = &variant.settings;
    let dataset = variant.dataset.as_str();

    let gcd_from_list = variant.tree.get_str("gcd") == Some(GCD_FROM_GRL);
    if gcd_from_list && grl.is_none() {
        return Err(CycledagError::config(format!(
            "dataset '{dataset}': `gcd` is {GCD_FROM_GRL} but no `exp_dataset_grl_paths` are configured"
        )));
    }

    let mut total = 0.0;
    let mut with_livetime = 0usize;
    for candidate in passed.iter_mut() {
        let grl_row = grl.and_then(|g| g.get(candidate.run));
        if let Some(discovered) = &candidate.discovered {
            candidate.livetime =
                run_livetime(fs, discovered, &candidate.row, &settings.exp_dataset_gaps_pattern)?;
        }
        if let Some(livetime) = &candidate.livetime {
            total += livetime.livetime;
            with_livetime += 1;
        }
        if gcd_from_list {
            candidate.gcd = Some(gcd_from_grl(
                fs,
                candidate.run,
                grl_row,
                &settings.exp_dataset_gcd_pattern,
            )?);
        }
    }

    if with_livetime > 0 {
        info!(
            dataset,
            runs = passed.len(),
            with_livetime,
            livetime_s = total,
            livetime_days = total / 86_400.0,
            "experimental livetime"
        );
    }
    Ok(())
}

fn collect_candidates(variant: &DatasetVariant, fs: &dyn FileSystem) -> Result<Vec<Candidate>> {
    let settings = &variant.settings;

    if settings.exp_dataset_run_glob.is_some() {
        return Ok(discover_runs(fs, settings)?
            .into_iter()
            .map(|d| Candidate {
                run: d.run_number,
                row: RunRow::new(),
                discovered: Some(d),
                livetime: None,
                gcd: None,
            })
            .collect());
    }

    let runs: Vec<u64> = if let Some(list) = &settings.runs_list {
        list.clone()
    } else if let Some(range) = &settings.runs_range {
        let (start, end, step) = match range.as_slice() {
            [start, end] => (*start, *end, 1),
            [start, end, step] => (*start, *end, *step),
            other => {
                return Err(CycledagError::config(format!(
                    "`runs_range` must have two or three entries, got {other:?}"
                )));
            }
        };
        (start..end).step_by(step.max(1) as usize).collect()
    } else {
        return Err(CycledagError::config(format!(
            "dataset '{}' has no run source",
            variant.dataset
        )));
    };

    Ok(runs
        .into_iter()
        .map(|run| Candidate {
            run,
            row: RunRow::new(),
            discovered: None,
            livetime: None,
            gcd: None,
        })
        .collect())
}

/// Config-level `run_number_settings`, keyed by run number.
fn configured_run_settings(variant: &DatasetVariant) -> Result<BTreeMap<u64, Mapping>> {
    let mut out = BTreeMap::new();
    let Some(table) = &variant.settings.run_number_settings else {
        return Ok(out);
    };
    for (key, value) in table {
        let run = match key {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| CycledagError::config(format!("`run_number_settings` key {key:?} is not a run number")))?;
        let Value::Mapping(map) = value else {
            return Err(CycledagError::config(format!(
                "`run_number_settings` entry for run {run} must be a mapping"
            )));
        };
        out.insert(run, map.clone());
    }
    Ok(out)
}

fn unit_settings(configured: &BTreeMap<u64, Mapping>, members: &[Candidate]) -> Mapping {
    let mut settings = Mapping::new();
    let Some(first) = members.first() else {
        return settings;
    };
    if let Some(extra) = configured.get(&first.run) {
        settings.extend(extra.clone());
    }
    if let Some(discovered) = &first.discovered {
        settings.extend(discovered.settings());
    }
    if let Some(gcd) = &first.gcd {
        settings.insert("gcd".into(), Value::from(gcd.to_string_lossy().to_string()));
    }
    let livetimes: Option<Vec<(u64, &RunLivetime)>> = members
        .iter()
        .map(|m| m.livetime.as_ref().map(|l| (m.run, l)))
        .collect();
    if let Some(livetimes) = livetimes {
        settings.extend(livetime_settings(&livetimes));
    }
    if members.len() > 1 {
        let all_inputs: Vec<Value> = members
            .iter()
            .filter_map(|m| m.discovered.as_ref())
            .flat_map(|d| d.inputs.iter())
            .map(|p| Value::from(p.to_string_lossy().to_string()))
            .collect();
        if !all_inputs.is_empty() {
            settings.insert("in_file_pattern".into(), Value::Sequence(all_inputs));
        }
        settings.insert(
            "merged_runs".into(),
            Value::Sequence(members.iter().map(|m| Value::from(m.run)).collect()),
        );
    }
    settings
}

fn group_units(variant: &DatasetVariant, mut passed: Vec<Candidate>) -> Result<Vec<RunUnit>> {
    let configured = configured_run_settings(variant)?;
    let factor = variant.settings.merge_factor() as usize;

    let groups: Vec<Vec<Candidate>> = if factor > 1 {
        passed.sort_by_key(|c| c.run);
        passed.dedup_by_key(|c| c.run);
        let mut groups = Vec::new();
        let mut iter = passed.into_iter().peekable();
        while iter.peek().is_some() {
            groups.push(iter.by_ref().take(factor).collect());
        }
        groups
    } else {
        passed.into_iter().map(|c| vec![c]).collect()
    };

    let units: Vec<RunUnit> = groups
        .into_iter()
        .filter_map(|members| {
            let run_number = members.first()?.run;
            let inputs = members
                .iter()
                .filter_map(|m| m.discovered.as_ref())
                .flat_map(|d| d.inputs.iter().cloned())
                .collect();
            Some(RunUnit {
                run_number,
                runs: members.iter().map(|m| m.run).collect(),
                settings: unit_settings(&configured, &members),
                inputs,
            })
        })
        .collect();

    debug!(dataset = %variant.dataset, factor, units = units.len(), "grouped run units");
    Ok(units)
}

/// Inputs of a unit from `in_file_pattern`, across all member runs.
fn unit_inputs(variant: &DatasetVariant, fs: &dyn FileSystem, unit: &RunUnit) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for &run in &unit.runs {
        let ns = unit_namespace(variant, run, &unit.settings)?;
        for path in resolve_inputs(fs, &ns)? {
            if !inputs.contains(&path) {
                inputs.push(path);
            }
        }
    }
    Ok(inputs)
}
