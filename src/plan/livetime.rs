// src/plan/livetime.rs

//! Livetime bookkeeping for experimental runs.
//!
//! Every subrun of a Level2 run comes with a `<subrun:08>_gaps.txt` file:
//!
//! ```text
//! Run: 120156
//! First Event of File: 2012 115162516520713018
//! Last Event of File: 2012 115172512958102486
//! File Livetime: 999.64
//! ```
//!
//! Event times are DAQ times (year, tenths of nanoseconds since the start of
//! that year). Consecutive subruns form one segment; a segment starts at the
//! first event of its first subrun and ends at the last event of its last
//! subrun. The run livetime is the summed segment length. Runs without the
//! needed gaps files fall back to the `LiveTime` column of the good-run-list
//! and carry no start or end times.
//!
//! MJDs are computed without leap-second corrections.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::errors::{CycledagError, Result};
use crate::fs::{FileSystem, expand_glob};
use crate::plan::discover::DiscoveredRun;
use crate::plan::filter::RunRow;
use crate::render::format::format_str;

const SECONDS_PER_DAY: f64 = 86_400.0;
const MJD_UNIX_EPOCH: i64 = 40_587;
const DAQ_TICKS_PER_SECOND: f64 = 1e10;

/// Livetime of one run, or of a merged unit.
#[derive(Debug, Clone, PartialEq)]
pub struct RunLivetime {
    /// Seconds.
    pub livetime: f64,
    /// Segment start times in MJD.
    pub start_times: Vec<f64>,
    /// Segment end times in MJD.
    pub end_times: Vec<f64>,
}

impl RunLivetime {
    fn from_grl(row: &RunRow) -> Option<Self> {
        let livetime = row.get("LiveTime").and_then(Value::as_f64)?;
        Some(Self {
            livetime,
            start_times: Vec::new(),
            end_times: Vec::new(),
        })
    }
}

/// The `exp_dataset_*` keys handed to the processing scripts.
pub fn livetime_settings(members: &[(u64, &RunLivetime)]) -> Mapping {
    let mut map = Mapping::new();
    let floats = |values: Vec<f64>| Value::Sequence(values.into_iter().map(Value::from).collect());

    map.insert(
        "exp_dataset_livetime".into(),
        Value::from(members.iter().map(|(_, l)| l.livetime).sum::<f64>()),
    );
    map.insert(
        "exp_dataset_start_times".into(),
        floats(members.iter().flat_map(|(_, l)| l.start_times.iter().copied()).collect()),
    );
    map.insert(
        "exp_dataset_end_times".into(),
        floats(members.iter().flat_map(|(_, l)| l.end_times.iter().copied()).collect()),
    );
    map.insert(
        "exp_dataset_run_list".into(),
        Value::Sequence(members.iter().map(|(run, _)| Value::from(*run)).collect()),
    );
    map.insert("exp_dataset_merge".into(), Value::Bool(members.len() > 1));
    map
}

/// Livetime of a discovered run: from its gaps files when all segment
/// boundaries have one, otherwise from the good-run-list row.
pub fn run_livetime(
    fs: &dyn FileSystem,
    run: &DiscoveredRun,
    row: &RunRow,
    gaps_pattern: &str,
) -> Result<Option<RunLivetime>> {
    if let Some(from_gaps) = livetime_from_gaps(fs, run, gaps_pattern)? {
        return Ok(Some(from_gaps));
    }
    Ok(RunLivetime::from_grl(row))
}

fn livetime_from_gaps(
    fs: &dyn FileSystem,
    run: &DiscoveredRun,
    gaps_pattern: &str,
) -> Result<Option<RunLivetime>> {
    let subruns: Vec<u64> = run.inputs.iter().filter_map(|p| subrun_id(p)).collect();
    if subruns.is_empty() {
        return Ok(None);
    }

    let mut ns = run.settings();
    ns.insert("run_number".into(), Value::from(run.run_number));
    let pattern = format_str(gaps_pattern, &ns)
        .map_err(|e| CycledagError::config(format!("`exp_dataset_gaps_pattern`: {e}")))?;
    let gaps_files: BTreeMap<u64, PathBuf> = expand_glob(fs, &pattern)?
        .into_iter()
        .filter_map(|p| gaps_subrun_id(&p).map(|id| (id, p)))
        .collect();
    if gaps_files.is_empty() {
        debug!(run = run.run_number, %pattern, "no gaps files");
        return Ok(None);
    }

    let mut livetime = RunLivetime {
        livetime: 0.0,
        start_times: Vec::new(),
        end_times: Vec::new(),
    };
    for (first, last) in segments(&subruns) {
        let Some(start) = boundary(fs, run.run_number, &gaps_files, first)? else {
            return Ok(None);
        };
        let Some(end) = boundary(fs, run.run_number, &gaps_files, last)? else {
            return Ok(None);
        };
        if end.last_mjd <= start.first_mjd {
            warn!(run = run.run_number, first, last, "segment ends before it starts; ignoring gaps files");
            return Ok(None);
        }
        livetime.livetime += (end.last_mjd - start.first_mjd) * SECONDS_PER_DAY;
        livetime.start_times.push(start.first_mjd);
        livetime.end_times.push(end.last_mjd);
    }
    Ok(Some(livetime))
}

fn boundary(
    fs: &dyn FileSystem,
    run: u64,
    gaps_files: &BTreeMap<u64, PathBuf>,
    subrun: u64,
) -> Result<Option<GapsFile>> {
    let Some(path) = gaps_files.get(&subrun) else {
        warn!(run, subrun, "missing gaps file; falling back to the good-run-list livetime");
        return Ok(None);
    };
    let contents = fs.read_to_string(path)?;
    match GapsFile::parse(&contents) {
        Ok(gaps) => {
            if gaps.gaps > 0 {
                warn!(run, subrun, gaps = gaps.gaps, "gaps inside the subrun are ignored");
            }
            Ok(Some(gaps))
        }
        Err(reason) => {
            warn!(run, subrun, path = ?path, %reason, "unreadable gaps file; falling back to the good-run-list livetime");
            Ok(None)
        }
    }
}

/// The parts of a gaps file the livetime needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapsFile {
    pub first_mjd: f64,
    pub last_mjd: f64,
    /// `Gap Detected:` lines between the first and last event.
    pub gaps: usize,
}

impl GapsFile {
    pub fn parse(contents: &str) -> std::result::Result<Self, String> {
        let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.len() < 4 {
            return Err(format!("expected at least 4 lines, found {}", lines.len()));
        }
        let last = lines[lines.len() - 1];
        if !last.trim_start().starts_with("File Livetime:") {
            return Err(format!("last line is not the file livetime: {last:?}"));
        }
        let first_event = lines[1];
        let last_event = lines[lines.len() - 2];
        if !first_event.trim_start().starts_with("First") {
            return Err(format!("second line is not the first event: {first_event:?}"));
        }
        if !last_event.trim_start().starts_with("Last") {
            return Err(format!("expected the last event before the livetime: {last_event:?}"));
        }
        let gaps = lines[2..lines.len() - 2]
            .iter()
            .filter(|l| l.contains("Gap Detected:"))
            .count();
        Ok(Self {
            first_mjd: event_mjd(first_event)?,
            last_mjd: event_mjd(last_event)?,
            gaps,
        })
    }
}

/// `... <year> <daq_time>` → MJD.
fn event_mjd(line: &str) -> std::result::Result<f64, String> {
    let mut tokens = line.split_whitespace().rev();
    let (Some(daq), Some(year)) = (tokens.next(), tokens.next()) else {
        return Err(format!("no event time in {line:?}"));
    };
    let year: i32 = year.parse().map_err(|_| format!("bad year in {line:?}"))?;
    let daq: u64 = daq.parse().map_err(|_| format!("bad DAQ time in {line:?}"))?;
    Ok(daq_time_to_mjd(year, daq))
}

/// Modified Julian Date of a DAQ time.
pub fn daq_time_to_mjd(year: i32, daq_time: u64) -> f64 {
    let year_start = (days_from_civil(i64::from(year), 1, 1) + MJD_UNIX_EPOCH) as f64;
    year_start + daq_time as f64 / DAQ_TICKS_PER_SECOND / SECONDS_PER_DAY
}

/// Days since 1970-01-01 of a proleptic Gregorian date.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// `..._Subrun00000000_00000042.i3.zst` → `42`.
pub fn subrun_id(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let last = name.rsplit('_').next()?;
    last.split('.').next()?.parse().ok()
}

fn gaps_subrun_id(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix("_gaps.txt")?;
    stem.rsplit('_').next()?.parse().ok()
}

/// Inclusive `(first, last)` ranges of consecutive subrun ids.
pub fn segments(subruns: &[u64]) -> Vec<(u64, u64)> {
    let mut ids = subruns.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let mut out: Vec<(u64, u64)> = Vec::new();
    for id in ids {
        match out.last_mut() {
            Some((_, last)) if *last + 1 == id => *last = id,
            _ => out.push((id, id)),
        }
    }
    out
}

/// First file matching `gcd_pattern` in the run's `OutDir` column.
pub fn gcd_from_grl(
    fs: &dyn FileSystem,
    run: u64,
    row: Option<&RunRow>,
    gcd_pattern: &str,
) -> Result<PathBuf> {
    let out_dir = row
        .and_then(|r| r.get("OutDir"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            CycledagError::config(format!(
                "`gcd` is GET_GCD_FROM_GRL but run {run} has no good-run-list entry"
            ))
        })?;
    let pattern = Path::new(out_dir).join(gcd_pattern);
    let mut found: Vec<PathBuf> = expand_glob(fs, &pattern.to_string_lossy())?
        .into_iter()
        .filter(|p| fs.is_file(p))
        .collect();
    found.sort();
    if found.len() > 1 {
        debug!(run, ?found, "several GCD files, using the first");
    }
    found.into_iter().next().ok_or_else(|| {
        CycledagError::config(format!("no GCD file for run {run} matching {pattern:?}"))
    })
}
