// src/dag/writer.rs

//! Writing DAGMan artifacts.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::model::Throttle;
use crate::dag::graph::{FINAL_NODE, SubmissionGraph};
use crate::errors::Result;
use crate::fs::FileSystem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagmanFiles {
    pub folder: PathBuf,
    pub config: PathBuf,
    pub options: PathBuf,
    pub submits: Vec<PathBuf>,
    pub start_script: PathBuf,
}

/// `<processing_scratch>/<config_base_name>_NNNN`, first counter not on disk.
pub fn allocate_dagman_folder(fs: &dyn FileSystem, processing_scratch: &Path, config_base_name: &str) -> PathBuf {
    let mut counter = 0usize;
    loop {
        let candidate = processing_scratch.join(format!("{config_base_name}_{counter:04}"));
        if !fs.exists(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

pub fn render_config(throttle: &Throttle) -> String {
    let mut out = format!("DAGMAN_MAX_JOBS_SUBMITTED={}\n", throttle.max_jobs());
    if let Some(delay) = throttle.dagman_submit_delay {
        let _ = writeln!(out, "DAGMAN_SUBMIT_DELAY={delay}");
    }
    if let Some(scan) = throttle.dagman_scan_interval {
        let _ = writeln!(out, "DAGMAN_USER_LOG_SCAN_INTERVAL={scan}");
    }
    if let Some(submits) = throttle.dagman_submits_interval {
        let _ = writeln!(out, "DAGMAN_MAX_SUBMITS_PER_INTERVAL={submits}");
    }
    out
}

/// The DAG description: one `JOB`/`VARS` pair per node, then the final
/// node and its `PARENT ... CHILD` line.
pub fn render_options(graph: &SubmissionGraph, folder: &Path) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# fingerprint {}", graph.fingerprint());
    let _ = writeln!(out, "# jobs {}", graph.len());

    for node in &graph.nodes {
        let submit = folder.join(&graph.submits[node.submit].file_name);
        let _ = writeln!(out, "JOB {} {}", node.name, submit.display());
        let _ = writeln!(
            out,
            "VARS {} script_file=\"{}\" run=\"{}\" log_dir=\"{}\"",
            node.name,
            node.script.display(),
            node.run,
            node.log_dir.display()
        );
    }

    if let (Some(final_node), Some(submit)) = (&graph.final_node, &graph.final_submit) {
        let _ = writeln!(out, "JOB {FINAL_NODE} {}", folder.join(&submit.file_name).display());
        let _ = writeln!(
            out,
            "VARS {FINAL_NODE} script_file=\"{}\" run=\"{FINAL_NODE}\" log_dir=\"{}\"",
            final_node.script.display(),
            final_node.log_dir.display()
        );
        if !graph.nodes.is_empty() {
            let parents: Vec<&str> = graph.nodes.iter().map(|n| n.name.as_str()).collect();
            let _ = writeln!(out, "PARENT {} CHILD {FINAL_NODE}", parents.join(" "));
        }
    }
    out
}

/// Read the fingerprint header back from a `dagman.options` file.
pub fn read_fingerprint(options: &str) -> Option<&str> {
    options
        .lines()
        .find_map(|line| line.strip_prefix("# fingerprint "))
        .map(str::trim)
}

pub fn write_dagman_files(fs: &dyn FileSystem, graph: &SubmissionGraph, folder: &Path) -> Result<DagmanFiles> {
    fs.create_dir_all(folder)?;

    let config = folder.join("dagman.config");
    fs.write(&config, render_config(&graph.throttle).as_bytes())?;

    let mut submits = Vec::new();
    for submit in graph.submits.iter().chain(graph.final_submit.iter()) {
        let path = folder.join(&submit.file_name);
        fs.write(&path, submit.render().as_bytes())?;
        submits.push(path);
    }

    for node in &graph.nodes {
        fs.create_dir_all(&node.log_dir)?;
    }
    if let Some(final_node) = &graph.final_node {
        fs.create_dir_all(&final_node.log_dir)?;
    }

    let options = folder.join("dagman.options");
    fs.write(&options, render_options(graph, folder).as_bytes())?;

    let start_script = folder.join("start_dagman.sh");
    let cmd = format!(
        "condor_submit_dag -config {} {}\n",
        config.display(),
        options.display()
    );
    fs.write(&start_script, cmd.as_bytes())?;
    fs.set_executable(&start_script)?;

    info!(folder = ?folder, jobs = graph.len(), "wrote DAGMan files");
    Ok(DagmanFiles {
        folder: folder.to_path_buf(),
        config,
        options,
        submits,
        start_script,
    })
}
