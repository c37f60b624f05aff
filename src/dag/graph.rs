// src/dag/graph.rs

//! The submission graph.
//!
//! Jobs are independent: the only edges run from every job into the
//! optional final node. The graph is still kept as a real
//! [`petgraph`] graph so that ordering and acyclicity are checked the same
//! way for every batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use blake3::Hasher;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::config::model::{Resources, Throttle};
use crate::dag::submit::{SubmitDescription, submit_file_name};
use crate::errors::{CycledagError, Result};
use crate::plan::descriptor::JobDescriptor;

/// Name of the node that runs after every job.
pub const FINAL_NODE: &str = "final";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNode {
    pub name: String,
    pub script: PathBuf,
    /// Batch ordinal; passed to the submit file as `$(run)`.
    pub run: usize,
    pub log_dir: PathBuf,
    /// Index into [`SubmissionGraph::submits`].
    pub submit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalNode {
    pub script: PathBuf,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AssembleOptions {
    /// `<script stem>_<config base name>`; prefixes node names.
    pub process_name: String,
    /// Root of the scheduler log directories.
    pub log_root: PathBuf,
    /// Keep all scheduler logs in `log_root` instead of 1000-job buckets.
    pub merge_files: bool,
    pub final_script: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SubmissionGraph {
    pub nodes: Vec<JobNode>,
    pub submits: Vec<SubmitDescription>,
    pub final_node: Option<FinalNode>,
    pub final_submit: Option<SubmitDescription>,
    pub throttle: Throttle,
    graph: DiGraph<String, ()>,
    fingerprint: String,
}

impl SubmissionGraph {
    /// blake3 over the ordered node names and scripts.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node names in a valid execution order.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            CycledagError::config(format!(
                "submission graph has a cycle at node '{}'",
                self.graph[cycle.node_id()]
            ))
        })?;
        Ok(order.into_iter().map(|idx| self.graph[idx].clone()).collect())
    }

    /// Direct parents of a node.
    pub fn parents_of(&self, name: &str) -> Vec<&str> {
        let Some(idx) = self.graph.node_indices().find(|&i| self.graph[i] == name) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, petgraph::Direction::Incoming)
            .map(|p| self.graph[p].as_str())
            .collect()
    }
}

/// `0000000-0000999` style bucket of the scheduler log directory.
pub fn log_bucket(run: usize) -> String {
    let k = run / 1000;
    format!("{k:04}000-{k:04}999")
}

pub fn assemble(jobs: &[JobDescriptor], throttle: &Throttle, opts: &AssembleOptions) -> Result<SubmissionGraph> {
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut submits: Vec<SubmitDescription> = Vec::new();
    let mut submit_index: HashMap<String, usize> = HashMap::new();
    let mut nodes = Vec::with_capacity(jobs.len());
    let mut indices: Vec<NodeIndex> = Vec::with_capacity(jobs.len());
    let mut hasher = Hasher::new();

    for job in jobs {
        let name = format!("{}_{}", opts.process_name, job.ordinal);
        let candidate = SubmitDescription::new(
            submit_file_name(submits.len()),
            opts.process_name.clone(),
            job.resources.clone(),
        );
        let key = candidate.render();
        let submit = match submit_index.get(&key) {
            Some(&i) => i,
            None => {
                submit_index.insert(key, submits.len());
                submits.push(candidate);
                submits.len() - 1
            }
        };

        let log_dir = if opts.merge_files {
            opts.log_root.clone()
        } else {
            opts.log_root.join(log_bucket(job.ordinal))
        };

        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(job.paths.job_script.to_string_lossy().as_bytes());
        hasher.update(b"\n");

        indices.push(graph.add_node(name.clone()));
        nodes.push(JobNode {
            name,
            script: job.paths.job_script.clone(),
            run: job.ordinal,
            log_dir,
            submit,
        });
    }

    let (final_node, final_submit) = match &opts.final_script {
        Some(script) => {
            let idx = graph.add_node(FINAL_NODE.to_string());
            for &parent in &indices {
                graph.add_edge(parent, idx, ());
            }
            hasher.update(FINAL_NODE.as_bytes());
            hasher.update(script.to_string_lossy().as_bytes());
            (
                Some(FinalNode {
                    script: script.clone(),
                    log_dir: opts.log_root.clone(),
                }),
                Some(SubmitDescription::new(
                    "Final.submit",
                    format!("{}_{FINAL_NODE}", opts.process_name),
                    Resources::default(),
                )),
            )
        }
        None => (None, None),
    };

    let fingerprint = hasher.finalize().to_hex().to_string();
    debug!(
        nodes = nodes.len(),
        submit_files = submits.len(),
        has_final = final_node.is_some(),
        %fingerprint,
        "assembled submission graph"
    );

    Ok(SubmissionGraph {
        nodes,
        submits,
        final_node,
        final_submit,
        throttle: throttle.clone(),
        graph,
        fingerprint,
    })
}

/// `<script stem>_<config base name>`.
pub fn process_name(script_name: &str, config_base_name: &str) -> String {
    let stem = script_name.strip_suffix(".py").unwrap_or(script_name);
    let base = config_base_name.strip_suffix(".yaml").unwrap_or(config_base_name);
    format!("{stem}_{base}")
}

/// Directory holding the scheduler logs of a DAGMan folder.
pub fn log_root(dagman_folder: &Path) -> PathBuf {
    dagman_folder.join("logs")
}
