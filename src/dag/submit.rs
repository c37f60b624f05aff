// src/dag/submit.rs

//! HTCondor submit descriptions.
//!
//! Every node of the graph points at one submit file through
//! `$(script_file)` and `$(log_dir)`; jobs with identical resource
//! requests share a file.

use crate::config::model::Resources;

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitDescription {
    pub file_name: String,
    pub process_name: String,
    pub resources: Resources,
}

/// `OneJob.submit`, `OneJob_0001.submit`, ...
pub fn submit_file_name(index: usize) -> String {
    if index == 0 {
        "OneJob.submit".to_string()
    } else {
        format!("OneJob_{index:04}.submit")
    }
}

impl SubmitDescription {
    pub fn new(file_name: impl Into<String>, process_name: impl Into<String>, resources: Resources) -> Self {
        Self {
            file_name: file_name.into(),
            process_name: process_name.into(),
            resources,
        }
    }

    /// The `requirements = ...` expression, if any requirement applies.
    pub fn requirements(&self) -> Option<String> {
        let r = &self.resources;
        let mut terms = Vec::new();
        if r.only_sl6 == Some(true) {
            terms.push("(OpSysMajorVer =?= 6)".to_string());
        }
        if r.has_ssse3 == Some(true) {
            terms.push("(TARGET.has_ssse3)".to_string());
        }
        if r.has_avx2 == Some(true) {
            terms.push("(TARGET.has_avx2)".to_string());
        }
        if r.gpu_count() > 0 {
            if let Some(caps) = r.cuda_compute_capability.as_ref().filter(|c| !c.is_empty()) {
                let alternatives: Vec<String> = caps
                    .iter()
                    .map(|c| format!("( CUDACapability == {c:.1} )"))
                    .collect();
                terms.push(format!("({})", alternatives.join(" || ")));
            }
        }
        if terms.is_empty() {
            None
        } else {
            Some(terms.join(" && "))
        }
    }

    pub fn render(&self) -> String {
        let r = &self.resources;
        let mut lines = vec![
            format!("processname = $(run).{}", self.process_name),
            "executable = $(script_file)".to_string(),
            "getenv         = false".to_string(),
            "should_transfer_files = YES".to_string(),
            "when_to_transfer_output = ON_EXIT".to_string(),
            "output = $(log_dir)/$(processname).out".to_string(),
            "error = $(log_dir)/$(processname).err".to_string(),
            "log = $(log_dir)/$(processname).log".to_string(),
            "notification   = never".to_string(),
            "universe       = vanilla".to_string(),
        ];
        if let Some(gpus) = r.gpus {
            lines.push(format!("request_gpus = {gpus}"));
        }
        if let Some(memory) = &r.memory {
            lines.push(format!("request_memory = {memory}"));
        }
        if let Some(cpus) = r.cpus {
            lines.push(format!("request_cpus = {cpus}"));
        }
        if let Some(disk) = &r.disk {
            lines.push(format!("request_disk = {disk}"));
        }
        if let Some(req) = self.requirements() {
            lines.push(format!("requirements = {req}"));
        }
        lines.push("queue".to_string());

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}
