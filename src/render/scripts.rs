// src/render/scripts.rs

//! Generated shell scripts and step files.

use std::fmt::Write as _;

use serde_yaml::Value;

use crate::errors::Result;
use crate::plan::batch::VariantStep;
use crate::plan::descriptor::{JobDescriptor, StepDescriptor};

/// Single-quote a string for bash.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Step configuration as YAML, read by the processing script at run time.
pub fn step_yaml(step: &VariantStep) -> Result<String> {
    Ok(serde_yaml::to_string(&Value::Mapping(step.config.clone()))?)
}

pub fn step_script(step: &StepDescriptor) -> Result<String> {
    step.template.render(&step.namespace)
}

/// The job wrapper: runs every step script in order, stops at the first
/// failure, prints per-step runtimes, removes intermediate outputs and
/// exits with the failing step's code.
pub fn wrapper_script(job: &JobDescriptor) -> String {
    let mut out = String::new();
    let steps_dir = job.paths.steps_dir.to_string_lossy();

    out.push_str("#!/bin/bash\n");
    let _ = writeln!(out, "# Job {} ({} steps)", job.id(), job.steps.len());
    out.push_str("\nSECONDS=0\ndeclare -a times\ntimes[0]=$SECONDS\nstep_counter=1\nJOB_RC=0\n");
    let _ = writeln!(out, "OUT_DIR={}\n", shell_quote(&steps_dir));

    for step in &job.steps {
        let script = step
            .script_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let _ = write!(
            out,
            "if [ $JOB_RC -eq 0 ]; then\n\
             \x20   echo\n\
             \x20   echo '==> Starting step {index:03} <=='\n\
             \x20   \"${{OUT_DIR}}/{script}\"\n\
             \x20   JOB_RC=$?\n\
             \x20   times[$step_counter]=$SECONDS\n\
             \x20   ((step_counter++))\n\
             fi\n\n",
            index = step.index,
        );
    }

    out.push_str(
        "if [ $JOB_RC -eq 0 ]; then\n\
         \x20   echo '==> Successfully processed all steps! <=='\n\
         else\n\
         \x20   echo \"==> Step $((step_counter - 2)) failed with exit code $JOB_RC <==\"\n\
         fi\n\n\
         echo 'Runtime for each processed step:'\n\
         for (( i=1; i<$step_counter; i++ )); do\n\
         \x20   printf \"    %-13s --> %8u s\\n\" \"Step $((i - 1))\" $(( ${times[$i]} - ${times[$i-1]} ))\n\
         done\n\
         printf \"    %13s --> %8u s\\n\" \"Total runtime\" $SECONDS\n\n",
    );

    let intermediates: Vec<&str> = job
        .steps
        .iter()
        .take(job.steps.len().saturating_sub(1))
        .filter_map(|s| s.namespace.get("final_out").and_then(Value::as_str))
        .collect();
    if !intermediates.is_empty() {
        out.push_str("echo 'Cleaning up intermediate files ...'\n");
        for path in intermediates {
            let _ = writeln!(out, "rm -f {}*", shell_quote(path));
        }
    }
    out.push_str(
        "if [ -d temp_step_files ] && [ -z \"$(find temp_step_files -type f)\" ]; then\n\
         \x20   rm -r temp_step_files\n\
         fi\n\n\
         exit $JOB_RC\n",
    );
    out
}
