// src/render/mod.rs

//! Rendering of a planned batch into files.
//!
//! [`render_batch`] is pure: it produces the full list of directories and
//! files so that template errors abort the batch before anything exists
//! on disk. [`write_rendered`] then performs the writes.

pub mod format;
pub mod scripts;
pub mod template;

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::errors::Result;
use crate::fs::FileSystem;
use crate::plan::batch::BatchPlan;

pub use template::JobTemplate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub path: PathBuf,
    pub contents: String,
    pub executable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RenderedBatch {
    pub dirs: Vec<PathBuf>,
    pub files: Vec<RenderedFile>,
    seen: HashSet<PathBuf>,
}

impl RenderedBatch {
    fn dir(&mut self, path: PathBuf) {
        if self.seen.insert(path.clone()) {
            self.dirs.push(path);
        }
    }

    fn file(&mut self, path: PathBuf, contents: String, executable: bool) {
        self.files.push(RenderedFile {
            path,
            contents,
            executable,
        });
    }
}

pub fn render_batch(plan: &BatchPlan) -> Result<RenderedBatch> {
    let mut out = RenderedBatch::default();

    for variant in &plan.variants {
        out.dir(variant.sub_process_dir.clone());
        for step in &variant.steps {
            out.file(step.yaml_path.clone(), scripts::step_yaml(step)?, false);
            if let Some(source) = &step.python_source {
                out.file(step.python_path.clone(), source.clone(), true);
            }
        }
    }

    for job in &plan.jobs {
        out.dir(job.paths.log_dir.clone());
        out.dir(job.paths.jobs_output.clone());
        out.dir(job.paths.output_folder.clone());
        out.dir(job.paths.steps_dir.clone());
        for step in &job.steps {
            out.file(step.script_path.clone(), scripts::step_script(step)?, true);
        }
        out.file(job.paths.job_script.clone(), scripts::wrapper_script(job), true);
    }

    debug!(dirs = out.dirs.len(), files = out.files.len(), "rendered batch");
    Ok(out)
}

pub fn write_rendered(fs: &dyn FileSystem, batch: &RenderedBatch) -> Result<()> {
    for dir in &batch.dirs {
        fs.create_dir_all(dir)?;
    }
    for file in &batch.files {
        fs.write(&file.path, file.contents.as_bytes())?;
        if file.executable {
            fs.set_executable(&file.path)?;
        }
    }
    info!(files = batch.files.len(), "wrote job files");
    Ok(())
}
