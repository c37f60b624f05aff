// src/dag/mod.rs

//! Submission graph assembly and DAGMan output.
//!
//! - [`graph`] turns job descriptors into a [`SubmissionGraph`].
//! - [`submit`] renders per-resource-request submit descriptions.
//! - [`writer`] writes `dagman.config`, `dagman.options`, the submit files
//!   and `start_dagman.sh`.

pub mod graph;
pub mod submit;
pub mod writer;

pub use graph::{AssembleOptions, JobNode, SubmissionGraph, assemble};
pub use submit::SubmitDescription;
pub use writer::{DagmanFiles, allocate_dagman_folder, write_dagman_files};
