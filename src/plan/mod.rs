// src/plan/mod.rs

//! Job expansion: from a validated config to an ordered list of job
//! descriptors.
//!
//! - [`cycler`] expands `cycler` blocks into parameter overlays.
//! - [`runs`] enumerates run units per dataset variant, using
//!   [`discover`], [`grl`], [`filter`] and [`corrupt`]. [`livetime`] adds
//!   the per-run livetime of experimental data.
//! - [`paths`] resolves the on-disk layout of each job.
//! - [`steps`] and [`descriptor`] assemble the per-job descriptors.
//! - [`batch`] drives all of the above for a whole config.

pub mod batch;
pub mod corrupt;
pub mod cycler;
pub mod descriptor;
pub mod discover;
pub mod filter;
pub mod grl;
pub mod livetime;
pub mod paths;
pub mod runs;
pub mod steps;

pub use batch::{BatchPlan, PlanOptions, VariantPlan, plan_batch};
pub use corrupt::{CorruptedInput, InputChecker, ReadableInputChecker};
pub use cycler::{CyclerSpec, ParameterOverlay};
pub use descriptor::{JobDescriptor, StepDescriptor};
pub use livetime::{GapsFile, RunLivetime};
pub use paths::{FolderVars, PathBundle, PathRegistry, folder_vars};
pub use runs::{EnumerateOptions, Enumeration, EnumerationReport, InputDiscoveryWarning, RunUnit, enumerate};
pub use steps::{ProcessingUnit, SegmentHandler, SegmentRegistry};
