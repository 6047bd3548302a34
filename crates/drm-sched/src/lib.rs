//! Batch-script templating and submission for cluster workload managers.
//!
//! This crate renders job scripts for PBS/Torque, Sun Grid Engine and SLURM
//! from one backend-agnostic description, submits them, and tracks
//! user-chosen job names so dependencies can be written symbolically. A
//! `bash` fallback runs jobs locally when no scheduler is installed.
//!
//! # Overview
//!
//! 1. **Describe**: a [`ResourceSpec`] (memory, workers, wall time,
//!    constraint) plus a script body or a [`JobArray`]
//! 2. **Render**: the backend's directive tables turn both into a script
//! 3. **Submit**: the script is handed to `qsub`/`sbatch`/`bash` and the id
//!    is recorded in a shared [`JobRegistry`]
//! 4. **Wait** (SLURM): a [`Waiter`] polls `sacct` until jobs finish
//!
//! # Supported Schedulers
//!
//! | Scheduler | Submit | Arrays | Waiter |
//! |-----------|--------|--------|--------|
//! | PBS/Torque | qsub | yes | no |
//! | SGE | qsub | no | no |
//! | SLURM | sbatch | yes | sacct |
//! | Local | bash | yes | no |
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use drm_sched::{
//!     BackendConfig, JobRegistry, ResourceSpec, SchedulerKind, SubmitOptions, Submitter,
//!     SubmitterConfig, Waiter, backend_for,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = backend_for(SchedulerKind::detect(), &BackendConfig::from_env());
//!     let registry = Arc::new(JobRegistry::new());
//!     let submitter = Submitter::new(backend, registry, SubmitterConfig::new()).await?;
//!
//!     submitter
//!         .submit("make data", SubmitOptions::new().with_name("data"))
//!         .await?;
//!     let report = submitter
//!         .submit(
//!             "make report",
//!             SubmitOptions::new()
//!                 .with_hold("data")
//!                 .with_resource(ResourceSpec::new().with_memory_gb(4.0)),
//!         )
//!         .await?;
//!
//!     let mut waiter = Waiter::new(submitter.jobs());
//!     waiter.wait().await?;
//!     println!("failed: {:?}", waiter.unsuccessful_jobs());
//!     Ok(())
//! }
//! ```

pub mod array;
pub mod backend;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod resource;
pub mod runner;
pub mod submitter;
pub mod template;
pub mod waiter;

// Re-exports
pub use array::JobArray;
pub use backend::{
    Backend, BackendConfig, LocalBackend, PbsBackend, SchedulerKind, SgeBackend, SlurmBackend,
    backend_for,
};
pub use error::{DrmError, DrmResult};
pub use pipeline::{Pipeline, PipelineJob, WaitSettings};
pub use registry::{JobRegistry, Names};
pub use resource::{
    Constraint, MpiResourceSpec, Resource, ResourceSpec, ResourceVariant, format_walltime,
    parse_walltime,
};
pub use runner::{CommandRunner, MockRunner, SystemRunner};
pub use submitter::{JobBody, JobInfo, SubmitOptions, Submitter, SubmitterConfig};
pub use waiter::{
    AccountingRecord, JobOutcome, Waiter, parse_submit_time, process_start_time,
};
