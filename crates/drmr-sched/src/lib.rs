//! drmr: run annotated shell pipelines on PBS and SLURM clusters
//!
//! This crate turns a plain shell script, annotated with `# drmr:` comments,
//! into a graph of batch jobs and submits them to the cluster's resource
//! manager with the right dependencies.
//!
//! # Overview
//!
//! A submission goes through four stages:
//! 1. **Parsing**: [`parse_script`] yields job, wait and label events plus commands
//! 2. **Graph**: [`JobGraph`] turns events into a DAG; `wait` makes a barrier
//! 3. **Rendering**: a [`ResourceManager`] writes one batch script per job
//! 4. **Submission**: [`Submitter`] submits in topological order, then writes a
//!    canceller script and submits the success and finish sentinel jobs
//!
//! # Supported Resource Managers
//!
//! | Resource manager | Commands | Script extension |
//! |------------------|----------|------------------|
//! | PBS/Torque | qsub, qstat, qdel, qmgr | `.pbs` |
//! | SLURM | sbatch, squeue, scancel, scontrol | `.slurm` |
//!
//! # Script Directives
//!
//! ```text
//! # drmr:label align
//! # drmr:job processors=4 memory=8g time_limit=4h
//! bwa mem ref.fa a.fq > a.sam
//! bwa mem ref.fa b.fq > b.sam
//! # drmr:wait
//! samtools merge all.bam a.sam b.sam
//! ```
//!
//! Several commands under one `job` become an array job. Everything after a
//! `wait` depends on everything declared before it.
//!
//! # Example: Submitting a Pipeline
//!
//! ```ignore
//! use std::sync::Arc;
//! use drmr_sched::{Config, SubmitOptions, Submitter, SystemRunner, resource_manager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runner = Arc::new(SystemRunner::new());
//!     let config = Config::default().load(None)?;
//!     let kind = config.resolve_resource_manager(runner.clone()).await?;
//!     let manager = resource_manager(kind, runner);
//!
//!     let defaults = config.job_defaults()?;
//!     let submitter = Submitter::new(manager.as_ref(), defaults, SubmitOptions::default());
//!     let script = std::fs::read_to_string("pipeline.sh")?;
//!     let report = submitter.submit_script(&script).await?;
//!     println!("Downstream jobs should depend on {:?}", report.success_job_id);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod directive;
pub mod error;
pub mod graph;
pub mod pbs;
pub mod runner;
pub mod script;
pub mod slurm;
pub mod submit;
pub mod units;

// Re-exports
pub use backend::{
    BackendKind, DeletionRequest, JobFilter, ResourceManager, guess_resource_manager,
    installed_backends, resource_manager,
};
pub use config::Config;
pub use directive::{
    ArrayControl, Dependencies, DependencyState, JobDirective, MailEvent, is_script_job_option,
};
pub use error::{SchedError, SchedResult};
pub use graph::{JobGraph, JobNode};
pub use pbs::Pbs;
pub use runner::{CommandOutput, CommandRunner, SystemRunner};
pub use script::{JobOptions, ScriptEvent, parse_script};
pub use slurm::Slurm;
pub use submit::{CompletionJobs, JobRecord, SubmissionReport, SubmitOptions, Submitter};
pub use units::{Memory, normalize_memory, normalize_time};
