//! SLURM (Simple Linux Utility for Resource Management) support.
//!
//! Batch scripts carry `#SBATCH` directives; jobs are submitted with
//! `sbatch --parsable`, listed with `squeue` and cancelled with `scancel`.

mod adapter;
mod parser;
mod templates;

pub use adapter::Slurm;
pub use parser::{ACTIVE_STATES, SqueueJob};
