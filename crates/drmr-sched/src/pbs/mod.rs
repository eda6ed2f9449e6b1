//! PBS (Portable Batch System) support.
//!
//! Covers PBS/Torque and PBS Pro: batch scripts with `#PBS` directives,
//! submission through `qsub`, job listing through `qstat` and cancellation
//! through `qdel`.

mod adapter;
mod parser;
mod templates;

pub use adapter::{DELETION_PAUSE, Pbs};
pub use parser::{ACTIVE_STATES, QstatJob};
