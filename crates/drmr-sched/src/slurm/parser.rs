//! Parsers for SLURM command output.

use crate::error::{SchedError, SchedResult};

/// Job states `squeue` is asked to list.
pub const ACTIVE_STATES: &str = "CONFIGURING,COMPLETING,PENDING,PREEMPTED,RUNNING,SUSPENDED";

/// One row of `squeue --format=%A,%j,%u` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqueueJob {
    pub job_id: String,
    pub name: String,
    pub owner: String,
}

/// Parse `sbatch --parsable` output to extract the job id.
///
/// The parsable format is `<id>` or `<id>;<cluster>`.
pub fn parse_sbatch_output(output: &str) -> SchedResult<String> {
    let job_id = output.trim().split(';').next().unwrap_or_default().trim();
    if job_id.is_empty() {
        return Err(SchedError::Command {
            command: "sbatch".to_string(),
            message: format!("Unexpected output format: {:?}", output.trim()),
        });
    }
    Ok(job_id.to_string())
}

/// Parse `squeue -r --format=%A,%j,%u` output, skipping the header.
///
/// ```text
/// JOBID,NAME,USER
/// 12345,run.align,alice
/// ```
pub fn parse_squeue_output(output: &str) -> Vec<SqueueJob> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            // Job names may contain commas; id and user never do.
            let (job_id, rest) = line.trim().split_once(',')?;
            let (name, owner) = rest.rsplit_once(',')?;
            Some(SqueueJob {
                job_id: job_id.to_string(),
                name: name.to_string(),
                owner: owner.to_string(),
            })
        })
        .collect()
}

/// Whether `scontrol version` output names Slurm.
pub fn is_slurm_version(output: &str) -> bool {
    output.contains("slurm")
}

/// Whether `scontrol show partition <p>` output describes that partition.
pub fn describes_partition(output: &str, partition: &str) -> bool {
    output.starts_with(&format!("PartitionName={partition}"))
}
