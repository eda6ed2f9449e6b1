//! Parsers for PBS command output.

use crate::error::{SchedError, SchedResult};

/// Job states that count as active: exiting, held, queued, running, in
/// transit and waiting.
pub const ACTIVE_STATES: [&str; 6] = ["E", "H", "Q", "R", "T", "W"];

/// One job from `qstat -f` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QstatJob {
    pub job_id: String,
    pub name: String,
    /// Owner without the `@host` suffix.
    pub owner: String,
    pub state: String,
}

impl QstatJob {
    pub fn is_active(&self) -> bool {
        ACTIVE_STATES.contains(&self.state.as_str())
    }
}

/// Parse qsub output to extract the job id.
///
/// qsub prints the id alone, e.g. `12345.pbs-server` or `12345[].server`
/// for array jobs.
pub fn parse_qsub_output(output: &str) -> SchedResult<String> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(SchedError::Command {
            command: "qsub".to_string(),
            message: "qsub printed no job id".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

/// Parse `qstat -f -t` output into its job records.
///
/// ```text
/// Job Id: 12345.pbs-server
///     Job_Name = my_job
///     Job_Owner = alice@login1
///     job_state = R
/// ```
pub fn parse_qstat_full_output(output: &str) -> Vec<QstatJob> {
    let mut jobs = Vec::new();
    let mut current: Option<QstatJob> = None;

    for line in output.lines() {
        let line = line.trim();

        if let Some(id) = line.strip_prefix("Job Id:") {
            jobs.extend(current.take());
            current = Some(QstatJob {
                job_id: id.trim().to_string(),
                ..QstatJob::default()
            });
            continue;
        }

        let Some(job) = current.as_mut() else {
            continue;
        };

        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim();
            match key.trim() {
                "Job_Name" => job.name = value.to_string(),
                "Job_Owner" => {
                    job.owner = value.split('@').next().unwrap_or_default().to_string();
                }
                "job_state" => job.state = value.to_string(),
                _ => {}
            }
        }
    }

    jobs.extend(current);
    jobs
}

/// Whether `qmgr -c "list server"` output describes a PBS server.
pub fn is_pbs_server_listing(output: &str) -> bool {
    output.contains("pbs_version = ")
}

/// Whether `qstat -Q -f <queue>` output describes that queue.
pub fn describes_queue(output: &str, queue: &str) -> bool {
    output.starts_with(&format!("Queue: {queue}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_qsub_output() {
        assert_eq!(
            parse_qsub_output("12345.pbs-server\n").unwrap(),
            "12345.pbs-server"
        );
        assert_eq!(parse_qsub_output("678[].server").unwrap(), "678[].server");
        assert!(parse_qsub_output("  \n").is_err());
    }

    #[test]
    fn test_parse_qstat_full_output() {
        let output = r#"Job Id: 12345.pbs-server
    Job_Name = run.align
    Job_Owner = alice@login1.cluster
    job_state = R
    queue = batch

Job Id: 12346[1].pbs-server
    Job_Name = run.merge-1
    Job_Owner = bob@login1.cluster
    job_state = C
"#;
        let jobs = parse_qstat_full_output(output);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].job_id, "12345.pbs-server");
        assert_eq!(jobs[0].name, "run.align");
        assert_eq!(jobs[0].owner, "alice");
        assert!(jobs[0].is_active());
        assert_eq!(jobs[1].owner, "bob");
        assert!(!jobs[1].is_active());
    }

    #[test]
    fn test_parse_qstat_full_output_empty() {
        assert!(parse_qstat_full_output("").is_empty());
    }

    #[test]
    fn test_probe_markers() {
        assert!(is_pbs_server_listing(
            "Server pbs\n    server_state = Active\n    pbs_version = 19.1.3\n"
        ));
        assert!(!is_pbs_server_listing("qmgr: command not found"));
        assert!(describes_queue("Queue: batch\n    queue_type = Execution\n", "batch"));
        assert!(!describes_queue("qstat: Unknown queue", "batch"));
    }
}
