//! PBS adapter: script rendering and the qsub/qstat/qdel protocol.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{
    BackendKind, DeletionRequest, JobFilter, ResourceManager, command_line, deletion_targets,
    probe, run_submit, script_identity,
};
use crate::directive::{Dependencies, JobDirective, MailEvent};
use crate::error::{SchedError, SchedResult};
use crate::pbs::{parser, templates};
use crate::runner::CommandRunner;

/// Pause between consecutive `qdel` calls. PBS servers drop requests that
/// arrive too quickly.
pub const DELETION_PAUSE: Duration = Duration::from_millis(250);

/// Adapter for PBS/Torque schedulers.
pub struct Pbs {
    runner: Arc<dyn CommandRunner>,
    deletion_pause: Duration,
}

impl Pbs {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            deletion_pause: DELETION_PAUSE,
        }
    }

    /// Override the pause between `qdel` calls.
    pub fn with_deletion_pause(mut self, pause: Duration) -> Self {
        self.deletion_pause = pause;
        self
    }

    /// PBS array job ids carry a bracketed index: `123[].server`.
    fn is_array_job_id(job_id: &str) -> bool {
        match job_id.find('[') {
            Some(open) if open > 0 => {
                !job_id[..open].contains(char::is_whitespace) && job_id[open..].contains(']')
            }
            _ => false,
        }
    }

    fn mail_code(event: MailEvent) -> char {
        match event {
            MailEvent::Begin => 'b',
            MailEvent::End => 'e',
            MailEvent::Fail => 'a',
        }
    }
}

#[async_trait]
impl ResourceManager for Pbs {
    fn kind(&self) -> BackendKind {
        BackendKind::Pbs
    }

    fn render_job_script(&self, directive: &JobDirective, command: &str) -> SchedResult<String> {
        let (name, working_directory) = script_identity(directive)?;
        let dependencies = self.encode_dependencies(&directive.dependencies)?;
        let mail_events = self.encode_mail_events(&directive.mail_events);
        Ok(templates::generate_pbs_script(
            directive,
            name,
            working_directory,
            &dependencies,
            &mail_events,
            command,
        ))
    }

    fn encode_dependencies(&self, dependencies: &Dependencies) -> SchedResult<String> {
        let clauses: Vec<String> = dependencies
            .iter()
            .map(|(state, job_ids)| {
                let (arrays, regular): (Vec<&str>, Vec<&str>) = job_ids
                    .iter()
                    .map(String::as_str)
                    .partition(|id| Self::is_array_job_id(id));

                let mut halves = Vec::with_capacity(2);
                if !arrays.is_empty() {
                    halves.push(format!("after{state}array:{}", arrays.join(":")));
                }
                if !regular.is_empty() {
                    halves.push(format!("after{state}:{}", regular.join(":")));
                }
                halves.join(",")
            })
            .collect();
        Ok(clauses.join(","))
    }

    fn encode_mail_events(&self, events: &[MailEvent]) -> String {
        let mut codes: Vec<char> = events.iter().map(|e| Self::mail_code(*e)).collect();
        codes.sort_unstable();
        codes.dedup();
        codes.into_iter().collect()
    }

    fn array_index_variable(&self) -> &'static str {
        "PBS_ARRAYID"
    }

    fn cancel_script(&self, job_ids: &[String]) -> String {
        let mut script = String::from("#!/bin/sh\n\n");
        for job_id in job_ids {
            script.push_str(&format!("qdel {job_id}; sleep 0.25\n"));
        }
        script
    }

    async fn is_installed(&self) -> bool {
        probe(self.runner.as_ref(), &command_line(["qmgr", "-c", "list server"]))
            .await
            .is_some_and(|output| parser::is_pbs_server_listing(&output))
    }

    async fn validate_destination(&self, destination: &str) -> bool {
        probe(
            self.runner.as_ref(),
            &command_line(["qstat", "-Q", "-f", destination]),
        )
        .await
        .is_some_and(|output| parser::describes_queue(&output, destination))
    }

    async fn submit(&self, script_path: &Path, hold: bool) -> SchedResult<String> {
        let mut argv = command_line(["qsub"]);
        if hold {
            argv.push("-h".into());
        }
        argv.push(script_path.display().to_string());

        let output = run_submit(self.runner.as_ref(), argv).await?;
        let job_id = parser::parse_qsub_output(&output)?;
        tracing::info!("Submitted {} as {job_id}", script_path.display());
        Ok(job_id)
    }

    async fn get_active_job_ids(&self, filter: &JobFilter) -> SchedResult<BTreeSet<String>> {
        let argv = command_line(["qstat", "-f", "-t"]);
        let output = self.runner.run(&argv).await?;
        if !output.success() {
            return Err(SchedError::Command {
                command: argv.join(" "),
                message: output.combined().trim_end().to_string(),
            });
        }

        let jobs: BTreeSet<String> = parser::parse_qstat_full_output(&output.stdout)
            .into_iter()
            .filter(|job| job.is_active() && filter.matches(&job.job_id, &job.name, &job.owner))
            .map(|job| job.job_id)
            .collect();

        if jobs.is_empty() {
            tracing::debug!("No active jobs found.");
        } else {
            tracing::debug!("Found {} active jobs", jobs.len());
        }
        Ok(jobs)
    }

    async fn delete_jobs(&self, request: &DeletionRequest) -> SchedResult<BTreeSet<String>> {
        let targets = deletion_targets(self, request).await?;
        if request.dry_run {
            return Ok(targets);
        }

        for (n, target) in targets.iter().enumerate() {
            if n > 0 {
                tokio::time::sleep(self.deletion_pause).await;
            }
            let argv = command_line(["qdel", target.as_str()]);
            let output = self.runner.run(&argv).await?;
            if !output.success() {
                return Err(SchedError::Deletion {
                    exit_code: output.exit_code,
                    output: output.combined(),
                    argv,
                    job_ids: vec![target.clone()],
                });
            }
            tracing::info!("Deleted job {target}");
        }

        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::DependencyState;
    use crate::runner::CommandOutput;
    use crate::runner::testing::ScriptedRunner;

    const QSTAT: &str = "Job Id: 10.server
    Job_Name = run.1
    Job_Owner = alice@login
    job_state = Q

Job Id: 11[].server
    Job_Name = run.2
    Job_Owner = alice@login
    job_state = R

Job Id: 12.server
    Job_Name = other
    Job_Owner = bob@login
    job_state = H

Job Id: 9.server
    Job_Name = run.0
    Job_Owner = alice@login
    job_state = C
";

    fn pbs(runner: &Arc<ScriptedRunner>) -> Pbs {
        Pbs::new(runner.clone()).with_deletion_pause(Duration::ZERO)
    }

    #[test]
    fn test_encode_dependencies_splits_arrays() {
        let pbs = pbs(&Arc::new(ScriptedRunner::new()));
        let mut deps = Dependencies::new();
        deps.extend(DependencyState::Ok, ["123", "456[]"]);
        assert_eq!(
            pbs.encode_dependencies(&deps).unwrap(),
            "afterokarray:456[],afterok:123"
        );

        deps.insert(DependencyState::Any, "7.server");
        deps.insert(DependencyState::Start, "8.server");
        assert_eq!(
            pbs.encode_dependencies(&deps).unwrap(),
            "afterany:7.server,afterokarray:456[],afterok:123,afterstart:8.server"
        );
    }

    #[test]
    fn test_array_job_id_detection() {
        assert!(Pbs::is_array_job_id("456[].server"));
        assert!(Pbs::is_array_job_id("456[3]"));
        assert!(!Pbs::is_array_job_id("456.server"));
        assert!(!Pbs::is_array_job_id("[]"));
    }

    #[test]
    fn test_mail_events() {
        let pbs = pbs(&Arc::new(ScriptedRunner::new()));
        assert_eq!(
            pbs.encode_mail_events(&[MailEvent::Fail, MailEvent::Begin, MailEvent::End]),
            "abe"
        );
        assert_eq!(pbs.encode_mail_events(&[]), "");
    }

    #[test]
    fn test_array_wrapper_and_cancel_script() {
        let pbs = pbs(&Arc::new(ScriptedRunner::new()));
        assert_eq!(
            pbs.wrap_array_command(2, "echo b"),
            "if [ \"$PBS_ARRAYID\" = \"2\" ]; then\n    echo b\nfi\n"
        );
        assert_eq!(
            pbs.cancel_script(&["1.s".into(), "2.s".into()]),
            "#!/bin/sh\n\nqdel 1.s; sleep 0.25\nqdel 2.s; sleep 0.25\n"
        );
    }

    #[test]
    fn test_render_requires_identity() {
        let pbs = pbs(&Arc::new(ScriptedRunner::new()));
        let err = pbs
            .render_job_script(&JobDirective::default(), "true")
            .unwrap_err();
        assert!(matches!(err, SchedError::Value(_)));
    }

    #[tokio::test]
    async fn test_submit_with_hold() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push("qsub", CommandOutput::ok("77.server\n"));
        let job_id = pbs(&runner)
            .submit(Path::new("/tmp/x/.drmr/a.pbs"), true)
            .await
            .unwrap();
        assert_eq!(job_id, "77.server");
        assert_eq!(
            runner.calls(),
            vec![command_line(["qsub", "-h", "/tmp/x/.drmr/a.pbs"])]
        );
    }

    #[tokio::test]
    async fn test_submit_failure_carries_command() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push("qsub", CommandOutput::failed(2, "qsub: Unknown queue\n"));
        let err = pbs(&runner)
            .submit(Path::new("/tmp/a.pbs"), false)
            .await
            .unwrap_err();
        match err {
            SchedError::Submission {
                exit_code,
                argv,
                output,
            } => {
                assert_eq!(exit_code, Some(2));
                assert_eq!(argv, command_line(["qsub", "/tmp/a.pbs"]));
                assert!(output.contains("Unknown queue"));
            }
            other => panic!("expected a submission error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probes() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .push("qmgr", CommandOutput::ok("    pbs_version = 19.1.3\n"))
            .push("qstat", CommandOutput::ok("Queue: batch\n"))
            .push("qstat", CommandOutput::failed(1, "Unknown queue"));
        let pbs = pbs(&runner);
        assert!(pbs.is_installed().await);
        assert!(!pbs.is_installed().await);
        assert!(pbs.validate_destination("batch").await);
        assert!(!pbs.validate_destination("nope").await);
    }

    #[tokio::test]
    async fn test_active_jobs_filtering() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond_with("qstat", |_| CommandOutput::ok(QSTAT));
        let pbs = pbs(&runner);

        let all = pbs
            .get_active_job_ids(&JobFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let filter = JobFilter {
            name: Some("run".into()),
            owner: Some("alice".into()),
            ..JobFilter::default()
        };
        let mine = pbs.get_active_job_ids(&filter).await.unwrap();
        assert_eq!(mine, ["10.server", "11[].server"].map(String::from).into());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_one_at_a_time() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .respond_with("qstat", |_| CommandOutput::ok(QSTAT))
            .respond_with("qdel", |_| CommandOutput::ok(""));
        let request = DeletionRequest {
            filter: JobFilter {
                ids: ["5.server".to_string()].into(),
                owner: Some("bob".into()),
                ..JobFilter::default()
            },
            dry_run: false,
        };

        let deleted = Pbs::new(runner.clone())
            .delete_jobs(&request)
            .await
            .unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(runner.calls_to("qdel"), vec![command_line(["qdel", "5.server"])]);
    }

    #[tokio::test]
    async fn test_delete_failure_names_target() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .respond_with("qstat", |_| CommandOutput::ok(""))
            .push("qdel", CommandOutput::failed(1, "qdel: Unknown Job Id 5.server"));
        let request = DeletionRequest {
            filter: JobFilter {
                ids: ["5.server".to_string()].into(),
                ..JobFilter::default()
            },
            dry_run: false,
        };
        let err = pbs(&runner).delete_jobs(&request).await.unwrap_err();
        match err {
            SchedError::Deletion { job_ids, .. } => assert_eq!(job_ids, vec!["5.server"]),
            other => panic!("expected a deletion error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_nothing_issues_no_cancellation() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond_with("qstat", |_| CommandOutput::ok(QSTAT));
        let pbs = pbs(&runner);

        let empty = pbs.delete_jobs(&DeletionRequest::default()).await.unwrap();
        assert!(empty.is_empty());
        assert!(runner.calls().is_empty());

        let request = DeletionRequest {
            filter: JobFilter {
                name: Some("no-such-job".into()),
                ..JobFilter::default()
            },
            dry_run: false,
        };
        assert!(pbs.delete_jobs(&request).await.unwrap().is_empty());
        assert!(runner.calls_to("qdel").is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_deletes_nothing() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond_with("qstat", |_| CommandOutput::ok(QSTAT));
        let request = DeletionRequest {
            filter: JobFilter {
                owner: Some("alice".into()),
                ..JobFilter::default()
            },
            dry_run: true,
        };
        let targets = pbs(&runner).delete_jobs(&request).await.unwrap();
        assert_eq!(targets.len(), 2);
        assert!(runner.calls_to("qdel").is_empty());
    }
}
