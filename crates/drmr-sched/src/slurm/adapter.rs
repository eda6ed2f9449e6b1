//! SLURM adapter: script rendering and the sbatch/squeue/scancel protocol.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{
    BackendKind, DeletionRequest, JobFilter, ResourceManager, command_line, deletion_targets,
    probe, run_submit, script_identity,
};
use crate::directive::{Dependencies, DependencyState, JobDirective, MailEvent};
use crate::error::{SchedError, SchedResult};
use crate::runner::CommandRunner;
use crate::slurm::{parser, templates};

/// Adapter for SLURM schedulers.
pub struct Slurm {
    runner: Arc<dyn CommandRunner>,
}

impl Slurm {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ResourceManager for Slurm {
    fn kind(&self) -> BackendKind {
        BackendKind::Slurm
    }

    fn render_job_script(&self, directive: &JobDirective, command: &str) -> SchedResult<String> {
        let (name, working_directory) = script_identity(directive)?;
        let dependencies = self.encode_dependencies(&directive.dependencies)?;
        let mail_events = self.encode_mail_events(&directive.mail_events);
        Ok(templates::generate_batch_script(
            directive,
            name,
            working_directory,
            &dependencies,
            &mail_events,
            command,
        ))
    }

    fn encode_dependencies(&self, dependencies: &Dependencies) -> SchedResult<String> {
        let clauses = dependencies
            .iter()
            .map(|(state, job_ids)| {
                if state == DependencyState::Start {
                    return Err(SchedError::Value(format!(
                        "Unsupported dependency state: {state}"
                    )));
                }
                let ids: Vec<&str> = job_ids.iter().map(String::as_str).collect();
                Ok(format!("after{state}:{}", ids.join(":")))
            })
            .collect::<SchedResult<Vec<_>>>()?;
        Ok(clauses.join(","))
    }

    fn encode_mail_events(&self, events: &[MailEvent]) -> String {
        let mut names: Vec<&str> = events.iter().map(MailEvent::as_str).collect();
        names.sort_unstable();
        names.dedup();
        names.join(",")
    }

    fn array_index_variable(&self) -> &'static str {
        "SLURM_ARRAY_TASK_ID"
    }

    fn cancel_script(&self, job_ids: &[String]) -> String {
        let mut script = String::from("#!/bin/sh\n\n");
        for job_id in job_ids {
            script.push_str(&format!("scancel {job_id}\n"));
        }
        script
    }

    async fn is_installed(&self) -> bool {
        probe(self.runner.as_ref(), &command_line(["scontrol", "version"]))
            .await
            .is_some_and(|output| parser::is_slurm_version(&output))
    }

    async fn validate_destination(&self, destination: &str) -> bool {
        probe(
            self.runner.as_ref(),
            &command_line(["scontrol", "show", "partition", destination]),
        )
        .await
        .is_some_and(|output| parser::describes_partition(&output, destination))
    }

    async fn submit(&self, script_path: &Path, hold: bool) -> SchedResult<String> {
        let mut argv = command_line(["sbatch", "--parsable"]);
        if hold {
            argv.push("--hold".into());
        }
        argv.push(script_path.display().to_string());

        let output = run_submit(self.runner.as_ref(), argv).await?;
        let job_id = parser::parse_sbatch_output(&output)?;
        tracing::info!("Submitted {} as {job_id}", script_path.display());
        Ok(job_id)
    }

    async fn get_active_job_ids(&self, filter: &JobFilter) -> SchedResult<BTreeSet<String>> {
        let argv = command_line([
            "squeue".to_string(),
            "-r".to_string(),
            "--format=%A,%j,%u".to_string(),
            format!("--states={}", parser::ACTIVE_STATES),
        ]);
        let output = self.runner.run(&argv).await?;
        if !output.success() {
            return Err(SchedError::Command {
                command: argv.join(" "),
                message: output.combined().trim_end().to_string(),
            });
        }

        let jobs: BTreeSet<String> = parser::parse_squeue_output(&output.stdout)
            .into_iter()
            .filter(|job| filter.matches(&job.job_id, &job.name, &job.owner))
            .map(|job| job.job_id)
            .collect();

        tracing::debug!("Found {} active jobs", jobs.len());
        Ok(jobs)
    }

    async fn delete_jobs(&self, request: &DeletionRequest) -> SchedResult<BTreeSet<String>> {
        let targets = deletion_targets(self, request).await?;
        if request.dry_run || targets.is_empty() {
            return Ok(targets);
        }

        let mut argv = command_line(["scancel"]);
        argv.extend(targets.iter().cloned());
        let output = self.runner.run(&argv).await?;
        if !output.success() {
            return Err(SchedError::Deletion {
                exit_code: output.exit_code,
                output: output.combined(),
                argv,
                job_ids: targets.into_iter().collect(),
            });
        }

        tracing::info!("Deleted {} jobs", targets.len());
        Ok(targets)
    }
}
