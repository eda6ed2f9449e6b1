//! Submission orchestrator: walks the job graph and submits every job.
//!
//! Jobs are submitted in topological order, so every prerequisite already has
//! a real scheduler id by the time a dependent job's script is rendered.
//! After the pipeline's own jobs, two sentinel jobs are submitted: a success
//! job depending (`ok`) on all of them, and a finish job depending (`any`) on
//! all of them. Downstream pipelines should depend on the success job.
//!
//! `<run>.cancel` lists every accepted job, sentinels included. When a
//! submission fails partway, it is still written for the jobs already queued.

use std::cell::OnceCell;
use std::path::{Path, PathBuf};

use petgraph::graph::NodeIndex;
use rustc_hash::{FxHashMap, FxHashSet};
use uuid::Uuid;

use crate::backend::ResourceManager;
use crate::directive::{
    DependencyState, Dependencies, JobDirective, MailEvent, control_directory_for,
};
use crate::error::{SchedError, SchedResult};
use crate::graph::{JobGraph, JobNode};
use crate::script::parse_script;

/// Time limit of the sentinel jobs.
const COMPLETION_TIME_LIMIT: &str = "00:15:00";
/// Memory, in MB, of the sentinel jobs.
const COMPLETION_MEMORY_MB: &str = "1000";

/// Options for one submission run.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Run name; job names and sentinel files derive from it. Generated when absent.
    pub job_name: Option<String>,
    /// Base for relative job working directories.
    pub working_directory: PathBuf,
    /// Submit jobs held, for release by hand.
    pub start_held: bool,
    /// Mail on END and FAIL of the finish job.
    pub mail_at_finish: bool,
    /// Concurrency limit for array jobs.
    pub max_concurrent: Option<u32>,
    /// External job ids the first jobs wait for.
    pub wait_for: Vec<String>,
    /// Submit the success and finish sentinel jobs.
    pub completion_jobs: bool,
    /// Python virtual environment to activate in every job.
    pub virtual_env: Option<PathBuf>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            job_name: None,
            working_directory: PathBuf::from("."),
            start_held: false,
            mail_at_finish: false,
            max_concurrent: None,
            wait_for: Vec::new(),
            completion_jobs: true,
            virtual_env: std::env::var_os("VIRTUAL_ENV").map(PathBuf::from),
        }
    }
}

/// A job written to disk and handed to the scheduler.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_name: String,
    /// Absolute `<working_directory>/.drmr`.
    pub control_directory: PathBuf,
    pub script_path: PathBuf,
    submitted_id: OnceCell<String>,
}

impl JobRecord {
    pub fn new(job_name: String, control_directory: PathBuf, script_path: PathBuf) -> Self {
        Self {
            job_name,
            control_directory,
            script_path,
            submitted_id: OnceCell::new(),
        }
    }

    /// The scheduler's id, once submitted.
    pub fn submitted_id(&self) -> Option<&str> {
        self.submitted_id.get().map(String::as_str)
    }

    pub fn is_pending(&self) -> bool {
        self.submitted_id.get().is_none()
    }

    /// Record the scheduler's id. A second call is an error.
    pub fn mark_submitted(&self, job_id: String) -> SchedResult<()> {
        self.submitted_id.set(job_id).map_err(|id| {
            SchedError::Internal(format!(
                "Job {} was already submitted; refusing to record {id}",
                self.job_name
            ))
        })
    }
}

/// Outcome of a submission run.
#[derive(Debug, Clone)]
pub struct SubmissionReport {
    pub run_name: String,
    /// The pipeline's jobs in submission order.
    pub records: Vec<JobRecord>,
    pub cancel_script: PathBuf,
    /// The id downstream work should depend on.
    pub success_job_id: Option<String>,
    pub finish_job_id: Option<String>,
}

impl SubmissionReport {
    /// Scheduler ids of the pipeline's jobs in submission order.
    pub fn job_ids(&self) -> Vec<String> {
        self.records
            .iter()
            .filter_map(|r| r.submitted_id().map(String::from))
            .collect()
    }
}

/// Ids of the two sentinel jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionJobs {
    pub success_job_id: String,
    pub finish_job_id: String,
}

/// Drives one resource manager through a pipeline submission.
pub struct Submitter<'a> {
    manager: &'a dyn ResourceManager,
    defaults: JobDirective,
    options: SubmitOptions,
}

impl<'a> Submitter<'a> {
    /// `defaults` applies to every job that does not ask for `default`.
    pub fn new(
        manager: &'a dyn ResourceManager,
        defaults: JobDirective,
        options: SubmitOptions,
    ) -> Self {
        Self {
            manager,
            defaults,
            options,
        }
    }

    /// Parse a pipeline script and submit it.
    pub async fn submit_script(&self, script: &str) -> SchedResult<SubmissionReport> {
        let events = parse_script(script)?;
        let graph = JobGraph::build(&events, self.options.max_concurrent)?;
        self.submit_graph(&graph).await
    }

    /// Submit every job in the graph, then the sentinels and the canceller.
    pub async fn submit_graph(&self, graph: &JobGraph) -> SchedResult<SubmissionReport> {
        if graph.is_empty() {
            return Err(SchedError::Value("The script contains no commands".into()));
        }
        if !self.manager.is_installed().await {
            return Err(SchedError::Configuration(format!(
                "{} is not installed or not usable.",
                self.manager.name()
            )));
        }

        let run_name = self
            .options
            .job_name
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let base_directory = std::path::absolute(&self.options.working_directory)?;

        let mut records = Vec::with_capacity(graph.len());
        let submitted = self
            .submit_jobs(graph, &run_name, &base_directory, &mut records)
            .await;

        let job_ids: Vec<String> = records
            .iter()
            .filter_map(|r| r.submitted_id().map(String::from))
            .collect();
        let control_directory = control_directory_for(&base_directory);

        if let Err(e) = submitted {
            if !job_ids.is_empty() {
                self.salvage_cancel_script(&control_directory, &run_name, &job_ids)
                    .await;
            }
            return Err(e);
        }

        let cancel_script = self
            .write_cancel_script(&control_directory, &run_name, &job_ids)
            .await?;

        let mut report = SubmissionReport {
            run_name: run_name.clone(),
            records,
            cancel_script,
            success_job_id: None,
            finish_job_id: None,
        };

        if self.options.completion_jobs {
            let mut common = self.defaults.clone();
            common.job_name = Some(run_name.clone());
            common.working_directory = Some(base_directory);
            self.push_virtual_env(&mut common);

            let completion = self
                .submit_completion_jobs(&common, &job_ids, self.options.mail_at_finish)
                .await?;

            let mut cancel_ids = job_ids;
            cancel_ids.push(completion.success_job_id.clone());
            cancel_ids.push(completion.finish_job_id.clone());
            self.write_cancel_script(&control_directory, &run_name, &cancel_ids)
                .await?;

            report.success_job_id = Some(completion.success_job_id);
            report.finish_job_id = Some(completion.finish_job_id);
        }

        Ok(report)
    }

    /// Submit the pipeline's jobs in topological order, appending each
    /// accepted job to `records`.
    async fn submit_jobs(
        &self,
        graph: &JobGraph,
        run_name: &str,
        base_directory: &Path,
        records: &mut Vec<JobRecord>,
    ) -> SchedResult<()> {
        let mut resolved: FxHashMap<NodeIndex, String> = FxHashMap::default();
        let mut names: FxHashSet<String> = FxHashSet::default();
        if self.options.completion_jobs {
            names.insert(format!("{run_name}.success"));
            names.insert(format!("{run_name}.finish"));
        }

        for (n, idx) in graph.submission_order()?.into_iter().enumerate() {
            let node = graph
                .node(idx)
                .ok_or_else(|| SchedError::Internal(format!("Missing graph node {idx:?}")))?;

            let mut directive = self.job_directive(node, base_directory)?;
            let job_name = directive
                .job_name
                .get_or_insert_with(|| format!("{run_name}.{}", n + 1))
                .clone();
            if !names.insert(job_name.clone()) {
                return Err(SchedError::Value(format!(
                    "Job name {job_name} is used more than once"
                )));
            }

            for (state, prerequisite) in graph.prerequisites(idx) {
                let job_id = resolved.get(&prerequisite).ok_or_else(|| {
                    SchedError::Internal(format!(
                        "Job {job_name} depends on a job that has not been submitted"
                    ))
                })?;
                directive.dependencies.insert(state, job_id.clone());
            }
            if graph.is_root(idx) && !self.options.wait_for.is_empty() {
                directive
                    .dependencies
                    .extend(DependencyState::Ok, self.options.wait_for.iter().cloned());
            }

            if let Some(label) = &node.label {
                tracing::debug!("Job {job_name} is labelled {label:?}");
            }

            let command = self.command_text(node);
            let record = self.write_job_script(&directive, &command).await?;
            let job_id = self
                .manager
                .submit(&record.script_path, self.options.start_held)
                .await?;
            tracing::info!("Submitted job {job_name} as {job_id}");
            record.mark_submitted(job_id.clone())?;

            resolved.insert(idx, job_id);
            records.push(record);
        }

        Ok(())
    }

    /// After a failed run, leave a canceller for the jobs the scheduler
    /// already accepted.
    async fn salvage_cancel_script(
        &self,
        control_directory: &Path,
        run_name: &str,
        job_ids: &[String],
    ) {
        let submitted = job_ids.join(" ");
        match self
            .write_cancel_script(control_directory, run_name, job_ids)
            .await
        {
            Ok(path) => tracing::warn!(
                "Submission stopped after jobs {submitted}; remove them with {}",
                path.display()
            ),
            Err(e) => tracing::warn!(
                "Submission stopped after jobs {submitted}; could not write a canceller: {e}"
            ),
        }
    }

    /// Submit the success and finish sentinel jobs for `job_ids`.
    ///
    /// `common` supplies the run name, working directory and any shared
    /// options such as account or destination.
    pub async fn submit_completion_jobs(
        &self,
        common: &JobDirective,
        job_ids: &[String],
        mail_at_finish: bool,
    ) -> SchedResult<CompletionJobs> {
        if job_ids.is_empty() {
            return Err(SchedError::Value(
                "You did not supply a list of job IDs to wait for.".into(),
            ));
        }
        let run_name = common
            .job_name
            .as_deref()
            .ok_or_else(|| SchedError::Value("Completion jobs need a job_name".into()))?;
        let working_directory = common.working_directory.as_deref().ok_or_else(|| {
            SchedError::Value("Completion jobs need a working_directory".into())
        })?;
        let control_directory = control_directory_for(working_directory);

        let success = self.sentinel(
            common,
            format!("{run_name}.success"),
            DependencyState::Ok,
            job_ids,
        )?;
        let record = self
            .write_job_script(
                &success,
                &format!("touch {}/{run_name}.success", control_directory.display()),
            )
            .await?;
        let success_job_id = self.manager.submit(&record.script_path, false).await?;
        tracing::info!("Submitted success job as {success_job_id}");

        let mut finish = self.sentinel(
            common,
            format!("{run_name}.finish"),
            DependencyState::Any,
            job_ids,
        )?;
        if mail_at_finish {
            finish.mail_events = vec![MailEvent::End, MailEvent::Fail];
        }
        let record = self
            .write_job_script(
                &finish,
                &format!("touch {}/{run_name}.finished", control_directory.display()),
            )
            .await?;
        let finish_job_id = self
            .manager
            .submit(&record.script_path, false)
            .await
            .inspect_err(|_| {
                tracing::warn!(
                    "Finish job was not submitted; success job {success_job_id} is queued"
                )
            })?;
        tracing::info!("Submitted finish job as {finish_job_id}");

        Ok(CompletionJobs {
            success_job_id,
            finish_job_id,
        })
    }

    fn sentinel(
        &self,
        common: &JobDirective,
        job_name: String,
        state: DependencyState,
        job_ids: &[String],
    ) -> SchedResult<JobDirective> {
        let mut sentinel = JobDirective::default();
        sentinel.set("time_limit", COMPLETION_TIME_LIMIT)?;
        sentinel.set("processors", "1")?;
        sentinel.set("processor_memory", COMPLETION_MEMORY_MB)?;
        sentinel.set("memory", COMPLETION_MEMORY_MB)?;
        sentinel.job_name = Some(job_name);

        let mut directive = common.merged(&sentinel);
        directive.dependencies = Dependencies::new();
        directive
            .dependencies
            .extend(state, job_ids.iter().cloned());
        directive.array_control = None;
        Ok(directive)
    }

    /// The directive in effect for a node, with an absolute working directory.
    fn job_directive(&self, node: &JobNode, base_directory: &Path) -> SchedResult<JobDirective> {
        let mut directive = if node.use_defaults {
            self.defaults.merged(&node.directive)
        } else {
            node.directive.clone()
        };

        let working_directory = match directive.working_directory.take() {
            Some(dir) => std::path::absolute(base_directory.join(dir))?,
            None => base_directory.to_path_buf(),
        };
        directive.working_directory = Some(working_directory);
        directive.array_control = node.array_control;
        self.push_virtual_env(&mut directive);
        Ok(directive)
    }

    fn push_virtual_env(&self, directive: &mut JobDirective) {
        if let Some(venv) = &self.options.virtual_env {
            directive
                .environment_setup
                .push(format!(". {}/bin/activate", venv.display()));
        }
    }

    /// Job body: the single command, or one index-guarded block per command.
    fn command_text(&self, node: &JobNode) -> String {
        if !node.is_array() {
            return node.commands.join("\n");
        }
        node.commands
            .iter()
            .zip(1u32..)
            .map(|(command, index)| self.manager.wrap_array_command(index, command))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render a job script into its control directory.
    async fn write_job_script(
        &self,
        directive: &JobDirective,
        command: &str,
    ) -> SchedResult<JobRecord> {
        let script = self.manager.render_job_script(directive, command)?;
        let job_name = directive
            .job_name
            .clone()
            .ok_or_else(|| SchedError::Internal("Rendered a job without a name".into()))?;
        let control_directory = directive
            .control_directory()
            .ok_or_else(|| SchedError::Internal(format!("Job {job_name} has no directory")))?;

        ensure_control_directory(&control_directory).await?;
        let script_path = control_directory.join(format!(
            "{job_name}.{}",
            self.manager.kind().extension()
        ));
        tracing::debug!("Writing {}:\n{script}", script_path.display());
        tokio::fs::write(&script_path, script).await?;

        Ok(JobRecord::new(job_name, control_directory, script_path))
    }

    async fn write_cancel_script(
        &self,
        control_directory: &Path,
        run_name: &str,
        job_ids: &[String],
    ) -> SchedResult<PathBuf> {
        ensure_control_directory(control_directory).await?;
        let path = control_directory.join(format!("{run_name}.cancel"));
        tracing::debug!("Writing canceller script {}", path.display());
        tokio::fs::write(&path, self.manager.cancel_script(job_ids)).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
        }

        Ok(path)
    }
}

/// Create a control directory, failing if a non-directory has its name.
pub async fn ensure_control_directory(path: &Path) -> SchedResult<()> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(SchedError::Value(format!(
            "{} exists and is not a directory",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(path).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
