//! The resource manager capability interface shared by every scheduler family.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::directive::{Dependencies, JobDirective, MailEvent};
use crate::error::{SchedError, SchedResult};
use crate::pbs::Pbs;
use crate::runner::CommandRunner;
use crate::slurm::Slurm;

/// Supported scheduler families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "PBS")]
    Pbs,
    Slurm,
}

impl BackendKind {
    /// Every family, in probing order.
    pub const ALL: [BackendKind; 2] = [BackendKind::Pbs, BackendKind::Slurm];

    /// Display name, as used in configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Pbs => "PBS",
            BackendKind::Slurm => "Slurm",
        }
    }

    /// Extension of generated job scripts.
    pub fn extension(&self) -> &'static str {
        match self {
            BackendKind::Pbs => "pbs",
            BackendKind::Slurm => "slurm",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                SchedError::Configuration(format!(
                    "Unsupported resource manager {s:?}; choose one of: {}",
                    BackendKind::ALL.map(|k| k.name()).join(", ")
                ))
            })
    }
}

/// Narrows the active job listing. Every supplied criterion must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    /// Only these job ids.
    pub ids: BTreeSet<String>,
    /// Job names containing this text.
    pub name: Option<String>,
    /// Jobs owned by this user.
    pub owner: Option<String>,
}

impl JobFilter {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.name.is_none() && self.owner.is_none()
    }

    pub fn matches(&self, id: &str, name: &str, owner: &str) -> bool {
        (self.ids.is_empty() || self.ids.contains(id))
            && self.name.as_deref().is_none_or(|n| name.contains(n))
            && self.owner.as_deref().is_none_or(|o| o == owner)
    }
}

/// What to cancel: the filter's explicit ids plus any active job it matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionRequest {
    pub filter: JobFilter,
    /// Only report what would be deleted.
    pub dry_run: bool,
}

impl DeletionRequest {
    /// Human-readable summary of a deletion.
    pub fn explain(&self, targets: &BTreeSet<String>) -> String {
        let mut message = String::from(if self.dry_run {
            "Would delete"
        } else {
            "Deleting"
        });
        if !targets.is_empty() {
            message.push_str(" these");
        }
        message.push_str(" jobs");
        if let Some(owner) = &self.filter.owner {
            message.push_str(&format!(" belonging to {owner}"));
        }
        if let Some(name) = &self.filter.name {
            message.push_str(&format!(" whose names match \"{name}\""));
        }
        if !targets.is_empty() {
            let ids: Vec<&str> = targets.iter().map(String::as_str).collect();
            message.push_str(&format!(": [{}]", ids.join(", ")));
        }
        message
    }
}

/// A scheduler family: script rendering plus its command-line protocol.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Render a complete batch script for one job.
    ///
    /// The directive must carry a job name and an absolute working directory.
    fn render_job_script(&self, directive: &JobDirective, command: &str) -> SchedResult<String>;

    /// Encode a dependency map in the scheduler's syntax.
    fn encode_dependencies(&self, dependencies: &Dependencies) -> SchedResult<String>;

    /// Encode mail events in the scheduler's syntax.
    fn encode_mail_events(&self, events: &[MailEvent]) -> String;

    /// Environment variable holding the array index inside a running job.
    fn array_index_variable(&self) -> &'static str;

    /// Wrap a command so it runs only under the given array index.
    fn wrap_array_command(&self, index: u32, command: &str) -> String {
        format!(
            "if [ \"${}\" = \"{index}\" ]; then\n    {command}\nfi\n",
            self.array_index_variable()
        )
    }

    /// Shell script that cancels the given jobs.
    fn cancel_script(&self, job_ids: &[String]) -> String;

    /// Probe the scheduler. Any failure means not installed.
    async fn is_installed(&self) -> bool;

    /// Whether the scheduler knows this queue or partition.
    async fn validate_destination(&self, destination: &str) -> bool;

    /// Submit a job script, optionally held, returning the scheduler's job id.
    async fn submit(&self, script_path: &Path, hold: bool) -> SchedResult<String>;

    /// Ids of queued, held, running or transitional jobs matching the filter.
    async fn get_active_job_ids(&self, filter: &JobFilter) -> SchedResult<BTreeSet<String>>;

    /// Cancel jobs, returning the ids targeted.
    async fn delete_jobs(&self, request: &DeletionRequest) -> SchedResult<BTreeSet<String>>;
}

/// Job name and absolute working directory a rendered script needs.
pub(crate) fn script_identity(directive: &JobDirective) -> SchedResult<(&str, &Path)> {
    let name = directive
        .job_name
        .as_deref()
        .ok_or_else(|| SchedError::Value("Job directive has no job_name".into()))?;
    let working_directory = directive
        .working_directory
        .as_deref()
        .filter(|path| path.is_absolute())
        .ok_or_else(|| {
            SchedError::Value(format!("Job {name} needs an absolute working_directory"))
        })?;
    Ok((name, working_directory))
}

/// Append the part of a batch script that follows the scheduler preamble.
pub(crate) fn push_script_body(
    script: &mut String,
    family: &str,
    directive: &JobDirective,
    command: &str,
) {
    if let Some(raw) = &directive.raw_preamble {
        script.push_str(raw);
        script.push('\n');
    }
    script.push_str(&format!("\n\n####  End {family} preamble\n\n"));

    if let Some(notes) = &directive.notes {
        script.push_str("####  Notes\n");
        script.push_str(notes);
        script.push('\n');
    }
    script.push('\n');

    if !directive.environment_setup.is_empty() {
        script.push_str("####  Environment setup\n");
        for line in &directive.environment_setup {
            script.push_str(line);
            script.push('\n');
        }
    }
    script.push('\n');

    script.push_str("####  Commands\n\n");
    script.push_str(command);
    if !command.ends_with('\n') {
        script.push('\n');
    }
}

/// Build an argv from string slices.
pub(crate) fn command_line<I, S>(words: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    words.into_iter().map(Into::into).collect()
}

/// Run a probe command, returning its combined output only when it succeeds.
pub(crate) async fn probe(runner: &dyn CommandRunner, argv: &[String]) -> Option<String> {
    match runner.run(argv).await {
        Ok(output) if output.success() => Some(output.combined()),
        Ok(output) => {
            tracing::debug!(
                "{} exited with {:?}: {}",
                argv.join(" "),
                output.exit_code,
                output.combined().trim_end()
            );
            None
        }
        Err(e) => {
            tracing::debug!("{} failed: {e}", argv.join(" "));
            None
        }
    }
}

/// Run a submit command, returning its stdout. A non-zero exit is a submission error.
pub(crate) async fn run_submit(
    runner: &dyn CommandRunner,
    argv: Vec<String>,
) -> SchedResult<String> {
    tracing::debug!("Submitting: {}", argv.join(" "));
    let output = runner.run(&argv).await?;
    if !output.success() {
        return Err(SchedError::Submission {
            exit_code: output.exit_code,
            output: output.combined(),
            argv,
        });
    }
    if !output.stderr.trim().is_empty() {
        tracing::warn!("{}: {}", argv.join(" "), output.stderr.trim_end());
    }
    Ok(output.stdout)
}

/// Resolve the ids a deletion request targets.
///
/// An empty filter targets nothing rather than every active job.
pub(crate) async fn deletion_targets<R>(
    manager: &R,
    request: &DeletionRequest,
) -> SchedResult<BTreeSet<String>>
where
    R: ResourceManager + ?Sized,
{
    if request.filter.is_empty() {
        tracing::warn!("No job ids, name or owner given; nothing to delete");
        return Ok(BTreeSet::new());
    }

    let mut targets = request.filter.ids.clone();
    targets.extend(manager.get_active_job_ids(&request.filter).await?);

    if !targets.is_empty() {
        if request.dry_run {
            tracing::info!("{}", request.explain(&targets));
        } else {
            tracing::debug!("{}", request.explain(&targets));
        }
    }

    Ok(targets)
}

/// Create the backend for a scheduler family.
pub fn resource_manager(
    kind: BackendKind,
    runner: Arc<dyn CommandRunner>,
) -> Box<dyn ResourceManager> {
    match kind {
        BackendKind::Pbs => Box::new(Pbs::new(runner)),
        BackendKind::Slurm => Box::new(Slurm::new(runner)),
    }
}

/// Families whose tools answer on this system.
pub async fn installed_backends(runner: Arc<dyn CommandRunner>) -> Vec<BackendKind> {
    let mut installed = Vec::new();
    for kind in BackendKind::ALL {
        if resource_manager(kind, Arc::clone(&runner)).is_installed().await {
            installed.push(kind);
        }
    }
    installed
}

/// Pick the only installed scheduler family.
pub async fn guess_resource_manager(runner: Arc<dyn CommandRunner>) -> SchedResult<BackendKind> {
    let installed = installed_backends(runner).await;
    match installed.as_slice() {
        [only] => {
            tracing::debug!("Guessed resource manager {only}");
            Ok(*only)
        }
        [] => Err(SchedError::Configuration(
            "Could not find a supported resource manager. Set \"resource_manager\" in ~/.drmrc."
                .into(),
        )),
        several => Err(SchedError::Configuration(format!(
            "Found more than one resource manager ({}). Set \"resource_manager\" in ~/.drmrc.",
            several.iter().map(|k| k.name()).collect::<Vec<_>>().join(", ")
        ))),
    }
}
