//! Job directives: the resource requests and controls attached to a job.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{SchedError, SchedResult};
use crate::units::{Memory, normalize_memory, normalize_time};

/// Name of the subdirectory holding generated scripts and sentinel files.
pub const CONTROL_DIRECTORY_NAME: &str = ".drmr";

/// Job options accepted on a `# drmr:job` line.
pub const SCRIPT_JOB_OPTIONS: &[(&str, &str)] = &[
    ("account", "The account to which the job will be billed."),
    ("default", "Use the resource manager's default job parameters."),
    (
        "destination",
        "The execution environment (queue, partition, etc.) for the job.",
    ),
    ("email", "The submitter's email address, for notifications."),
    ("job_name", "A name for the job."),
    ("memory", "The amount of memory required on any one node."),
    ("nodes", "The number of nodes required for the job."),
    (
        "node_properties",
        "A comma-separated list of properties each node must have.",
    ),
    ("processors", "The number of cores required on each node."),
    (
        "processor_memory",
        "The amount of memory required per processor.",
    ),
    (
        "time_limit",
        "The maximum amount of time the DRM should allow the job: \"12:30:00\" or \"12h30m\".",
    ),
    ("working_directory", "The directory where the job should be run."),
];

/// Check whether `key` may appear on a `# drmr:job` line.
pub fn is_script_job_option(key: &str) -> bool {
    SCRIPT_JOB_OPTIONS.iter().any(|(name, _)| *name == key)
}

/// Terminal condition of prerequisites that satisfies a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyState {
    /// Prerequisites ended, however they ended.
    Any,
    /// Prerequisites failed.
    NotOk,
    /// Prerequisites succeeded.
    Ok,
    /// Prerequisites started.
    Start,
}

impl DependencyState {
    /// All states, in encoding order.
    pub const ALL: [DependencyState; 4] = [
        DependencyState::Any,
        DependencyState::NotOk,
        DependencyState::Ok,
        DependencyState::Start,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyState::Any => "any",
            DependencyState::NotOk => "notok",
            DependencyState::Ok => "ok",
            DependencyState::Start => "start",
        }
    }
}

impl fmt::Display for DependencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyState {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DependencyState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| SchedError::Value(format!("Unsupported dependency state: {s}")))
    }
}

/// Prerequisite job ids, grouped by the state they must reach.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies(BTreeMap<DependencyState, BTreeSet<String>>);

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one prerequisite.
    pub fn insert(&mut self, state: DependencyState, job_id: impl Into<String>) {
        self.0.entry(state).or_default().insert(job_id.into());
    }

    /// Add several prerequisites sharing a state.
    pub fn extend<I, S>(&mut self, state: DependencyState, job_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.0.entry(state).or_default();
        entry.extend(job_ids.into_iter().map(Into::into));
    }

    /// Union another dependency map into this one.
    pub fn merge(&mut self, other: &Dependencies) {
        for (state, ids) in other.iter() {
            self.extend(state, ids.iter().cloned());
        }
    }

    /// Prerequisites of one state.
    pub fn get(&self, state: DependencyState) -> Option<&BTreeSet<String>> {
        self.0.get(&state)
    }

    /// Iterate non-empty clauses in state order.
    pub fn iter(&self) -> impl Iterator<Item = (DependencyState, &BTreeSet<String>)> {
        self.0
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(state, ids)| (*state, ids))
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }
}

/// Events that trigger email notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MailEvent {
    Begin,
    End,
    Fail,
}

impl MailEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailEvent::Begin => "BEGIN",
            MailEvent::End => "END",
            MailEvent::Fail => "FAIL",
        }
    }
}

impl FromStr for MailEvent {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BEGIN" => Ok(MailEvent::Begin),
            "END" => Ok(MailEvent::End),
            "FAIL" => Ok(MailEvent::Fail),
            _ => Err(SchedError::Value(format!("Unsupported mail event: {s}"))),
        }
    }
}

/// Index range of an array job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayControl {
    pub index_min: u32,
    pub index_max: u32,
    /// Maximum number of indices running at once.
    pub concurrency: Option<u32>,
}

impl ArrayControl {
    /// Indices `1..=count`. A concurrency limit of zero means no limit.
    pub fn one_based(count: u32, concurrency: Option<u32>) -> Self {
        Self {
            index_min: 1,
            index_max: count,
            concurrency: concurrency.filter(|&limit| limit > 0),
        }
    }

    /// Render as `min-max[%concurrency]`, the syntax both schedulers share.
    pub fn range_spec(&self) -> String {
        match self.concurrency {
            Some(limit) => format!("{}-{}%{}", self.index_min, self.index_max, limit),
            None => format!("{}-{}", self.index_min, self.index_max),
        }
    }
}

/// The options in effect for one job.
///
/// Every field is optional; a backend decides what an absent field renders as.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobDirective {
    pub account: Option<String>,
    pub destination: Option<String>,
    pub email: Option<String>,
    pub job_name: Option<String>,
    pub mail_events: Vec<MailEvent>,
    pub memory: Option<Memory>,
    pub nodes: Option<u32>,
    pub node_properties: Option<String>,
    pub processors: Option<u32>,
    pub processor_memory: Option<Memory>,
    /// Normalized `HH:MM:SS`.
    pub time_limit: Option<String>,
    pub working_directory: Option<PathBuf>,
    pub dependencies: Dependencies,
    pub array_control: Option<ArrayControl>,
    pub environment_setup: Vec<String>,
    pub raw_preamble: Option<String>,
    pub notes: Option<String>,
}

impl JobDirective {
    /// Set a whitelisted option from its textual form, normalizing units.
    ///
    /// `default` is not a field and is handled by the graph builder.
    pub fn set(&mut self, key: &str, value: &str) -> SchedResult<()> {
        match key {
            "account" => self.account = Some(value.to_string()),
            "destination" => self.destination = Some(value.to_string()),
            "email" => self.email = Some(value.to_string()),
            "job_name" => self.job_name = Some(value.to_string()),
            "memory" => self.memory = Some(normalize_memory(value)),
            "nodes" => self.nodes = Some(parse_count(key, value)?),
            "node_properties" => self.node_properties = Some(value.to_string()),
            "processors" => self.processors = Some(parse_count(key, value)?),
            "processor_memory" => self.processor_memory = Some(normalize_memory(value)),
            "time_limit" => self.time_limit = Some(normalize_time(value)?),
            "working_directory" => self.working_directory = Some(PathBuf::from(value)),
            "mail_events" => {
                self.mail_events = value
                    .split(',')
                    .filter(|e| !e.trim().is_empty())
                    .map(|e| e.trim().parse())
                    .collect::<SchedResult<_>>()?;
            }
            "raw_preamble" => self.raw_preamble = Some(value.to_string()),
            "notes" => self.notes = Some(value.to_string()),
            other => {
                return Err(SchedError::Value(format!("Unrecognized job directive {other}")));
            }
        }
        Ok(())
    }

    /// Overlay `other` on top of this directive.
    ///
    /// Present values in `other` replace ours; dependencies are unioned and
    /// environment setup lines appended.
    pub fn merge(&mut self, other: &JobDirective) {
        fn overlay<T: Clone>(ours: &mut Option<T>, theirs: &Option<T>) {
            if theirs.is_some() {
                ours.clone_from(theirs);
            }
        }

        overlay(&mut self.account, &other.account);
        overlay(&mut self.destination, &other.destination);
        overlay(&mut self.email, &other.email);
        overlay(&mut self.job_name, &other.job_name);
        overlay(&mut self.memory, &other.memory);
        overlay(&mut self.nodes, &other.nodes);
        overlay(&mut self.node_properties, &other.node_properties);
        overlay(&mut self.processors, &other.processors);
        overlay(&mut self.processor_memory, &other.processor_memory);
        overlay(&mut self.time_limit, &other.time_limit);
        overlay(&mut self.working_directory, &other.working_directory);
        overlay(&mut self.array_control, &other.array_control);
        overlay(&mut self.raw_preamble, &other.raw_preamble);
        overlay(&mut self.notes, &other.notes);
        if !other.mail_events.is_empty() {
            self.mail_events.clone_from(&other.mail_events);
        }
        self.dependencies.merge(&other.dependencies);
        self.environment_setup
            .extend(other.environment_setup.iter().cloned());
    }

    /// Return a copy with `other` overlaid.
    pub fn merged(&self, other: &JobDirective) -> JobDirective {
        let mut merged = self.clone();
        merged.merge(other);
        merged
    }

    /// The control directory for this job's working directory.
    pub fn control_directory(&self) -> Option<PathBuf> {
        self.working_directory
            .as_deref()
            .map(control_directory_for)
    }
}

/// `<working_directory>/.drmr`.
pub fn control_directory_for(working_directory: &Path) -> PathBuf {
    working_directory.join(CONTROL_DIRECTORY_NAME)
}

fn parse_count(key: &str, value: &str) -> SchedResult<u32> {
    value
        .parse()
        .map_err(|_| SchedError::Value(format!("{key} must be a whole number, not {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_state_parse() {
        assert_eq!("ok".parse::<DependencyState>().unwrap(), DependencyState::Ok);
        assert_eq!(
            "notok".parse::<DependencyState>().unwrap(),
            DependencyState::NotOk
        );
        let err = "after".parse::<DependencyState>().unwrap_err();
        assert!(err.to_string().contains("after"));
    }

    #[test]
    fn test_dependencies_iterate_in_state_order() {
        let mut deps = Dependencies::new();
        deps.insert(DependencyState::Ok, "2");
        deps.insert(DependencyState::Any, "1");
        deps.extend(DependencyState::Ok, ["3", "2"]);
        let states: Vec<_> = deps.iter().map(|(s, _)| s).collect();
        assert_eq!(states, vec![DependencyState::Any, DependencyState::Ok]);
        assert_eq!(deps.get(DependencyState::Ok).unwrap().len(), 2);
    }

    #[test]
    fn test_set_normalizes_units() {
        let mut directive = JobDirective::default();
        directive.set("memory", "4g").unwrap();
        directive.set("time_limit", "1d12h").unwrap();
        directive.set("processors", "8").unwrap();
        assert_eq!(directive.memory, Some(Memory::Megabytes(4000)));
        assert_eq!(directive.time_limit.as_deref(), Some("36:00:00"));
        assert_eq!(directive.processors, Some(8));
    }

    #[test]
    fn test_set_rejects_bad_count() {
        let mut directive = JobDirective::default();
        assert!(matches!(
            directive.set("nodes", "two"),
            Err(SchedError::Value(_))
        ));
    }

    #[test]
    fn test_merge_overlays_present_values() {
        let mut base = JobDirective::default();
        base.set("account", "lab").unwrap();
        base.set("destination", "batch").unwrap();
        base.environment_setup.push("module load samtools".into());

        let mut job = JobDirective::default();
        job.set("destination", "bigmem").unwrap();
        job.environment_setup.push("set -e".into());

        let merged = base.merged(&job);
        assert_eq!(merged.account.as_deref(), Some("lab"));
        assert_eq!(merged.destination.as_deref(), Some("bigmem"));
        assert_eq!(merged.environment_setup.len(), 2);
    }

    #[test]
    fn test_mail_events_parse() {
        let mut directive = JobDirective::default();
        directive.set("mail_events", "end, fail").unwrap();
        assert_eq!(directive.mail_events, vec![MailEvent::End, MailEvent::Fail]);
        assert!(directive.set("mail_events", "ABORT").is_err());
    }

    #[test]
    fn test_array_range_spec() {
        assert_eq!(ArrayControl::one_based(5, None).range_spec(), "1-5");
        assert_eq!(ArrayControl::one_based(5, Some(2)).range_spec(), "1-5%2");
        assert_eq!(ArrayControl::one_based(5, Some(0)).range_spec(), "1-5");
    }

    #[test]
    fn test_whitelist() {
        assert!(is_script_job_option("processor_memory"));
        assert!(is_script_job_option("default"));
        assert!(!is_script_job_option("bogus"));
        assert!(!is_script_job_option("dependencies"));
    }
}
