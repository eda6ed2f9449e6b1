//! User configuration from `~/.drmrc`.
//!
//! The file is a JSON object. Values already present (usually from the
//! command line) take precedence; the file only fills in what is missing.
//!
//! ```json
//! {
//!     "resource_manager": "Slurm",
//!     "account": "parkerlab",
//!     "destination": "standard",
//!     "mail_at_finish": true
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{BackendKind, guess_resource_manager};
use crate::directive::JobDirective;
use crate::error::{SchedError, SchedResult};
use crate::runner::CommandRunner;

/// Name of the per-user configuration file.
pub const CONFIG_FILE_NAME: &str = ".drmrc";

/// Settings shared by every submission. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub resource_manager: Option<String>,
    pub account: Option<String>,
    pub destination: Option<String>,
    pub email: Option<String>,
    pub memory: Option<String>,
    pub processor_memory: Option<String>,
    #[serde(deserialize_with = "deserialize_count")]
    pub processors: Option<u32>,
    #[serde(deserialize_with = "deserialize_count")]
    pub nodes: Option<u32>,
    pub time_limit: Option<String>,
    pub environment_setup: Vec<String>,
    pub mail_at_finish: Option<bool>,
}

/// Accept a count written either as a JSON number or as a string.
fn deserialize_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u32),
        Text(String),
    }

    match Option::<Count>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Count::Number(n)) => Ok(Some(n)),
        Some(Count::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("{text:?} is not a count"))),
    }
}

impl Config {
    /// `~/.drmrc`, when a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_FILE_NAME))
    }

    /// Read a configuration file. A missing file yields `None`.
    pub fn from_file(path: &Path) -> SchedResult<Option<Config>> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let config = serde_json::from_str(&text).map_err(|e| {
            SchedError::Configuration(format!("Could not read {}: {e}", path.display()))
        })?;
        Ok(Some(config))
    }

    /// Fill every unset value from `other`.
    pub fn backfill(&mut self, other: Config) {
        fn fill<T>(ours: &mut Option<T>, theirs: Option<T>) {
            if ours.is_none() {
                *ours = theirs;
            }
        }

        fill(&mut self.resource_manager, other.resource_manager);
        fill(&mut self.account, other.account);
        fill(&mut self.destination, other.destination);
        fill(&mut self.email, other.email);
        fill(&mut self.memory, other.memory);
        fill(&mut self.processor_memory, other.processor_memory);
        fill(&mut self.processors, other.processors);
        fill(&mut self.nodes, other.nodes);
        fill(&mut self.time_limit, other.time_limit);
        fill(&mut self.mail_at_finish, other.mail_at_finish);
        if self.environment_setup.is_empty() {
            self.environment_setup = other.environment_setup;
        }
    }

    /// Backfill `self` from the file at `path`, or from `~/.drmrc`.
    pub fn load(mut self, path: Option<&Path>) -> SchedResult<Config> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Config::default_path(),
        };
        if let Some(path) = path {
            if let Some(file) = Config::from_file(&path)? {
                tracing::debug!("Loaded configuration from {}", path.display());
                self.backfill(file);
            }
        }
        Ok(self)
    }

    /// The configured resource manager, or the only one installed.
    pub async fn resolve_resource_manager(
        &self,
        runner: Arc<dyn CommandRunner>,
    ) -> SchedResult<BackendKind> {
        if let Some(name) = &self.resource_manager {
            return name.parse();
        }

        let kind = guess_resource_manager(runner).await.map_err(|e| {
            SchedError::Configuration(format!(
                "Could not determine your resource manager.\n{e}\nPlease specify the one you're \
                 using in your ~/.drmrc under \"resource_manager\", e.g.:\n\n\
                 {{\"resource_manager\": \"Slurm\"}}\n"
            ))
        })?;
        tracing::debug!("No resource manager configured, so going with the one found: {kind}");
        Ok(kind)
    }

    /// Default job options for every job of a run.
    pub fn job_defaults(&self) -> SchedResult<JobDirective> {
        let mut directive = JobDirective::default();
        let textual = [
            ("account", self.account.clone()),
            ("destination", self.destination.clone()),
            ("email", self.email.clone()),
            ("memory", self.memory.clone()),
            ("processor_memory", self.processor_memory.clone()),
            ("processors", self.processors.map(|p| p.to_string())),
            ("nodes", self.nodes.map(|n| n.to_string())),
            ("time_limit", self.time_limit.clone()),
        ];
        for (key, value) in textual {
            if let Some(value) = value {
                directive.set(key, &value)?;
            }
        }
        directive
            .environment_setup
            .extend(self.environment_setup.iter().cloned());
        Ok(directive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandOutput;
    use crate::runner::testing::ScriptedRunner;
    use crate::units::Memory;

    #[test]
    fn test_backfill_keeps_supplied_values() {
        let mut config = Config {
            account: Some("cli-account".into()),
            ..Config::default()
        };
        config.backfill(Config {
            account: Some("file-account".into()),
            destination: Some("batch".into()),
            environment_setup: vec!["module load R".into()],
            ..Config::default()
        });
        assert_eq!(config.account.as_deref(), Some("cli-account"));
        assert_eq!(config.destination.as_deref(), Some("batch"));
        assert_eq!(config.environment_setup, vec!["module load R"]);
    }

    #[test]
    fn test_counts_accept_strings() {
        let config: Config =
            serde_json::from_str(r#"{"processors": "4", "nodes": 2}"#).unwrap();
        assert_eq!(config.processors, Some(4));
        assert_eq!(config.nodes, Some(2));

        let err = serde_json::from_str::<Config>(r#"{"processors": "four"}"#).unwrap_err();
        assert!(err.to_string().contains("four"));
    }

    #[test]
    fn test_load_from_file_ignores_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".drmrc");
        std::fs::write(
            &path,
            r#"{"resource_manager": "PBS", "memory": "8g", "processors": 2, "favorite_color": "teal"}"#,
        )
        .unwrap();

        let config = Config::default().load(Some(&path)).unwrap();
        assert_eq!(config.resource_manager.as_deref(), Some("PBS"));
        let defaults = config.job_defaults().unwrap();
        assert_eq!(defaults.memory, Some(Memory::Megabytes(8000)));
        assert_eq!(defaults.processors, Some(2));
    }

    #[test]
    fn test_missing_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default()
            .load(Some(&dir.path().join("absent")))
            .unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_malformed_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".drmrc");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Config::default().load(Some(&path)),
            Err(SchedError::Configuration(_))
        ));
    }

    #[test]
    fn test_bad_default_time_is_rejected() {
        let config = Config {
            time_limit: Some("15:00:".into()),
            ..Config::default()
        };
        assert!(matches!(
            config.job_defaults(),
            Err(SchedError::TimeSyntax(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_configured_and_guessed() {
        let runner = Arc::new(ScriptedRunner::new());
        let config = Config {
            resource_manager: Some("slurm".into()),
            ..Config::default()
        };
        assert_eq!(
            config.resolve_resource_manager(runner.clone()).await.unwrap(),
            BackendKind::Slurm
        );
        assert!(runner.calls().is_empty());

        runner.push("qmgr", CommandOutput::ok("pbs_version = 19.1.3\n"));
        assert_eq!(
            Config::default()
                .resolve_resource_manager(runner.clone())
                .await
                .unwrap(),
            BackendKind::Pbs
        );

        let err = Config::default()
            .resolve_resource_manager(runner)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("resource_manager"));
    }
}
