//! Subprocess execution for scheduler command-line tools.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{SchedError, SchedResult};

/// Default time allowed for one scheduler command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status, `None` when killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful run printing `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed run printing `stderr`.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        text
    }
}

/// Runs external commands on behalf of a backend.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `argv[0]` with the remaining arguments and capture its output.
    ///
    /// A non-zero exit is not an error here; callers decide what it means.
    async fn run(&self, argv: &[String]) -> SchedResult<CommandOutput>;
}

/// Runs commands on the local system with a timeout.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, argv: &[String]) -> SchedResult<CommandOutput> {
        let Some((program, args)) = argv.split_first() else {
            return Err(SchedError::Internal("empty command line".into()));
        };

        tracing::debug!("Running {}", argv.join(" "));

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await
        .map_err(|_| {
            SchedError::Timeout(format!(
                "{program} timed out after {}s",
                self.timeout.as_secs()
            ))
        })?
        .map_err(|e| SchedError::Command {
            command: program.clone(),
            message: e.to_string(),
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

pub mod testing {
    //! A scripted runner for exercising backends without a scheduler.

    use std::collections::VecDeque;
    use std::sync::{Mutex, MutexGuard};

    use async_trait::async_trait;
    use rustc_hash::FxHashMap;

    use super::{CommandOutput, CommandRunner};
    use crate::error::{SchedError, SchedResult};

    type Responder = Box<dyn Fn(&[String]) -> CommandOutput + Send + Sync>;

    #[derive(Default)]
    struct State {
        queued: FxHashMap<String, VecDeque<CommandOutput>>,
        responders: FxHashMap<String, Responder>,
        calls: Vec<Vec<String>>,
    }

    /// Records every command line and replays canned output.
    ///
    /// Queued outputs for a program are used first, in order. After that a
    /// responder registered for the program answers. A program with neither
    /// behaves as if it were not installed.
    #[derive(Default)]
    pub struct ScriptedRunner {
        state: Mutex<State>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }

        /// Queue one output for the next call of `program`.
        pub fn push(&self, program: &str, output: CommandOutput) -> &Self {
            self.state()
                .queued
                .entry(program.to_string())
                .or_default()
                .push_back(output);
            self
        }

        /// Answer every call of `program` that has nothing queued.
        pub fn respond_with<F>(&self, program: &str, responder: F) -> &Self
        where
            F: Fn(&[String]) -> CommandOutput + Send + Sync + 'static,
        {
            self.state()
                .responders
                .insert(program.to_string(), Box::new(responder));
            self
        }

        /// Command lines run so far.
        pub fn calls(&self) -> Vec<Vec<String>> {
            self.state().calls.clone()
        }

        /// Command lines run so far for one program.
        pub fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
            self.state()
                .calls
                .iter()
                .filter(|argv| argv.first().is_some_and(|p| p == program))
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, argv: &[String]) -> SchedResult<CommandOutput> {
            let mut state = self.state();
            state.calls.push(argv.to_vec());

            let program = argv.first().cloned().unwrap_or_default();
            if let Some(output) = state.queued.get_mut(&program).and_then(VecDeque::pop_front) {
                return Ok(output);
            }
            if let Some(responder) = state.responders.get(&program) {
                return Ok(responder(argv));
            }

            Err(SchedError::Command {
                command: program,
                message: "No such file or directory (os error 2)".into(),
            })
        }
    }
}
