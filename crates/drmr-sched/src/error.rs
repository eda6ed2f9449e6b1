//! Error handling for script parsing and job submission.

use thiserror::Error;

/// Result type for drmr operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur while parsing a pipeline or driving a scheduler.
#[derive(Error, Debug)]
pub enum SchedError {
    /// The resource manager is unusable, missing, or ambiguous.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed directive or unknown job option in a pipeline script.
    #[error("Parse error on line {line_number}: {message} in {line:?}")]
    Parse {
        line_number: usize,
        line: String,
        message: String,
    },

    /// A duration that matches neither accepted time grammar.
    #[error("Syntax error: {0}")]
    TimeSyntax(String),

    /// A well-formed but unacceptable value.
    #[error("Invalid value: {0}")]
    Value(String),

    /// The submit command exited non-zero.
    #[error(
        "Error trying to submit: '{}' returned non-zero exit status {}: {}",
        argv.join(" "),
        display_code(*exit_code),
        output.trim_end()
    )]
    Submission {
        exit_code: Option<i32>,
        argv: Vec<String>,
        output: String,
    },

    /// The cancel command exited non-zero.
    #[error(
        "Error trying to delete job{} {}: '{}' returned non-zero exit status {}: {}",
        if job_ids.len() == 1 { "" } else { "s" },
        job_ids.join(", "),
        argv.join(" "),
        display_code(*exit_code),
        output.trim_end()
    )]
    Deletion {
        exit_code: Option<i32>,
        argv: Vec<String>,
        output: String,
        job_ids: Vec<String>,
    },

    /// A scheduler command could not be run or produced unusable output.
    #[error("Scheduler command failed: {command} - {message}")]
    Command { command: String, message: String },

    /// A scheduler command did not finish in time.
    #[error("Command timeout: {0}")]
    Timeout(String),

    /// Job dependency cycle detected.
    #[error("Dependency cycle detected in job graph")]
    DependencyCycle,

    /// Internal invariant violated.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchedError {
    /// Build a parse error for a script line.
    pub fn parse(line_number: usize, line: &str, message: impl Into<String>) -> Self {
        SchedError::Parse {
            line_number,
            line: line.to_string(),
            message: message.into(),
        }
    }
}

fn display_code(code: Option<i32>) -> String {
    code.map_or_else(|| "(signal)".to_string(), |c| c.to_string())
}
