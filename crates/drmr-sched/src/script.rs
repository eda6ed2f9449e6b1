//! Parser for pipeline scripts annotated with `# drmr:` directives.
//!
//! A script is ordinary shell text. Three comment directives control how it
//! is split into jobs:
//!
//! ```text
//! # drmr:job processors=4 memory=8g
//! bwa mem ref.fa a.fq > a.sam
//! bwa mem ref.fa b.fq > b.sam
//! # drmr:wait
//! # drmr:label merge
//! # drmr:job time_limit=2h
//! samtools merge all.bam a.sam b.sam
//! ```
//!
//! Blank lines and other comments are dropped, and lines ending in a
//! backslash are joined to the line that follows.

use crate::directive::is_script_job_option;
use crate::error::{SchedError, SchedResult};

const DIRECTIVE_PREFIX: &str = "drmr:";

/// One event in a parsed script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEvent {
    /// Start a new job with the given options.
    Job(JobOptions),
    /// Synchronization barrier.
    Wait,
    /// Name for the next job.
    Label(String),
    /// A command for the currently open job.
    Command(String),
}

/// Whitelisted `key=value` options from a `# drmr:job` line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOptions {
    /// The options in source order. `default` has no value.
    pub options: Vec<(String, Option<String>)>,
    /// 1-based number of the line the directive came from.
    pub line_number: usize,
    /// The directive line itself, for error reporting.
    pub line: String,
}

impl JobOptions {
    /// Whether the bare `default` option was given.
    pub fn use_defaults_only(&self) -> bool {
        self.options.iter().any(|(key, _)| key == "default")
    }

    /// Options carrying a value.
    pub fn values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options
            .iter()
            .filter_map(|(key, value)| value.as_deref().map(|v| (key.as_str(), v)))
    }
}

/// A logical script line after continuation joining.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Line {
    number: usize,
    text: String,
}

/// Parse a pipeline script into its directive events.
pub fn parse_script(script: &str) -> SchedResult<Vec<ScriptEvent>> {
    join_continuations(script)
        .into_iter()
        .filter(|line| !is_boring(&line.text))
        .map(|line| parse_line(&line))
        .collect()
}

/// Join backslash-continued lines, trimming each physical line.
fn join_continuations(script: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut pending: Option<Line> = None;

    for (index, raw) in script.lines().enumerate() {
        let trimmed = raw.trim();
        let (text, continued) = match trimmed.strip_suffix('\\') {
            Some(head) => (head, true),
            None => (trimmed, false),
        };

        let line = match pending.take() {
            Some(mut open) => {
                open.text.push_str(text);
                open
            }
            None => Line {
                number: index + 1,
                text: text.to_string(),
            },
        };

        if continued {
            pending = Some(line);
        } else {
            lines.push(line);
        }
    }

    lines.extend(pending);
    lines
}

/// Empty lines and comments that are not directives.
fn is_boring(line: &str) -> bool {
    line.trim().is_empty() || (line.starts_with('#') && directive_of(line).is_none())
}

/// Split a directive line into its name and argument text.
fn directive_of(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('#')?.trim_start();
    let rest = rest.strip_prefix(DIRECTIVE_PREFIX)?;
    let (name, args) = match rest.find(char::is_whitespace) {
        Some(pos) => (&rest[..pos], rest[pos..].trim()),
        None => (rest, ""),
    };
    matches!(name, "job" | "wait" | "label").then_some((name, args))
}

fn parse_line(line: &Line) -> SchedResult<ScriptEvent> {
    let Some((directive, args)) = directive_of(&line.text) else {
        return Ok(ScriptEvent::Command(line.text.clone()));
    };

    tracing::debug!("directive: {directive}, args: {args:?}");

    match directive {
        "job" => parse_job_options(line, args).map(ScriptEvent::Job),
        "wait" => Ok(ScriptEvent::Wait),
        "label" => Ok(ScriptEvent::Label(args.to_string())),
        other => Err(SchedError::parse(
            line.number,
            &line.text,
            format!("Unknown directive {other}"),
        )),
    }
}

fn parse_job_options(line: &Line, args: &str) -> SchedResult<JobOptions> {
    let mut options = Vec::new();

    for token in args.split_whitespace() {
        let (key, value) = match token.split_once('=') {
            Some((key, value)) => (key, Some(value.to_string())),
            None => (token, None),
        };

        if !is_script_job_option(key) {
            return Err(SchedError::parse(
                line.number,
                &line.text,
                format!("Unrecognized job directive {key}"),
            ));
        }

        match (key, &value) {
            ("default", _) => {}
            (_, None) => {
                return Err(SchedError::parse(
                    line.number,
                    &line.text,
                    format!("Job directive {key} needs a value ({key}=...)"),
                ));
            }
            (_, Some(v)) if v.is_empty() => {
                return Err(SchedError::parse(
                    line.number,
                    &line.text,
                    format!("Job directive {key} has an empty value"),
                ));
            }
            _ => {}
        }

        options.push((key.to_string(), value));
    }

    Ok(JobOptions {
        options,
        line_number: line.number,
        line: line.text.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands(events: &[ScriptEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                ScriptEvent::Command(c) => Some(c.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_drops_blank_lines_and_comments() {
        let script = "#!/bin/bash\n\n# align the reads\necho one\n   \necho two\n";
        let events = parse_script(script).unwrap();
        assert_eq!(
            events,
            vec![
                ScriptEvent::Command("echo one".into()),
                ScriptEvent::Command("echo two".into()),
            ]
        );
    }

    #[test]
    fn test_directives() {
        let script =
            "# drmr:label align\n# drmr:job processors=4 memory=8g\nbwa mem a\n#drmr:wait\n";
        let events = parse_script(script).unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], ScriptEvent::Label("align".into()));
        let ScriptEvent::Job(options) = &events[1] else {
            panic!("expected a job directive, got {:?}", events[1]);
        };
        assert_eq!(
            options.values().collect::<Vec<_>>(),
            vec![("processors", "4"), ("memory", "8g")]
        );
        assert_eq!(options.line_number, 2);
        assert_eq!(events[3], ScriptEvent::Wait);
    }

    #[test]
    fn test_continuation_lines_are_joined() {
        let script = "samtools sort \\\n   -o out.bam \\\n   in.bam\necho done\n";
        let events = parse_script(script).unwrap();
        assert_eq!(
            commands(&events),
            vec!["samtools sort -o out.bam in.bam", "echo done"]
        );
    }

    #[test]
    fn test_unknown_option_quotes_line() {
        let script = "echo hi\n# drmr:job bogus=1\n";
        let err = parse_script(script).unwrap_err();
        match &err {
            SchedError::Parse {
                line_number, line, ..
            } => {
                assert_eq!(*line_number, 2);
                assert_eq!(line, "# drmr:job bogus=1");
            }
            other => panic!("expected a parse error, got {other:?}"),
        }
        assert!(err.to_string().contains("bogus"));
        assert!(err.to_string().contains("# drmr:job bogus=1"));
    }

    #[test]
    fn test_option_without_value_is_rejected() {
        let err = parse_script("# drmr:job memory\n").unwrap_err();
        assert!(matches!(err, SchedError::Parse { .. }));
    }

    #[test]
    fn test_bare_default_option() {
        let events = parse_script("# drmr:job default nodes=2\necho x\n").unwrap();
        let ScriptEvent::Job(options) = &events[0] else {
            panic!("expected a job directive");
        };
        assert!(options.use_defaults_only());
        assert_eq!(options.values().collect::<Vec<_>>(), vec![("nodes", "2")]);
    }

    #[test]
    fn test_directive_name_must_end_at_whitespace() {
        let events = parse_script("# drmr:waiting for godot\necho x\n").unwrap();
        assert_eq!(events, vec![ScriptEvent::Command("echo x".into())]);
    }

    #[test]
    fn test_trailing_continuation_is_kept() {
        let events = parse_script("echo a \\").unwrap();
        assert_eq!(commands(&events), vec!["echo a "]);
    }
}
