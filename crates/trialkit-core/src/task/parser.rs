//! Task TOML parser with validation.
//!
//! Parses a task file into a [`Task`] and validates:
//! - The name is non-empty and `trials >= 1`.
//! - At least one grader is configured.
//! - Every conversation trigger compiles as a regex.
//! - Pass rates and score thresholds lie in `0.0..=1.0`.

use std::path::Path;

use regex::RegexBuilder;
use thiserror::Error;

use super::Task;
use crate::grader::GraderConfig;

/// Errors that can occur during task parsing and validation.
#[derive(Debug, Error)]
pub enum TaskParseError {
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("failed to read task file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("task name must not be empty")]
    EmptyName,

    #[error("task {0:?} must run at least one trial")]
    NoTrials(String),

    #[error("task {0:?} has no graders")]
    NoGraders(String),

    #[error("task {task:?} has invalid trigger {trigger:?}: {message}")]
    InvalidTrigger {
        task: String,
        trigger: String,
        message: String,
    },

    #[error("task {task:?}: {field} = {value} is outside 0.0..=1.0")]
    OutOfRange {
        task: String,
        field: &'static str,
        value: f64,
    },

    #[error("orchestration task {0:?} has no assertions")]
    NoAssertions(String),

    #[error("task {task:?}, assertion {assertion:?}: {message}")]
    InvalidAssertion {
        task: String,
        assertion: String,
        message: String,
    },
}

/// Parse and validate a task TOML string.
pub fn parse_task_toml(content: &str) -> Result<Task, TaskParseError> {
    let task: Task = toml::from_str(content)?;
    validate(&task)?;
    Ok(task)
}

/// Read and parse a task file.
pub fn load_task_file(path: &Path) -> Result<Task, TaskParseError> {
    let content = std::fs::read_to_string(path).map_err(|source| TaskParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_task_toml(&content)
}

fn validate(task: &Task) -> Result<(), TaskParseError> {
    if task.name.trim().is_empty() {
        return Err(TaskParseError::EmptyName);
    }
    if task.trials == 0 {
        return Err(TaskParseError::NoTrials(task.name.clone()));
    }
    if task.graders.is_empty() {
        return Err(TaskParseError::NoGraders(task.name.clone()));
    }

    for turn in task.input.conversation() {
        if let Some(trigger) = &turn.trigger
            && let Err(e) = RegexBuilder::new(trigger).case_insensitive(true).build()
        {
            return Err(TaskParseError::InvalidTrigger {
                task: task.name.clone(),
                trigger: trigger.clone(),
                message: e.to_string(),
            });
        }
    }

    let criteria = &task.success_criteria;
    check_unit(&task.name, "min_pass_rate", criteria.min_pass_rate)?;
    check_unit(&task.name, "min_model_score", criteria.min_model_score)?;
    for grader in &task.graders {
        if let GraderConfig::Model { threshold, .. } = grader {
            check_unit(&task.name, "threshold", Some(*threshold))?;
        }
    }

    Ok(())
}

pub(crate) fn check_unit(
    task: &str,
    field: &'static str,
    value: Option<f64>,
) -> Result<(), TaskParseError> {
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => Err(TaskParseError::OutOfRange {
            task: task.to_string(),
            field,
            value: v,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
name = "brief"
description = "Gather a brief"
trials = 2

[input]
execution_mode = "interactive"
startup_name = "Acme"
skill = "gathering-input"
document_type = "business-brief"
context = "B2B invoicing."

[[input.conversation]]
trigger = "problem|\\?"
user_message = "Late payments."

[[graders]]
type = "code"
checks = { contains_questions = true, min_turns = 2 }
"#;

    #[test]
    fn parse_valid_task() {
        let task = parse_task_toml(VALID).expect("should parse");
        assert_eq!(task.trials, 2);
        assert_eq!(task.input.conversation().len(), 1);
    }

    #[test]
    fn rejects_zero_trials() {
        let toml_str = VALID.replace("trials = 2", "trials = 0");
        let err = parse_task_toml(&toml_str).unwrap_err();
        assert!(matches!(err, TaskParseError::NoTrials(ref n) if n == "brief"));
    }

    #[test]
    fn rejects_empty_name() {
        let toml_str = VALID.replace(r#"name = "brief""#, r#"name = "  ""#);
        let err = parse_task_toml(&toml_str).unwrap_err();
        assert!(matches!(err, TaskParseError::EmptyName));
    }

    #[test]
    fn rejects_invalid_trigger() {
        let toml_str = VALID.replace(r#"trigger = "problem|\\?""#, r#"trigger = "(unclosed""#);
        let err = parse_task_toml(&toml_str).unwrap_err();
        match err {
            TaskParseError::InvalidTrigger { trigger, .. } => assert_eq!(trigger, "(unclosed"),
            other => panic!("expected InvalidTrigger, got {other}"),
        }
    }

    #[test]
    fn rejects_missing_graders() {
        let toml_str = r#"
name = "x"
description = "x"
trials = 1
graders = []

[input]
execution_mode = "autonomous"
startup_name = "X"
document_type = "business-brief"
context = "x"
"#;
        let err = parse_task_toml(toml_str).unwrap_err();
        assert!(matches!(err, TaskParseError::NoGraders(_)));
    }

    #[test]
    fn rejects_pass_rate_out_of_range() {
        let toml_str = format!("{VALID}\n[success_criteria]\nmin_pass_rate = 1.5\n");
        let err = parse_task_toml(&toml_str).unwrap_err();
        assert!(matches!(
            err,
            TaskParseError::OutOfRange {
                field: "min_pass_rate",
                ..
            }
        ));
    }

    #[test]
    fn interactive_requires_conversation() {
        let toml_str = r#"
name = "x"
description = "x"
trials = 1

[input]
execution_mode = "interactive"
startup_name = "X"
skill = "naming-business"
context = "x"

[[graders]]
type = "code"
checks = {}
"#;
        let err = parse_task_toml(toml_str).unwrap_err();
        assert!(matches!(err, TaskParseError::TomlError(_)));
    }

    #[test]
    fn load_task_file_reports_missing_path() {
        let err = load_task_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
