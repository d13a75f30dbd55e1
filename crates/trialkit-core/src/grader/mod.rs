//! Graders: code-based text checks and model-based rubric scoring.

pub mod code;
pub mod model;

use serde::{Deserialize, Serialize};

pub use code::{CodeChecks, run_code_grader};
pub use model::{GraderParseError, ModelGrader, parse_grader_response};

/// Default pass threshold for a model grader.
pub const DEFAULT_MODEL_THRESHOLD: f64 = 0.7;

/// Which kind of grader produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraderKind {
    Code,
    Model,
}

/// Grader configuration attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GraderConfig {
    Code {
        checks: CodeChecks,
    },
    Model {
        rubric: String,
        #[serde(default = "default_threshold")]
        threshold: f64,
    },
}

fn default_threshold() -> f64 {
    DEFAULT_MODEL_THRESHOLD
}

/// Outcome of one named check in the code grader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: String,
    pub passed: bool,
    pub message: Option<String>,
}

impl CheckResult {
    fn new(check: impl Into<String>, passed: bool, failure: impl FnOnce() -> String) -> Self {
        Self {
            check: check.into(),
            passed,
            message: (!passed).then(failure),
        }
    }
}

/// Parsed judge response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelGraderDetails {
    /// Per-dimension scores as the judge gave them.
    pub scores: serde_json::Map<String, serde_json::Value>,
    pub overall: f64,
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraderDetails {
    Checks(Vec<CheckResult>),
    Model(ModelGraderDetails),
}

/// Result of running one grader against trial output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraderResult {
    pub kind: GraderKind,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub details: GraderDetails,
}

impl GraderResult {
    /// The failing checks of a code grader result (empty for model results).
    pub fn failed_checks(&self) -> Vec<&CheckResult> {
        match &self.details {
            GraderDetails::Checks(checks) => checks.iter().filter(|c| !c.passed).collect(),
            GraderDetails::Model(_) => Vec::new(),
        }
    }
}
