//! Orchestration trials: does the model call the right tools, in the right
//! order, when given the plugin's orchestration docs?
//!
//! The model runs in a tool-use loop against simulated tools
//! ([`tools::MockHandlers`]). Every tool call is recorded as a
//! [`ToolInvocation`]; the trial passes when every [`Assertion`] holds over
//! the recorded calls.

pub mod runner;
pub mod tools;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::prompt::ContextFile;
use crate::task::TaskParseError;
use crate::task::parser::check_unit;
use crate::usage::UsageStats;

pub use runner::{MAX_TOOL_ITERATIONS, OrchestrationRunner};
pub use tools::{MockHandlers, orchestration_tools};

/// A recorded tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub input: Value,
    pub id: String,
    /// 0-based position across the whole trial.
    pub order: usize,
}

impl ToolInvocation {
    /// String value of a top-level input field.
    pub fn field_str(&self, field: &str) -> Option<&str> {
        self.input.get(field).and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Assertions
// ---------------------------------------------------------------------------

/// Selects invocations by tool name and, optionally, one string input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvocationMatcher {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
}

impl InvocationMatcher {
    pub fn tool(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            field: None,
            equals: None,
            contains: None,
        }
    }

    pub fn field_contains(mut self, field: impl Into<String>, needle: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self.contains = Some(needle.into());
        self
    }

    pub fn field_equals(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self.equals = Some(value.into());
        self
    }

    pub fn matches(&self, invocation: &ToolInvocation) -> bool {
        if invocation.name != self.tool {
            return false;
        }
        let Some(field) = &self.field else {
            return true;
        };
        let Some(value) = invocation.field_str(field) else {
            return false;
        };
        self.equals.as_deref().is_none_or(|e| value == e)
            && self.contains.as_deref().is_none_or(|c| value.contains(c))
    }

    fn validate(&self) -> Result<(), String> {
        if self.field.is_none() && (self.equals.is_some() || self.contains.is_some()) {
            return Err(format!(
                "matcher for {:?} sets equals/contains without a field",
                self.tool
            ));
        }
        Ok(())
    }
}

/// A predicate over the full invocation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvocationCheck {
    /// Some invocation matches.
    Called { matcher: InvocationMatcher },
    /// No invocation matches.
    NotCalled { matcher: InvocationMatcher },
    /// At least `count` invocations match.
    MinCalls {
        matcher: InvocationMatcher,
        count: usize,
    },
    /// At least one invocation matches and all matches have
    /// `input[field] == value`.
    AllFieldEquals {
        matcher: InvocationMatcher,
        field: String,
        value: Value,
    },
    /// Both sides occur and the earliest `first` match precedes the
    /// earliest `then` match.
    Precedes {
        first: Vec<InvocationMatcher>,
        then: Vec<InvocationMatcher>,
    },
}

fn first_order(matchers: &[InvocationMatcher], invocations: &[ToolInvocation]) -> Option<usize> {
    invocations
        .iter()
        .filter(|inv| matchers.iter().any(|m| m.matches(inv)))
        .map(|inv| inv.order)
        .min()
}

impl InvocationCheck {
    pub fn evaluate(&self, invocations: &[ToolInvocation]) -> bool {
        match self {
            InvocationCheck::Called { matcher } => invocations.iter().any(|i| matcher.matches(i)),
            InvocationCheck::NotCalled { matcher } => {
                !invocations.iter().any(|i| matcher.matches(i))
            }
            InvocationCheck::MinCalls { matcher, count } => {
                invocations.iter().filter(|i| matcher.matches(i)).count() >= *count
            }
            InvocationCheck::AllFieldEquals {
                matcher,
                field,
                value,
            } => {
                let mut matched = invocations.iter().filter(|i| matcher.matches(i)).peekable();
                matched.peek().is_some() && matched.all(|i| i.input.get(field) == Some(value))
            }
            InvocationCheck::Precedes { first, then } => {
                match (first_order(first, invocations), first_order(then, invocations)) {
                    (Some(a), Some(b)) => a < b,
                    _ => false,
                }
            }
        }
    }

    fn matchers(&self) -> Vec<&InvocationMatcher> {
        match self {
            InvocationCheck::Called { matcher }
            | InvocationCheck::NotCalled { matcher }
            | InvocationCheck::MinCalls { matcher, .. }
            | InvocationCheck::AllFieldEquals { matcher, .. } => vec![matcher],
            InvocationCheck::Precedes { first, then } => first.iter().chain(then).collect(),
        }
    }
}

/// A described check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub description: String,
    #[serde(flatten)]
    pub check: InvocationCheck,
}

impl Assertion {
    pub fn evaluate(&self, invocations: &[ToolInvocation]) -> AssertionResult {
        AssertionResult {
            description: self.description.clone(),
            passed: self.check.evaluate(invocations),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub description: String,
    pub passed: bool,
}

// ---------------------------------------------------------------------------
// Task and results
// ---------------------------------------------------------------------------

/// An orchestration task file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorTask {
    pub name: String,
    pub description: String,
    pub trials: u32,
    /// Plugin files injected into the system prompt.
    #[serde(default)]
    pub context_files: Vec<ContextFile>,
    #[serde(default)]
    pub system_instructions: String,
    pub user_message: String,
    /// Static responses replacing the default mock for a tool.
    #[serde(default)]
    pub mock_overrides: BTreeMap<String, String>,
    pub assertions: Vec<Assertion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_pass_rate: Option<f64>,
}

/// Parse and validate an orchestration task.
pub fn parse_orchestrator_toml(content: &str) -> Result<OrchestratorTask, TaskParseError> {
    let task: OrchestratorTask = toml::from_str(content)?;
    if task.name.trim().is_empty() {
        return Err(TaskParseError::EmptyName);
    }
    if task.trials == 0 {
        return Err(TaskParseError::NoTrials(task.name.clone()));
    }
    if task.assertions.is_empty() {
        return Err(TaskParseError::NoAssertions(task.name.clone()));
    }
    check_unit(&task.name, "min_pass_rate", task.min_pass_rate)?;
    for assertion in &task.assertions {
        for matcher in assertion.check.matchers() {
            matcher
                .validate()
                .map_err(|message| TaskParseError::InvalidAssertion {
                    task: task.name.clone(),
                    assertion: assertion.description.clone(),
                    message,
                })?;
        }
        if let InvocationCheck::Precedes { first, then } = &assertion.check
            && (first.is_empty() || then.is_empty())
        {
            return Err(TaskParseError::InvalidAssertion {
                task: task.name.clone(),
                assertion: assertion.description.clone(),
                message: "precedes needs at least one matcher on each side".to_string(),
            });
        }
    }
    Ok(task)
}

pub fn load_orchestrator_file(path: &Path) -> Result<OrchestratorTask, TaskParseError> {
    let content = std::fs::read_to_string(path).map_err(|source| TaskParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_orchestrator_toml(&content)
}

/// One execution of an orchestration task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorTrial {
    pub task: String,
    pub trial_number: u32,
    pub tool_invocations: Vec<ToolInvocation>,
    pub assertion_results: Vec<AssertionResult>,
    pub passed: bool,
    pub duration_ms: u64,
    pub usage: UsageStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OrchestratorTrial {
    pub fn failed_assertions(&self) -> impl Iterator<Item = &AssertionResult> {
        self.assertion_results.iter().filter(|r| !r.passed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorEvalResult {
    pub task: String,
    pub trials: u32,
    pub trials_run: u32,
    pub passed: u32,
    pub required_passes: u32,
    pub pass_rate: f64,
    pub trial_results: Vec<OrchestratorTrial>,
    pub total_usage: UsageStats,
}

impl OrchestratorEvalResult {
    pub fn met_requirement(&self) -> bool {
        self.passed >= self.required_passes
    }
}
