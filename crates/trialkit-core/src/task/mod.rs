//! Task definitions.
//!
//! A task is authored as a TOML file and loaded with
//! [`parser::parse_task_toml`]. Once loaded it is immutable; evaluators only
//! borrow it.

pub mod parser;

use serde::{Deserialize, Serialize};

use crate::grader::GraderConfig;

pub use parser::{TaskParseError, load_task_file, parse_task_toml};

/// A content-quality evaluation task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task name; also the stem of transcript filenames.
    pub name: String,
    pub description: String,
    /// Number of trials to run at most.
    pub trials: u32,
    pub input: TaskInput,
    /// Path of a reference document handed to model graders, relative to
    /// the fixtures directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_solution: Option<String>,
    pub graders: Vec<GraderConfig>,
    #[serde(default)]
    pub success_criteria: SuccessCriteria,
}

impl Task {
    pub fn mode(&self) -> ExecutionMode {
        self.input.mode()
    }
}

/// Pass conditions for a single trial and for the task as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriteria {
    #[serde(default = "default_true")]
    pub all_code_graders_pass: bool,
    /// Minimum model grader score for a trial to pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_model_score: Option<f64>,
    /// Fraction of trials that must pass. Falls back to the harness default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_pass_rate: Option<f64>,
}

impl Default for SuccessCriteria {
    fn default() -> Self {
        Self {
            all_code_graders_pass: true,
            min_model_score: None,
            min_pass_rate: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// How a task drives the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Autonomous,
    Interactive,
    Challenger,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ExecutionMode::Autonomous => "autonomous",
            ExecutionMode::Interactive => "interactive",
            ExecutionMode::Challenger => "challenger",
        })
    }
}

/// Mode-specific task input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "execution_mode", rename_all = "lowercase")]
pub enum TaskInput {
    /// Single-shot document generation.
    Autonomous {
        startup_name: String,
        context: String,
        document_type: String,
        /// Prior document prepended to the user message.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context_fixture: Option<String>,
    },
    /// Multi-turn session driven by a skill.
    Interactive {
        startup_name: String,
        context: String,
        skill: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        document_type: Option<String>,
        /// Extra files under the skill directory to include in the prompt.
        #[serde(default)]
        references: Vec<String>,
        conversation: Vec<ConversationTurn>,
    },
    /// Scrutiny of an existing document.
    Challenger {
        startup_name: String,
        context: String,
        document_type: String,
        fixture: String,
        #[serde(default)]
        conversation: Vec<ConversationTurn>,
    },
}

impl TaskInput {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            TaskInput::Autonomous { .. } => ExecutionMode::Autonomous,
            TaskInput::Interactive { .. } => ExecutionMode::Interactive,
            TaskInput::Challenger { .. } => ExecutionMode::Challenger,
        }
    }

    pub fn startup_name(&self) -> &str {
        match self {
            TaskInput::Autonomous { startup_name, .. }
            | TaskInput::Interactive { startup_name, .. }
            | TaskInput::Challenger { startup_name, .. } => startup_name,
        }
    }

    /// Scripted follow-up turns. Autonomous tasks have none.
    pub fn conversation(&self) -> &[ConversationTurn] {
        match self {
            TaskInput::Autonomous { .. } => &[],
            TaskInput::Interactive { conversation, .. }
            | TaskInput::Challenger { conversation, .. } => conversation,
        }
    }
}

/// A scripted user turn, optionally gated on the previous assistant reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Case-insensitive regex matched against the last assistant reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    pub user_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_autonomous_task() {
        let toml_str = r#"
name = "market-analysis-fintech"
description = "Generate a market analysis"
trials = 3

[input]
execution_mode = "autonomous"
startup_name = "PayFlow"
document_type = "market-analysis"
context_fixture = "business-brief-payflow.md"
context = "Cover market size."

[[graders]]
type = "code"
checks = { min_word_count = 600 }
"#;
        let task: Task = toml::from_str(toml_str).expect("should parse");
        assert_eq!(task.mode(), ExecutionMode::Autonomous);
        assert_eq!(task.input.startup_name(), "PayFlow");
        assert!(task.input.conversation().is_empty());
        assert!(task.success_criteria.all_code_graders_pass);
        assert_eq!(task.success_criteria.min_pass_rate, None);
    }

    #[test]
    fn deserialize_challenger_with_conversation() {
        let toml_str = r#"
name = "challenger-product-spec"
description = "Challenge a spec"
trials = 3

[input]
execution_mode = "challenger"
startup_name = "MetricsDash"
document_type = "product-spec"
fixture = "product-spec-metricsdash.md"
context = "Yes, challenge me."

[[input.conversation]]
trigger = "scope|MVP"
user_message = "We limited scope deliberately."

[[input.conversation]]
user_message = "Thanks."

[[graders]]
type = "model"
rubric = "Was SKEPTIC MODE engaged?"
threshold = 0.6

[success_criteria]
all_code_graders_pass = true
min_model_score = 0.6
min_pass_rate = 0.33
"#;
        let task: Task = toml::from_str(toml_str).expect("should parse");
        let turns = task.input.conversation();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].trigger.as_deref(), Some("scope|MVP"));
        assert!(turns[1].trigger.is_none());
        assert_eq!(task.success_criteria.min_model_score, Some(0.6));
    }

    #[test]
    fn unknown_execution_mode_is_rejected() {
        let toml_str = r#"
name = "x"
description = "x"
trials = 1
graders = []

[input]
execution_mode = "batch"
startup_name = "X"
context = "x"
"#;
        assert!(toml::from_str::<Task>(toml_str).is_err());
    }
}
