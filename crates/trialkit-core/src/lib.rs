//! Trial-based evaluation harness for LLM plugin prompts.
//!
//! ```text
//! task TOML ──> Evaluator ──> trials ──> graders ──> EvalResult
//!                  │                        │
//!                  └──── MessagesClient ────┘
//! orchestration TOML ──> OrchestrationRunner ──> mock tools ──> assertions
//! ```

pub mod client;
pub mod config;
pub mod eval;
pub mod fixtures;
pub mod grader;
pub mod host;
pub mod orchestration;
pub mod prompt;
pub mod task;
pub mod transcript;
pub mod usage;
