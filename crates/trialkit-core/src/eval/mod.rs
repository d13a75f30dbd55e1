//! Trial-based task evaluation.
//!
//! A task runs up to `trials` times, sequentially. [`TrialTally`] decides
//! when to stop: as soon as the required number of passes is reached, or
//! as soon as enough trials have failed that it can no longer be reached.
//! The same policy drives both content tasks ([`Evaluator`]) and
//! orchestration tasks ([`crate::orchestration`]).

pub mod evaluator;
pub mod trial;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::Role;
use crate::grader::GraderResult;
use crate::usage::UsageStats;

pub use evaluator::Evaluator;
pub use trial::{PreparedTask, grading_output, trial_passed};

/// Passes needed out of `trials` for a given pass rate:
/// `max(1, round(trials * rate))`.
pub fn required_passes(trials: u32, rate: f64) -> u32 {
    let raw = (f64::from(trials) * rate).round();
    (raw.max(0.0) as u32).max(1)
}

// ---------------------------------------------------------------------------
// Tally
// ---------------------------------------------------------------------------

/// Running pass/fail count with the early-exit rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialTally {
    trials: u32,
    required: u32,
    passes: u32,
    failures: u32,
}

impl TrialTally {
    pub fn new(trials: u32, min_pass_rate: f64) -> Self {
        Self {
            trials,
            required: required_passes(trials, min_pass_rate),
            passes: 0,
            failures: 0,
        }
    }

    /// Record one trial outcome. Returns `true` when evaluation should stop.
    pub fn record(&mut self, passed: bool) -> bool {
        if passed {
            self.passes += 1;
        } else {
            self.failures += 1;
        }
        self.is_decided()
    }

    /// Whether the task outcome can no longer change, or every trial ran.
    pub fn is_decided(&self) -> bool {
        self.passes >= self.required
            || self.failures > self.max_allowed_failures()
            || self.passes + self.failures >= self.trials
    }

    pub fn max_allowed_failures(&self) -> u32 {
        self.trials.saturating_sub(self.required)
    }

    pub fn required(&self) -> u32 {
        self.required
    }

    pub fn passes(&self) -> u32 {
        self.passes
    }

    pub fn runs(&self) -> u32 {
        self.passes + self.failures
    }

    pub fn met(&self) -> bool {
        self.passes >= self.required
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One message in a content trial's conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One execution of a content task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub task: String,
    /// 1-based.
    pub trial_number: u32,
    pub transcript: Vec<ChatMessage>,
    /// The text graders saw.
    pub output: String,
    pub grader_results: Vec<GraderResult>,
    pub passed: bool,
    pub duration_ms: u64,
    pub usage: UsageStats,
    /// Set when the trial aborted with a runtime error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Trial {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Outcome of evaluating one content task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub task: String,
    /// Configured trial count.
    pub trials: u32,
    /// Trials actually run; less than `trials` after an early exit.
    pub trials_run: u32,
    pub passed: u32,
    pub required_passes: u32,
    pub pass_rate: f64,
    /// At least one trial passed.
    pub pass_at_k: bool,
    /// Every configured trial passed.
    pub pass_k: bool,
    pub trial_results: Vec<Trial>,
    pub total_usage: UsageStats,
}

impl EvalResult {
    pub fn met_requirement(&self) -> bool {
        self.passed >= self.required_passes
    }

    pub fn exited_early(&self) -> bool {
        self.trials_run < self.trials
    }
}

/// `passed / run`, or 0 when nothing ran.
pub fn pass_rate(passed: u32, run: u32) -> f64 {
    if run == 0 {
        0.0
    } else {
        f64::from(passed) / f64::from(run)
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Progress callbacks fired by evaluators. All methods default to no-ops.
pub trait TrialObserver: Send + Sync {
    fn trial_started(&self, _task: &str, _trial: u32) {}

    fn trial_completed(&self, _task: &str, _trial: u32, _passed: bool, _duration: Duration) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TrialObserver for NoopObserver {}
