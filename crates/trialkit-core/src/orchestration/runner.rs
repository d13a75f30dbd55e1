//! The tool-use loop and task-level evaluation for orchestration tasks.

use std::time::Instant;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::tools::{MockHandlers, orchestration_tools};
use super::{
    AssertionResult, OrchestratorEvalResult, OrchestratorTask, OrchestratorTrial, ToolInvocation,
};
use crate::client::{ContentBlock, Message, MessageRequest, MessagesClient, Role, ToolSchema};
use crate::config::HarnessConfig;
use crate::eval::{TrialObserver, TrialTally, pass_rate};
use crate::prompt::{PluginDir, compose_orchestrator_prompt};
use crate::transcript::TranscriptWriter;
use crate::usage::UsageStats;

/// Model calls per trial, at most.
pub const MAX_TOOL_ITERATIONS: usize = 15;
const ORCHESTRATION_MAX_TOKENS: u32 = 4096;

#[derive(Serialize)]
struct OrchestrationTranscript<'a> {
    tool_invocations: &'a [ToolInvocation],
    assertion_results: &'a [AssertionResult],
    transcript: &'a [Message],
}

/// Runs orchestration tasks against a chat client.
pub struct OrchestrationRunner<'a> {
    client: &'a dyn MessagesClient,
    model: String,
    min_pass_rate: f64,
    plugin: PluginDir,
    tools: Vec<ToolSchema>,
    transcripts: Option<TranscriptWriter>,
}

impl<'a> OrchestrationRunner<'a> {
    pub fn new(client: &'a dyn MessagesClient, config: &HarnessConfig) -> Self {
        Self {
            client,
            model: config.generation_model.clone(),
            min_pass_rate: config.min_pass_rate,
            plugin: PluginDir::new(&config.plugin_root),
            tools: orchestration_tools(),
            transcripts: config.transcripts_dir.as_ref().map(TranscriptWriter::new),
        }
    }

    /// Default handlers overlaid with the task's static overrides.
    pub fn handlers_for(&self, task: &OrchestratorTask) -> MockHandlers {
        MockHandlers::defaults(&self.plugin).with_overrides(&task.mock_overrides)
    }

    /// Run the tool-use loop once and evaluate assertions.
    ///
    /// The loop stops when a response carries no tool use, its stop reason
    /// is not `tool_use`, or [`MAX_TOOL_ITERATIONS`] calls have been made.
    pub async fn run_trial(
        &self,
        task: &OrchestratorTask,
        handlers: &MockHandlers,
        trial_number: u32,
        usage: &mut UsageStats,
    ) -> Result<OrchestratorTrial> {
        let started = Instant::now();
        let system =
            compose_orchestrator_prompt(&task.context_files, &task.system_instructions, &self.plugin);
        let mut transcript = vec![Message::user(task.user_message.clone())];
        let mut invocations: Vec<ToolInvocation> = Vec::new();

        for iteration in 0..MAX_TOOL_ITERATIONS {
            let request =
                MessageRequest::new(&self.model, ORCHESTRATION_MAX_TOKENS, transcript.clone())
                    .system(system.clone())
                    .tools(self.tools.clone());
            let response = self.client.create(&request).await?;
            usage.record(&response.usage, &self.model);

            let mut results = Vec::new();
            for (id, name, input) in response.tool_uses() {
                debug!(task = %task.name, trial = trial_number, iteration, tool = name, "tool call");
                invocations.push(ToolInvocation {
                    name: name.to_string(),
                    input: input.clone(),
                    id: id.to_string(),
                    order: invocations.len(),
                });
                results.push(ContentBlock::ToolResult {
                    tool_use_id: id.to_string(),
                    content: handlers.respond(name, input),
                });
            }

            transcript.push(Message {
                role: Role::Assistant,
                content: response.known_content(),
            });

            if !response.wants_tools() || results.is_empty() {
                break;
            }
            transcript.push(Message {
                role: Role::User,
                content: results,
            });
        }

        let assertion_results: Vec<AssertionResult> = task
            .assertions
            .iter()
            .map(|a| a.evaluate(&invocations))
            .collect();
        let passed = assertion_results.iter().all(|r| r.passed);

        if let Some(writer) = &self.transcripts {
            let body = OrchestrationTranscript {
                tool_invocations: &invocations,
                assertion_results: &assertion_results,
                transcript: &transcript,
            };
            if let Err(e) = writer.write(&task.name, trial_number, &body) {
                warn!(task = %task.name, trial = trial_number, error = %e, "failed to save transcript");
            }
        }

        Ok(OrchestratorTrial {
            task: task.name.clone(),
            trial_number,
            tool_invocations: invocations,
            assertion_results,
            passed,
            duration_ms: started.elapsed().as_millis() as u64,
            usage: *usage,
            error: None,
        })
    }

    /// Evaluate `task` with the shared early-exit policy.
    ///
    /// A trial that errors counts as failed, with no invocations and every
    /// assertion marked failed.
    pub async fn evaluate_task(
        &self,
        task: &OrchestratorTask,
        observer: &dyn TrialObserver,
    ) -> OrchestratorEvalResult {
        let handlers = self.handlers_for(task);
        let min_pass_rate = task.min_pass_rate.unwrap_or(self.min_pass_rate);
        let mut tally = TrialTally::new(task.trials, min_pass_rate);

        info!(
            task = %task.name,
            trials = task.trials,
            required = tally.required(),
            model = %self.model,
            "evaluating orchestration task"
        );

        let mut trial_results = Vec::new();
        let mut total_usage = UsageStats::default();

        for n in 1..=task.trials {
            observer.trial_started(&task.name, n);
            let started = Instant::now();
            let mut usage = UsageStats::default();

            let trial = match self.run_trial(task, &handlers, n, &mut usage).await {
                Ok(trial) => trial,
                Err(e) => {
                    warn!(task = %task.name, trial = n, error = %format!("{e:#}"), "trial errored");
                    OrchestratorTrial {
                        task: task.name.clone(),
                        trial_number: n,
                        tool_invocations: Vec::new(),
                        assertion_results: task
                            .assertions
                            .iter()
                            .map(|a| AssertionResult {
                                description: a.description.clone(),
                                passed: false,
                            })
                            .collect(),
                        passed: false,
                        duration_ms: started.elapsed().as_millis() as u64,
                        usage,
                        error: Some(format!("{e:#}")),
                    }
                }
            };

            total_usage += &trial.usage;
            if trial.passed {
                info!(task = %task.name, trial = n, duration_ms = trial.duration_ms, "trial passed");
            } else {
                let failures: Vec<&str> =
                    trial.failed_assertions().map(|r| r.description.as_str()).collect();
                info!(task = %task.name, trial = n, duration_ms = trial.duration_ms, failures = ?failures, "trial failed");
            }
            observer.trial_completed(
                &task.name,
                n,
                trial.passed,
                std::time::Duration::from_millis(trial.duration_ms),
            );

            let stop = tally.record(trial.passed);
            trial_results.push(trial);
            if stop {
                break;
            }
        }

        let trials_run = trial_results.len() as u32;
        OrchestratorEvalResult {
            task: task.name.clone(),
            trials: task.trials,
            trials_run,
            passed: tally.passes(),
            required_passes: tally.required(),
            pass_rate: pass_rate(tally.passes(), trials_run),
            trial_results,
            total_usage,
        }
    }
}
