//! Task-level evaluation loop for content tasks.

use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::trial::{PreparedTask, TrialEnv, run_trial};
use super::{EvalResult, Trial, TrialObserver, TrialTally, pass_rate};
use crate::client::MessagesClient;
use crate::config::HarnessConfig;
use crate::fixtures::FixtureStore;
use crate::prompt::{PluginDir, compose_system_prompt, compose_user_message};
use crate::task::Task;
use crate::transcript::TranscriptWriter;
use crate::usage::UsageStats;

/// Runs content tasks against a chat client.
pub struct Evaluator<'a> {
    client: &'a dyn MessagesClient,
    generation_model: String,
    grader_model: String,
    min_pass_rate: f64,
    plugin: PluginDir,
    fixtures: FixtureStore,
    transcripts: Option<TranscriptWriter>,
}

impl<'a> Evaluator<'a> {
    pub fn new(client: &'a dyn MessagesClient, config: &HarnessConfig) -> Self {
        Self {
            client,
            generation_model: config.generation_model.clone(),
            grader_model: config.grader_model.clone(),
            min_pass_rate: config.min_pass_rate,
            plugin: PluginDir::new(&config.plugin_root),
            fixtures: FixtureStore::new(&config.fixtures_dir),
            transcripts: config.transcripts_dir.as_ref().map(TranscriptWriter::new),
        }
    }

    /// Compose the prompts shared by every trial of `task`.
    ///
    /// Fails if a fixture the opening message depends on is missing.
    pub fn prepare(&self, task: &Task) -> Result<PreparedTask> {
        let system_prompt = compose_system_prompt(&task.input, &self.plugin);
        let user_message = compose_user_message(&task.input, &self.fixtures)
            .with_context(|| format!("failed to prepare task {:?}", task.name))?;
        let reference = task
            .reference_solution
            .as_deref()
            .and_then(|r| self.fixtures.load_reference(r));
        Ok(PreparedTask {
            system_prompt,
            user_message,
            reference,
        })
    }

    /// Evaluate `task` with early exit.
    ///
    /// Only preparation errors are returned. A trial that errors is logged
    /// and counted as a failed trial.
    pub async fn evaluate_task(
        &self,
        task: &Task,
        observer: &dyn TrialObserver,
    ) -> Result<EvalResult> {
        let prepared = self.prepare(task)?;
        let min_pass_rate = task.success_criteria.min_pass_rate.unwrap_or(self.min_pass_rate);
        let mut tally = TrialTally::new(task.trials, min_pass_rate);
        let env = TrialEnv {
            client: self.client,
            generation_model: &self.generation_model,
            grader_model: &self.grader_model,
            transcripts: self.transcripts.as_ref(),
        };

        info!(
            task = %task.name,
            mode = %task.mode(),
            trials = task.trials,
            required = tally.required(),
            "evaluating task"
        );

        let mut trial_results = Vec::new();
        let mut total_usage = UsageStats::default();

        for n in 1..=task.trials {
            observer.trial_started(&task.name, n);
            let started = Instant::now();
            let mut usage = UsageStats::default();

            let trial = match run_trial(&env, task, &prepared, n, &mut usage).await {
                Ok(trial) => trial,
                Err(e) => {
                    warn!(task = %task.name, trial = n, error = %format!("{e:#}"), "trial errored");
                    Trial {
                        task: task.name.clone(),
                        trial_number: n,
                        transcript: Vec::new(),
                        output: String::new(),
                        grader_results: Vec::new(),
                        passed: false,
                        duration_ms: started.elapsed().as_millis() as u64,
                        usage,
                        error: Some(format!("{e:#}")),
                    }
                }
            };

            total_usage += &trial.usage;
            info!(task = %task.name, trial = n, passed = trial.passed, duration_ms = trial.duration_ms, "trial finished");
            observer.trial_completed(&task.name, n, trial.passed, trial.duration());

            let stop = tally.record(trial.passed);
            trial_results.push(trial);
            if stop {
                if tally.runs() < task.trials {
                    info!(task = %task.name, passes = tally.passes(), runs = tally.runs(), "early exit");
                }
                break;
            }
        }

        let trials_run = trial_results.len() as u32;
        let passed = tally.passes();
        Ok(EvalResult {
            task: task.name.clone(),
            trials: task.trials,
            trials_run,
            passed,
            required_passes: tally.required(),
            pass_rate: pass_rate(passed, trials_run),
            pass_at_k: passed > 0,
            pass_k: passed == task.trials,
            trial_results,
            total_usage,
        })
    }
}
