//! `trialkit run` command: evaluate task files concurrently.
//!
//! Each task runs on its own worker, bounded by a semaphore. A worker owns
//! its usage counters and, when its task finishes, appends one immutable
//! record to the usage ledger. The suite total is folded from the ledger.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use trialkit_core::client::{AnthropicClient, ApiError, max_workers};
use trialkit_core::config::HarnessConfig;
use trialkit_core::eval::{EvalResult, Evaluator};
use trialkit_core::orchestration::{OrchestrationRunner, OrchestratorEvalResult};
use trialkit_core::usage::{UsageLedger, UsageRecord, UsageStats};

use crate::report::{self, ProgressPrinter};
use crate::task_file::{TaskFile, load_all};

pub struct RunOptions {
    pub files: Vec<PathBuf>,
    pub timeout: Option<Duration>,
    pub ledger_dir: Option<PathBuf>,
}

enum Outcome {
    Content(EvalResult),
    Orchestration(OrchestratorEvalResult),
    Failed { task: String, error: String },
}

impl Outcome {
    fn met(&self) -> bool {
        match self {
            Outcome::Content(r) => r.met_requirement(),
            Outcome::Orchestration(r) => r.met_requirement(),
            Outcome::Failed { .. } => false,
        }
    }

    fn usage(&self) -> UsageStats {
        match self {
            Outcome::Content(r) => r.total_usage,
            Outcome::Orchestration(r) => r.total_usage,
            Outcome::Failed { .. } => UsageStats::default(),
        }
    }

    fn summary(&self) -> Vec<String> {
        match self {
            Outcome::Content(r) => report::eval_summary(r),
            Outcome::Orchestration(r) => report::orchestration_summary(r),
            Outcome::Failed { task, error } => vec![format!("FAIL {task}: {error}")],
        }
    }
}

/// Default ledger location: `<transcripts>/usage`, or `./usage` when
/// transcripts are disabled.
pub fn default_ledger_dir(config: &HarnessConfig) -> PathBuf {
    config
        .transcripts_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("usage")
}

/// Run the run command. Returns whether every task met its requirement.
pub async fn run_tasks(config: HarnessConfig, options: RunOptions) -> Result<bool> {
    let tasks = load_all(&options.files)?;

    let client = match crate::config::api_client(&config) {
        Ok(client) => Arc::new(client),
        Err(ApiError::MissingApiKey) => {
            println!("ANTHROPIC_API_KEY not set -- skipping {} task(s).", tasks.len());
            return Ok(true);
        }
        Err(e) => return Err(e.into()),
    };

    let workers = match config.max_workers {
        Some(n) => n.max(1),
        None => match client.probe_rate_limits(&config.generation_model).await {
            Ok(limits) => max_workers(Some(&limits)),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "rate limit probe failed, using fallback worker count");
                max_workers(None)
            }
        },
    };

    let ledger = UsageLedger::new(
        options
            .ledger_dir
            .clone()
            .unwrap_or_else(|| default_ledger_dir(&config)),
    );
    let cleared = ledger.clear()?;
    if cleared > 0 {
        info!(cleared, dir = %ledger.dir().display(), "cleared previous usage records");
    }

    println!(
        "Running {} task(s) with {workers} worker(s) (generation: {}, grader: {})",
        tasks.len(),
        config.generation_model,
        config.grader_model
    );

    let semaphore = Arc::new(Semaphore::new(workers));
    let config = Arc::new(config);
    let mut join_set = JoinSet::new();

    for (index, task) in tasks.into_iter().enumerate() {
        let permit = Arc::clone(&semaphore).acquire_owned().await?;
        let client = Arc::clone(&client);
        let config = Arc::clone(&config);
        let ledger = ledger.clone();
        let timeout = options.timeout;

        join_set.spawn(async move {
            let _permit = permit;
            let name = task.name().to_string();
            let work = run_one(client.as_ref(), &config, &task);
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(task = %name, timeout_secs = limit.as_secs(), "task timed out");
                        Outcome::Failed {
                            task: name.clone(),
                            error: format!("timed out after {}s", limit.as_secs()),
                        }
                    }
                },
                None => work.await,
            };

            let record = UsageRecord::new(format!("worker-{index}"), name.clone(), outcome.usage());
            if let Err(e) = ledger.append(&record) {
                warn!(task = %name, error = %format!("{e:#}"), "failed to record usage");
            }
            (index, outcome)
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(pair) => outcomes.push(pair),
            Err(e) => warn!(error = %e, "task worker panicked"),
        }
    }
    outcomes.sort_by_key(|(index, _)| *index);

    println!();
    let mut all_met = outcomes.len() == options.files.len();
    for (_, outcome) in &outcomes {
        for line in outcome.summary() {
            println!("{line}");
        }
        all_met &= outcome.met();
    }

    let met_count = outcomes.iter().filter(|(_, o)| o.met()).count();
    println!();
    println!("Tasks meeting requirement: {met_count}/{}", options.files.len());
    report::print_usage("Suite usage:", &ledger.total()?);

    Ok(all_met)
}

async fn run_one(
    client: &AnthropicClient,
    config: &HarnessConfig,
    task: &TaskFile,
) -> Outcome {
    let observer = ProgressPrinter;
    match task {
        TaskFile::Content(task) => {
            match Evaluator::new(client, config).evaluate_task(task, &observer).await {
                Ok(result) => Outcome::Content(result),
                Err(e) => Outcome::Failed {
                    task: task.name.clone(),
                    error: format!("{e:#}"),
                },
            }
        }
        TaskFile::Orchestration(task) => Outcome::Orchestration(
            OrchestrationRunner::new(client, config)
                .evaluate_task(task, &observer)
                .await,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_defaults_under_transcripts() {
        let config = HarnessConfig {
            transcripts_dir: Some(PathBuf::from("out")),
            ..HarnessConfig::default()
        };
        assert_eq!(default_ledger_dir(&config), PathBuf::from("out/usage"));

        let config = HarnessConfig {
            transcripts_dir: None,
            ..HarnessConfig::default()
        };
        assert_eq!(default_ledger_dir(&config), PathBuf::from("./usage"));
    }
}
