//! A single content trial: converse, grade, decide.

use std::time::Instant;

use anyhow::{Context, Result};
use regex::RegexBuilder;
use serde::Serialize;
use tracing::debug;

use super::{ChatMessage, Trial};
use crate::client::{Message, MessageRequest, MessagesClient, Role};
use crate::grader::code::TURN_SEPARATOR;
use crate::grader::{GraderConfig, GraderKind, GraderResult, ModelGrader, run_code_grader};
use crate::task::{ExecutionMode, SuccessCriteria, Task};
use crate::transcript::TranscriptWriter;
use crate::usage::UsageStats;

const GENERATION_MAX_TOKENS: u32 = 16384;

/// Everything about a task that is fixed across its trials.
#[derive(Debug, Clone)]
pub struct PreparedTask {
    pub system_prompt: String,
    pub user_message: String,
    pub reference: Option<String>,
}

/// Shared dependencies of a trial run.
pub(crate) struct TrialEnv<'a> {
    pub client: &'a dyn MessagesClient,
    pub generation_model: &'a str,
    pub grader_model: &'a str,
    pub transcripts: Option<&'a TranscriptWriter>,
}

#[derive(Serialize)]
struct TrialTranscript<'a> {
    transcript: &'a [ChatMessage],
    output: &'a str,
    grader_results: &'a [GraderResult],
}

/// Text handed to graders.
///
/// Interactive sessions are graded on the full role-labelled conversation;
/// other modes on the assistant replies only.
pub fn grading_output(mode: ExecutionMode, transcript: &[ChatMessage]) -> String {
    match mode {
        ExecutionMode::Interactive => transcript
            .iter()
            .map(|m| format!("**{}:**\n{}", m.role.as_str().to_uppercase(), m.content))
            .collect::<Vec<_>>()
            .join(TURN_SEPARATOR),
        ExecutionMode::Autonomous | ExecutionMode::Challenger => transcript
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(TURN_SEPARATOR),
    }
}

/// Apply success criteria to grader results.
///
/// The model score is that of the first model grader, or 1.0 when none ran.
pub fn trial_passed(criteria: &SuccessCriteria, results: &[GraderResult]) -> bool {
    let code_ok = results
        .iter()
        .filter(|r| r.kind == GraderKind::Code)
        .all(|r| r.passed);
    let model_score = results
        .iter()
        .find(|r| r.kind == GraderKind::Model)
        .and_then(|r| r.score)
        .unwrap_or(1.0);

    (!criteria.all_code_graders_pass || code_ok)
        && criteria.min_model_score.is_none_or(|min| model_score >= min)
}

async fn generate(
    env: &TrialEnv<'_>,
    system: &str,
    transcript: &[ChatMessage],
    usage: &mut UsageStats,
) -> Result<String> {
    let messages = transcript
        .iter()
        .map(|m| match m.role {
            Role::User => Message::user(m.content.clone()),
            Role::Assistant => Message::assistant(m.content.clone()),
        })
        .collect();
    let request =
        MessageRequest::new(env.generation_model, GENERATION_MAX_TOKENS, messages).system(system);
    let response = env.client.create(&request).await?;
    usage.record(&response.usage, env.generation_model);
    Ok(response.first_text().to_string())
}

async fn run_graders(
    env: &TrialEnv<'_>,
    graders: &[GraderConfig],
    output: &str,
    reference: Option<&str>,
    usage: &mut UsageStats,
) -> Result<Vec<GraderResult>> {
    let judge = ModelGrader::new(env.client, env.grader_model);
    let mut results = Vec::with_capacity(graders.len());
    for grader in graders {
        let result = match grader {
            GraderConfig::Code { checks } => run_code_grader(output, checks),
            GraderConfig::Model { rubric, threshold } => {
                judge
                    .grade(output, rubric, *threshold, reference, usage)
                    .await?
            }
        };
        results.push(result);
    }
    Ok(results)
}

/// Run one trial. Usage is accumulated into `usage` even when the trial
/// errors part-way.
pub(crate) async fn run_trial(
    env: &TrialEnv<'_>,
    task: &Task,
    prepared: &PreparedTask,
    trial_number: u32,
    usage: &mut UsageStats,
) -> Result<Trial> {
    let started = Instant::now();
    let mut transcript = vec![ChatMessage::user(prepared.user_message.clone())];

    let mut last_reply = generate(env, &prepared.system_prompt, &transcript, usage).await?;
    transcript.push(ChatMessage::assistant(last_reply.clone()));

    for (index, turn) in task.input.conversation().iter().enumerate() {
        if let Some(trigger) = &turn.trigger {
            let re = RegexBuilder::new(trigger)
                .case_insensitive(true)
                .build()
                .with_context(|| format!("invalid trigger {trigger:?}"))?;
            if !re.is_match(&last_reply) {
                debug!(task = %task.name, trial = trial_number, turn = index, "trigger not matched, skipping turn");
                continue;
            }
        }
        transcript.push(ChatMessage::user(turn.user_message.clone()));
        last_reply = generate(env, &prepared.system_prompt, &transcript, usage).await?;
        transcript.push(ChatMessage::assistant(last_reply.clone()));
    }

    let output = grading_output(task.mode(), &transcript);
    let grader_results = run_graders(
        env,
        &task.graders,
        &output,
        prepared.reference.as_deref(),
        usage,
    )
    .await?;
    let passed = trial_passed(&task.success_criteria, &grader_results);

    if let Some(writer) = env.transcripts {
        let body = TrialTranscript {
            transcript: &transcript,
            output: &output,
            grader_results: &grader_results,
        };
        if let Err(e) = writer.write(&task.name, trial_number, &body) {
            tracing::warn!(task = %task.name, trial = trial_number, error = %e, "failed to save transcript");
        }
    }

    Ok(Trial {
        task: task.name.clone(),
        trial_number,
        transcript,
        output,
        grader_results,
        passed,
        duration_ms: started.elapsed().as_millis() as u64,
        usage: *usage,
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grader::{GraderDetails, ModelGraderDetails};

    fn code(passed: bool) -> GraderResult {
        GraderResult {
            kind: GraderKind::Code,
            passed,
            score: None,
            details: GraderDetails::Checks(vec![]),
        }
    }

    fn model(score: f64) -> GraderResult {
        GraderResult {
            kind: GraderKind::Model,
            passed: score >= 0.7,
            score: Some(score),
            details: GraderDetails::Model(ModelGraderDetails {
                scores: Default::default(),
                overall: score,
                feedback: String::new(),
            }),
        }
    }

    fn criteria(all_code: bool, min_score: Option<f64>) -> SuccessCriteria {
        SuccessCriteria {
            all_code_graders_pass: all_code,
            min_model_score: min_score,
            min_pass_rate: None,
        }
    }

    #[test]
    fn interactive_output_labels_roles() {
        let t = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello?")];
        assert_eq!(
            grading_output(ExecutionMode::Interactive, &t),
            "**USER:**\nhi\n\n---\n\n**ASSISTANT:**\nhello?"
        );
    }

    #[test]
    fn other_modes_grade_assistant_only() {
        let t = vec![
            ChatMessage::user("go"),
            ChatMessage::assistant("one"),
            ChatMessage::user("more"),
            ChatMessage::assistant("two"),
        ];
        assert_eq!(
            grading_output(ExecutionMode::Challenger, &t),
            "one\n\n---\n\ntwo"
        );
    }

    #[test]
    fn failing_code_grader_fails_only_when_required() {
        let results = [code(false)];
        assert!(!trial_passed(&criteria(true, None), &results));
        assert!(trial_passed(&criteria(false, None), &results));
    }

    #[test]
    fn model_score_defaults_to_one() {
        assert!(trial_passed(&criteria(true, Some(0.9)), &[code(true)]));
    }

    #[test]
    fn model_score_compared_to_minimum() {
        assert!(trial_passed(&criteria(true, Some(0.6)), &[code(true), model(0.6)]));
        assert!(!trial_passed(&criteria(true, Some(0.6)), &[code(true), model(0.5)]));
    }
}
