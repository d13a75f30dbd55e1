//! Integration tests for the orchestration tool-use loop.

use serde_json::json;

use trialkit_core::client::ContentBlock;
use trialkit_core::config::HarnessConfig;
use trialkit_core::eval::NoopObserver;
use trialkit_core::orchestration::{
    MAX_TOOL_ITERATIONS, OrchestrationRunner, OrchestratorTask, parse_orchestrator_toml,
};
use trialkit_core::usage::UsageStats;
use trialkit_test_utils::{ScriptedClient, end_turn, scaffold_workspace, tool_use_response};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

const ORDERED_TASK: &str = r#"
name = "gather-then-write"
description = "Input gathering runs before the writer agent"
trials = 1
user_message = "Create a business brief for Acme."
system_instructions = "Templates live in ${CLAUDE_PLUGIN_ROOT}/skills/generating-documents/assets/templates."

[[context_files]]
path = "skills/generating-documents/SKILL.md"
header = "Generating Documents Skill"

[[assertions]]
description = "gathering-input runs before business-writer"
kind = "precedes"
first = [{ tool = "Skill", field = "skill_name", contains = "gathering-input" }]
then = [{ tool = "Task", field = "subagent_type", contains = "business-writer" }]

[[assertions]]
description = "business-writer is spawned"
kind = "called"
matcher = { tool = "Task", field = "subagent_type", equals = "lockstride-kickoff:business-writer" }
"#;

fn ordered_task() -> OrchestratorTask {
    parse_orchestrator_toml(ORDERED_TASK).expect("test task should parse")
}

fn skill_call() -> serde_json::Value {
    json!({"skill_name": "lockstride-kickoff:gathering-input"})
}

fn writer_call() -> serde_json::Value {
    json!({
        "subagent_type": "lockstride-kickoff:business-writer",
        "prompt": "Write the brief"
    })
}

fn config(root: &std::path::Path) -> HarnessConfig {
    scaffold_workspace(root).unwrap()
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ordering_assertion_passes_in_expected_order() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let client = ScriptedClient::with_responses([
        tool_use_response(vec![("t1", "Skill", skill_call())]),
        tool_use_response(vec![("t2", "Task", writer_call())]),
        end_turn(),
    ]);
    let runner = OrchestrationRunner::new(&client, &config);
    let task = ordered_task();

    let mut usage = UsageStats::default();
    let trial = runner
        .run_trial(&task, &runner.handlers_for(&task), 1, &mut usage)
        .await
        .unwrap();

    assert!(trial.passed, "failures: {:?}", trial.failed_assertions().collect::<Vec<_>>());
    assert_eq!(trial.tool_invocations.len(), 2);
    assert_eq!(trial.tool_invocations[0].order, 0);
    assert_eq!(trial.tool_invocations[1].order, 1);
    assert_eq!(usage.api_calls, 3);
}

#[tokio::test]
async fn ordering_assertion_fails_when_reversed() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let client = ScriptedClient::with_responses([
        tool_use_response(vec![("t1", "Task", writer_call())]),
        tool_use_response(vec![("t2", "Skill", skill_call())]),
        end_turn(),
    ]);
    let runner = OrchestrationRunner::new(&client, &config);
    let task = ordered_task();

    let mut usage = UsageStats::default();
    let trial = runner
        .run_trial(&task, &runner.handlers_for(&task), 1, &mut usage)
        .await
        .unwrap();

    assert!(!trial.passed);
    let failed: Vec<&str> = trial
        .failed_assertions()
        .map(|r| r.description.as_str())
        .collect();
    assert_eq!(failed, vec!["gathering-input runs before business-writer"]);
}

// ---------------------------------------------------------------------------
// Loop mechanics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tool_results_are_fed_back_and_prompt_is_composed() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let client = ScriptedClient::with_responses([
        tool_use_response(vec![
            ("t1", "Skill", skill_call()),
            ("t2", "Task", writer_call()),
        ]),
        end_turn(),
    ]);
    let runner = OrchestrationRunner::new(&client, &config);
    let task = ordered_task();

    let mut usage = UsageStats::default();
    let trial = runner
        .run_trial(&task, &runner.handlers_for(&task), 1, &mut usage)
        .await
        .unwrap();
    assert!(trial.passed);

    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 7);

    let system = requests[0].system.as_deref().unwrap();
    let root = config.plugin_root.display().to_string();
    assert!(system.contains("Generating Documents Skill"));
    assert!(system.contains(&format!("{root}/skills/generating-documents/assets/templates")));
    assert!(!system.contains("${CLAUDE_PLUGIN_ROOT}"));

    // Second request: user, assistant tool calls, user tool results.
    let second = &requests[1].messages;
    assert_eq!(second.len(), 3);
    let results = serde_json::to_string(&second[2]).unwrap();
    assert!(results.contains("Structured input captured"));
    assert!(results.contains("Subagent lockstride-kickoff:business-writer completed"));
}

#[tokio::test]
async fn unmodelled_blocks_are_not_sent_back() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let mut first = tool_use_response(vec![("t1", "Skill", skill_call())]);
    first.content.insert(0, ContentBlock::Unknown);
    let client = ScriptedClient::with_responses([first, end_turn()]);
    let runner = OrchestrationRunner::new(&client, &config);
    let task = ordered_task();

    let mut usage = UsageStats::default();
    let trial = runner
        .run_trial(&task, &runner.handlers_for(&task), 1, &mut usage)
        .await
        .unwrap();
    assert_eq!(trial.tool_invocations.len(), 1);

    let requests = client.requests();
    let echoed = &requests[1].messages[1].content;
    assert_eq!(echoed.len(), 1);
    assert!(matches!(echoed[0], ContentBlock::ToolUse { .. }));
}

#[tokio::test]
async fn mock_override_replaces_default_response() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let client = ScriptedClient::with_responses([
        tool_use_response(vec![("t1", "Glob", json!({"pattern": "docs/*.md"}))]),
        end_turn(),
    ]);
    let runner = OrchestrationRunner::new(&client, &config);
    let task = parse_orchestrator_toml(
        r#"
name = "glob-override"
description = "Existing documents are detected"
trials = 1
user_message = "What exists?"

[mock_overrides]
Glob = '["docs/business-brief.md"]'

[[assertions]]
description = "globbed docs"
kind = "called"
matcher = { tool = "Glob" }
"#,
    )
    .unwrap();

    let mut usage = UsageStats::default();
    runner
        .run_trial(&task, &runner.handlers_for(&task), 1, &mut usage)
        .await
        .unwrap();

    let second = serde_json::to_string(&client.requests()[1].messages[2]).unwrap();
    assert!(second.contains("docs/business-brief.md"));
}

#[tokio::test]
async fn loop_stops_at_iteration_cap() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let client = ScriptedClient::new();
    for i in 0..MAX_TOOL_ITERATIONS + 3 {
        client.push(tool_use_response(vec![(
            &format!("t{i}"),
            "Bash",
            json!({"command": "ls"}),
        )]));
    }
    let runner = OrchestrationRunner::new(&client, &config);
    let task = ordered_task();

    let mut usage = UsageStats::default();
    let trial = runner
        .run_trial(&task, &runner.handlers_for(&task), 1, &mut usage)
        .await
        .unwrap();

    assert_eq!(client.call_count(), MAX_TOOL_ITERATIONS);
    assert_eq!(trial.tool_invocations.len(), MAX_TOOL_ITERATIONS);
    assert!(!trial.passed);
}

// ---------------------------------------------------------------------------
// Task-level evaluation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn errored_trial_fails_every_assertion() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let client = ScriptedClient::new();
    client.push_error("overloaded");
    let runner = OrchestrationRunner::new(&client, &config);
    let task = ordered_task();

    let result = runner.evaluate_task(&task, &NoopObserver).await;

    assert_eq!(result.trials_run, 1);
    assert!(!result.met_requirement());
    let trial = &result.trial_results[0];
    assert!(trial.error.as_deref().unwrap().contains("overloaded"));
    assert_eq!(trial.assertion_results.len(), 2);
    assert!(trial.assertion_results.iter().all(|r| !r.passed));
}

#[tokio::test]
async fn evaluate_task_exits_early_on_passes() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let client = ScriptedClient::new();
    for _ in 0..2 {
        client.push(tool_use_response(vec![("t1", "Skill", skill_call())]));
        client.push(tool_use_response(vec![("t2", "Task", writer_call())]));
        client.push(end_turn());
    }
    let runner = OrchestrationRunner::new(&client, &config);
    let mut task = ordered_task();
    task.trials = 3;
    task.min_pass_rate = Some(0.67);

    let result = runner.evaluate_task(&task, &NoopObserver).await;

    assert_eq!(result.required_passes, 2);
    assert_eq!(result.trials_run, 2);
    assert_eq!(result.passed, 2);
    assert!(result.met_requirement());
    assert_eq!(client.remaining(), 0);
}
