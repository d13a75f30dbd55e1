//! Console output: progress lines, per-task summaries, usage totals.

use std::time::Duration;

use trialkit_core::eval::{EvalResult, TrialObserver};
use trialkit_core::grader::GraderDetails;
use trialkit_core::orchestration::OrchestratorEvalResult;
use trialkit_core::usage::UsageStats;

/// `850ms`, `12.3s`, `2m 5s`.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        let secs = d.as_secs();
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

/// `950`, `12.3k`, `1.5M`.
pub fn format_token_count(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}k", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

pub fn usage_lines(usage: &UsageStats) -> Vec<String> {
    vec![
        format!("  API calls:     {}", usage.api_calls),
        format!("  Input tokens:  {}", format_token_count(usage.input_tokens)),
        format!("  Output tokens: {}", format_token_count(usage.output_tokens)),
        format!(
            "  Cache tokens:  {} created, {} read",
            format_token_count(usage.cache_creation_input_tokens),
            format_token_count(usage.cache_read_input_tokens)
        ),
        format!("  Est. cost:     ${:.4}", usage.estimated_cost_usd),
    ]
}

pub fn print_usage(title: &str, usage: &UsageStats) {
    println!("{title}");
    for line in usage_lines(usage) {
        println!("{line}");
    }
}

fn verdict(met: bool) -> &'static str {
    if met { "PASS" } else { "FAIL" }
}

/// Summary block for a content task.
pub fn eval_summary(result: &EvalResult) -> Vec<String> {
    let mut lines = vec![format!(
        "{} {}: {}/{} passed (required {}, ran {}/{}), pass@k={} pass^k={}",
        verdict(result.met_requirement()),
        result.task,
        result.passed,
        result.trials_run,
        result.required_passes,
        result.trials_run,
        result.trials,
        result.pass_at_k,
        result.pass_k,
    )];
    for trial in &result.trial_results {
        let mark = if trial.passed { "+" } else { "-" };
        lines.push(format!(
            "  {mark} trial {} ({})",
            trial.trial_number,
            format_duration(trial.duration())
        ));
        if let Some(error) = &trial.error {
            lines.push(format!("      error: {error}"));
        }
        for grader in &trial.grader_results {
            match &grader.details {
                GraderDetails::Checks(_) => {
                    for check in grader.failed_checks() {
                        lines.push(format!(
                            "      check {} failed: {}",
                            check.check,
                            check.message.as_deref().unwrap_or("")
                        ));
                    }
                }
                GraderDetails::Model(model) => {
                    lines.push(format!("      model score {:.2}: {}", model.overall, model.feedback));
                }
            }
        }
    }
    lines
}

/// Summary block for an orchestration task.
pub fn orchestration_summary(result: &OrchestratorEvalResult) -> Vec<String> {
    let mut lines = vec![format!(
        "{} {}: {}/{} passed (required {}, ran {}/{})",
        verdict(result.met_requirement()),
        result.task,
        result.passed,
        result.trials_run,
        result.required_passes,
        result.trials_run,
        result.trials,
    )];
    for trial in &result.trial_results {
        let mark = if trial.passed { "+" } else { "-" };
        let tools: Vec<&str> = trial
            .tool_invocations
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        lines.push(format!(
            "  {mark} trial {} ({}) tools: [{}]",
            trial.trial_number,
            format_duration(std::time::Duration::from_millis(trial.duration_ms)),
            tools.join(", ")
        ));
        if let Some(error) = &trial.error {
            lines.push(format!("      error: {error}"));
        }
        for failed in trial.failed_assertions() {
            lines.push(format!("      assertion failed: {}", failed.description));
        }
    }
    lines
}

/// Prints one line per finished trial.
#[derive(Debug, Default)]
pub struct ProgressPrinter;

impl TrialObserver for ProgressPrinter {
    fn trial_completed(&self, task: &str, trial: u32, passed: bool, duration: Duration) {
        let status = if passed { "passed" } else { "failed" };
        println!("[{task}] trial {trial} {status} in {}", format_duration(duration));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trialkit_core::eval::Trial;
    use trialkit_core::grader::{CheckResult, GraderKind, GraderResult};

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(format_duration(Duration::from_millis(12_340)), "12.3s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }

    #[test]
    fn token_counts() {
        assert_eq!(format_token_count(950), "950");
        assert_eq!(format_token_count(12_345), "12.3k");
        assert_eq!(format_token_count(1_500_000), "1.5M");
    }

    #[test]
    fn eval_summary_lists_failed_checks() {
        let result = EvalResult {
            task: "brief".into(),
            trials: 3,
            trials_run: 2,
            passed: 0,
            required_passes: 2,
            pass_rate: 0.0,
            pass_at_k: false,
            pass_k: false,
            trial_results: vec![Trial {
                task: "brief".into(),
                trial_number: 1,
                transcript: vec![],
                output: String::new(),
                grader_results: vec![GraderResult {
                    kind: GraderKind::Code,
                    passed: false,
                    score: None,
                    details: GraderDetails::Checks(vec![CheckResult {
                        check: "section: Problem".into(),
                        passed: false,
                        message: Some("Missing section".into()),
                    }]),
                }],
                passed: false,
                duration_ms: 1_500,
                usage: UsageStats::default(),
                error: None,
            }],
            total_usage: UsageStats::default(),
        };

        let lines = eval_summary(&result);
        assert!(lines[0].starts_with("FAIL brief: 0/2 passed"));
        assert_eq!(lines[1], "  - trial 1 (1.5s)");
        assert!(lines[2].contains("section: Problem failed: Missing section"));
    }
}
