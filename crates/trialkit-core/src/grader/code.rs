//! Deterministic text checks on generated output.
//!
//! Every configured check produces one [`CheckResult`]; the grader passes
//! when all of them pass. Checks are independent of each other and of
//! their order.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{CheckResult, GraderDetails, GraderKind, GraderResult};

/// Separator between turns in joined transcript output.
pub const TURN_SEPARATOR: &str = "\n\n---\n\n";

/// Which checks to run. Empty lists and `false` flags are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodeChecks {
    /// `##` headers that must appear (case-insensitive, optional ordinal).
    pub sections_present: Vec<String>,
    pub min_word_count: Option<usize>,
    /// Reject `{UPPER_CASE}` placeholders and `[TODO]`-style markers
    /// outside fenced code blocks.
    pub no_placeholder_text: bool,
    pub contains: Vec<String>,
    pub not_contains: Vec<String>,
    /// Minimum number of turns, counted as `---\n\n` separators + 1.
    pub min_turns: Option<usize>,
    pub contains_questions: bool,
    pub no_self_answering: bool,
}

static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```|~~~.*?~~~").expect("valid code block regex"));

// Uppercase start plus at least one more uppercase/underscore, so `{id}`
// and `{token}` are not flagged.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{[A-Z][A-Z_]+\}|\[TODO\]|\[PLACEHOLDER\]|\[TBD\]")
        .expect("valid placeholder regex")
});

static QUESTION_THEN_BLANK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\?[^\n]*\n\n").expect("valid question regex"));

static PROMPT_LIKE_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:\d+\.|[-*]|\*\*|Enter|Choose|Select|Type|Would you like|What would you|How would you|Do you want)",
    )
    .expect("valid prompt prefix regex")
});

/// Run the configured checks against `output`.
pub fn run_code_grader(output: &str, checks: &CodeChecks) -> GraderResult {
    let mut results = Vec::new();

    for section in &checks.sections_present {
        let found = section_present(output, section);
        results.push(CheckResult::new(format!("section_{section}"), found, || {
            format!("Missing section: {section}")
        }));
    }

    if let Some(min) = checks.min_word_count {
        let count = word_count(output);
        results.push(CheckResult::new("min_word_count", count >= min, || {
            format!("Word count {count} < {min}")
        }));
    }

    if checks.no_placeholder_text {
        let found = has_placeholder(output);
        results.push(CheckResult::new("no_placeholder_text", !found, || {
            "Contains placeholder text".to_string()
        }));
    }

    let lowered = output.to_lowercase();

    for text in &checks.contains {
        let found = lowered.contains(&text.to_lowercase());
        results.push(CheckResult::new(format!("contains_{text}"), found, || {
            format!("Missing expected text: {text}")
        }));
    }

    for text in &checks.not_contains {
        let found = lowered.contains(&text.to_lowercase());
        results.push(CheckResult::new(format!("not_contains_{text}"), !found, || {
            format!("Contains forbidden text: {text}")
        }));
    }

    if let Some(min) = checks.min_turns {
        let turns = turn_count(output);
        results.push(CheckResult::new("min_turns", turns >= min, || {
            format!("Only {turns} turns, expected {min}")
        }));
    }

    if checks.contains_questions {
        let found = output.contains('?');
        results.push(CheckResult::new("contains_questions", found, || {
            "No questions found in output".to_string()
        }));
    }

    if checks.no_self_answering {
        let found = has_self_answer(output);
        results.push(CheckResult::new("no_self_answering", !found, || {
            "Detected self-answering behavior".to_string()
        }));
    }

    GraderResult {
        kind: GraderKind::Code,
        passed: results.iter().all(|r| r.passed),
        score: None,
        details: GraderDetails::Checks(results),
    }
}

/// `## [N.] <section>` at the start of any line, case-insensitive.
fn section_present(output: &str, section: &str) -> bool {
    let pattern = format!(r"(?im)^##\s*(?:\d+\.?\s*)?{}", regex::escape(section));
    Regex::new(&pattern)
        .map(|re| re.is_match(output))
        .unwrap_or(false)
}

fn word_count(output: &str) -> usize {
    output.split_whitespace().count()
}

fn turn_count(output: &str) -> usize {
    output.matches("---\n\n").count() + 1
}

fn has_placeholder(output: &str) -> bool {
    let stripped = CODE_BLOCK.replace_all(output, "");
    PLACEHOLDER.is_match(&stripped)
}

/// A question line, a blank line, then a word character that does not open
/// a list item or a prompt phrase.
fn has_self_answer(output: &str) -> bool {
    QUESTION_THEN_BLANK.find_iter(output).any(|m| {
        let rest = &output[m.end()..];
        let starts_with_word = rest
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        starts_with_word && !PROMPT_LIKE_START.is_match(rest)
    })
}
