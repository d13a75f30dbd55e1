//! Rubric scoring by a judge model.
//!
//! The judge is asked for a single JSON object
//! `{"scores": {..}, "overall": n, "feedback": "..."}`. Its reply is parsed
//! by [`parse_grader_response`], which tries three extraction strategies in
//! order. When none yields a valid object the grader fails closed with a
//! zero score.

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::client::{Message, MessageRequest, MessagesClient};
use crate::usage::UsageStats;

use super::{GraderDetails, GraderKind, GraderResult, ModelGraderDetails};

const GRADER_MAX_TOKENS: u32 = 1024;

const GRADER_SYSTEM_PROMPT: &str = r#"You are a strict document quality evaluator. You score AI-generated documents against rubrics.

You MUST respond with a single JSON object and nothing else. No markdown, no explanation, no preamble.

Required JSON schema:
{
  "scores": { "<dimension_name>": <0.0-1.0>, ... },
  "overall": <0.0-1.0>,
  "feedback": "<brief actionable feedback>"
}

Rules:
- Every dimension in the rubric must appear in "scores"
- "overall" is the weighted average reflecting relative importance of each dimension
- "feedback" is 1-3 sentences, specific and actionable
- Output ONLY the JSON object"#;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraderParseError {
    #[error("no valid grader JSON found in response")]
    NoValidJson,
}

static FENCED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)\n?\s*```").expect("valid fence regex")
});

/// Parse a judge reply into [`ModelGraderDetails`].
///
/// Strategies, first success wins:
/// 1. the trimmed reply as JSON;
/// 2. the contents of the first fenced code block;
/// 3. the span from the first `{` to the last `}`.
pub fn parse_grader_response(response: &str) -> Result<ModelGraderDetails, GraderParseError> {
    let trimmed = response.trim();

    if let Some(details) = try_parse(trimmed) {
        return Ok(details);
    }

    if let Some(inner) = FENCED.captures(trimmed).and_then(|c| c.get(1))
        && let Some(details) = try_parse(inner.as_str())
    {
        return Ok(details);
    }

    if let (Some(first), Some(last)) = (trimmed.find('{'), trimmed.rfind('}'))
        && last > first
        && let Some(details) = try_parse(&trimmed[first..=last])
    {
        return Ok(details);
    }

    Err(GraderParseError::NoValidJson)
}

/// Parse and validate one candidate. `scores` must be an object (its
/// values are kept as given), `overall` a number, `feedback` a string.
fn try_parse(candidate: &str) -> Option<ModelGraderDetails> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    let obj = value.as_object()?;

    let scores = obj.get("scores")?.as_object()?.clone();
    let overall = obj.get("overall")?.as_f64()?;
    let feedback = obj.get("feedback")?.as_str()?.to_string();

    Some(ModelGraderDetails {
        scores,
        overall,
        feedback,
    })
}

fn build_grader_prompt(output: &str, rubric: &str, reference: Option<&str>) -> String {
    let reference_section = reference
        .map(|r| format!("## Reference Solution (for comparison)\n{r}\n\n"))
        .unwrap_or_default();
    format!(
        "{reference_section}## Document to Evaluate\n{output}\n\n## Evaluation Rubric\n{rubric}\n\n\
         Score each dimension on 0-1 and provide overall score with feedback."
    )
}

/// Scores output against a rubric with a judge model.
pub struct ModelGrader<'a> {
    client: &'a dyn MessagesClient,
    model: String,
}

impl<'a> ModelGrader<'a> {
    pub fn new(client: &'a dyn MessagesClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Grade `output`, recording the judge call in `usage`.
    ///
    /// Transport errors propagate. A reply that cannot be parsed is not an
    /// error: it yields score 0 and `passed = false`.
    pub async fn grade(
        &self,
        output: &str,
        rubric: &str,
        threshold: f64,
        reference: Option<&str>,
        usage: &mut UsageStats,
    ) -> Result<GraderResult> {
        let request = MessageRequest::new(
            &self.model,
            GRADER_MAX_TOKENS,
            vec![Message::user(build_grader_prompt(output, rubric, reference))],
        )
        .system(GRADER_SYSTEM_PROMPT);

        let response = self.client.create(&request).await?;
        usage.record(&response.usage, &self.model);

        let text = response.first_text();
        let details = parse_grader_response(text).unwrap_or_else(|e| {
            warn!(model = %self.model, error = %e, "judge reply unparseable, scoring 0");
            ModelGraderDetails {
                scores: serde_json::Map::new(),
                overall: 0.0,
                feedback: format!("Failed to parse grader response: {text}"),
            }
        });

        Ok(GraderResult {
            kind: GraderKind::Model,
            passed: details.overall >= threshold,
            score: Some(details.overall),
            details: GraderDetails::Model(details),
        })
    }
}
