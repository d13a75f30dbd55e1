//! Shared test utilities for trialkit integration tests.
//!
//! Provides a scripted [`MessagesClient`] that replays queued responses in
//! order and records every request it receives, plus helpers for building
//! responses and scaffolding a plugin/fixture directory on disk.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;

use trialkit_core::client::{
    ApiUsage, ContentBlock, MessageRequest, MessageResponse, MessagesClient,
};
use trialkit_core::config::HarnessConfig;

enum Scripted {
    Response(MessageResponse),
    Error(String),
}

/// A fake chat client that answers from a FIFO script.
///
/// Requests beyond the end of the script fail with an error, which the
/// evaluators record as a failed trial.
#[derive(Default)]
pub struct ScriptedClient {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<MessageRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client that replays `responses` in order.
    pub fn with_responses(responses: impl IntoIterator<Item = MessageResponse>) -> Self {
        let client = Self::new();
        for r in responses {
            client.push(r);
        }
        client
    }

    pub fn push(&self, response: MessageResponse) -> &Self {
        lock(&self.script).push_back(Scripted::Response(response));
        self
    }

    pub fn push_text(&self, text: &str) -> &Self {
        self.push(text_response(text))
    }

    /// Queue a failing call.
    pub fn push_error(&self, message: &str) -> &Self {
        lock(&self.script).push_back(Scripted::Error(message.to_string()));
        self
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<MessageRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }
}

#[async_trait]
impl MessagesClient for ScriptedClient {
    async fn create(&self, request: &MessageRequest) -> Result<MessageResponse> {
        lock(&self.requests).push(request.clone());
        match lock(&self.script).pop_front() {
            Some(Scripted::Response(r)) => Ok(r),
            Some(Scripted::Error(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted client exhausted")),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Response builders
// ---------------------------------------------------------------------------

fn usage() -> ApiUsage {
    ApiUsage {
        input_tokens: 100,
        output_tokens: 50,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: None,
    }
}

/// A single-text-block response that ends the turn.
pub fn text_response(text: &str) -> MessageResponse {
    MessageResponse {
        id: "msg_text".to_string(),
        content: vec![ContentBlock::text(text)],
        stop_reason: Some("end_turn".to_string()),
        usage: usage(),
    }
}

/// A response requesting the given tool calls, as `(id, name, input)`.
pub fn tool_use_response(calls: Vec<(&str, &str, Value)>) -> MessageResponse {
    MessageResponse {
        id: "msg_tools".to_string(),
        content: calls
            .into_iter()
            .map(|(id, name, input)| ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input,
            })
            .collect(),
        stop_reason: Some("tool_use".to_string()),
        usage: usage(),
    }
}

/// The final turn of a tool-use loop.
pub fn end_turn() -> MessageResponse {
    text_response("Done.")
}

/// A grader reply with the given score.
pub fn grader_response(score: f64) -> MessageResponse {
    text_response(&format!(
        r#"{{"scores": {{"quality": {score}}}, "overall": {score}, "feedback": "scripted"}}"#
    ))
}

// ---------------------------------------------------------------------------
// On-disk scaffolding
// ---------------------------------------------------------------------------

/// Write a minimal plugin tree and fixture directory under `root` and
/// return a config pointing at them, with transcripts under `root`.
pub fn scaffold_workspace(root: &Path) -> Result<HarnessConfig> {
    let plugin = root.join("plugin");
    let fixtures = root.join("fixtures");
    for dir in [
        plugin.join("skills/generating-documents/assets/templates"),
        plugin.join("skills/gathering-input"),
        plugin.join("agents"),
        plugin.join("commands"),
        fixtures.join("briefs"),
    ] {
        std::fs::create_dir_all(&dir)?;
    }
    std::fs::write(
        plugin.join("skills/generating-documents/SKILL.md"),
        "Generate documents from ${CLAUDE_PLUGIN_ROOT}/skills/generating-documents/assets/templates.",
    )?;
    std::fs::write(
        plugin.join("skills/generating-documents/assets/templates/business-brief.md"),
        "# Business Brief\n\n## Problem\n\n## Solution\n",
    )?;
    std::fs::write(
        plugin.join("skills/gathering-input/SKILL.md"),
        "Ask one question at a time.",
    )?;
    std::fs::write(
        plugin.join("agents/business-writer.md"),
        "You write business documents.",
    )?;
    std::fs::write(
        fixtures.join("briefs/acme.md"),
        "# Business Brief\n\n## Problem\nLate invoices.\n\n## Solution\nAutomated reminders.\n",
    )?;

    Ok(HarnessConfig {
        plugin_root: plugin,
        fixtures_dir: fixtures,
        transcripts_dir: Some(root.join("transcripts")),
        ..HarnessConfig::default()
    })
}
