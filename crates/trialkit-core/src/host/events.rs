//! Parsing of the host CLI's `stream-json` output.
//!
//! Each stdout line is one JSON object. Only the parts the harness checks
//! are modelled: the `system/init` registry snapshot, assistant text and
//! tool-use blocks, and the final `result`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// A plugin the host reports as loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedPlugin {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
}

/// The `system/init` message: what the host registered at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInit {
    #[serde(default)]
    pub plugins: Vec<LoadedPlugin>,
    #[serde(default)]
    pub slash_commands: Vec<String>,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// The final `result` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostResult {
    /// `success`, or an error kind such as `error_max_turns`.
    pub subtype: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl HostResult {
    pub fn is_success(&self) -> bool {
        self.subtype == "success" && !self.is_error
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Init(HostInit),
    Text(String),
    ToolUse { id: String, name: String, input: Value },
    Result(HostResult),
    Error(String),
}

/// Parse one stream-json line into zero or more events.
///
/// Returns `Err` only for malformed JSON; callers log and continue.
pub fn parse_stream_json_line(line: &str) -> Result<Vec<HostEvent>> {
    let v: Value = serde_json::from_str(line).context("malformed JSON in stream output")?;
    let mut events = Vec::new();

    match v.get("type").and_then(Value::as_str).unwrap_or("") {
        "system" => {
            if v.get("subtype").and_then(Value::as_str) == Some("init") {
                let init: HostInit =
                    serde_json::from_value(v).context("malformed system/init message")?;
                events.push(HostEvent::Init(init));
            }
        }
        "assistant" => {
            let blocks = v
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(Value::as_array);
            for block in blocks.into_iter().flatten() {
                match block.get("type").and_then(Value::as_str).unwrap_or("") {
                    "text" => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            events.push(HostEvent::Text(text.to_string()));
                        }
                    }
                    "tool_use" => events.push(HostEvent::ToolUse {
                        id: block
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        name: block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown")
                            .to_string(),
                        input: block.get("input").cloned().unwrap_or(Value::Null),
                    }),
                    _ => {}
                }
            }
        }
        "result" => {
            let result: HostResult =
                serde_json::from_value(v).context("malformed result message")?;
            events.push(HostEvent::Result(result));
        }
        "error" => {
            let message = v
                .get("error")
                .and_then(|e| e.get("message").and_then(Value::as_str))
                .or_else(|| v.get("message").and_then(Value::as_str))
                .unwrap_or("unknown error")
                .to_string();
            events.push(HostEvent::Error(message));
        }
        other => {
            debug!(event_type = other, "ignoring stream-json event");
        }
    }

    Ok(events)
}
