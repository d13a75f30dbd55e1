//! Simulated host tools: schemas advertised to the model and the mock
//! handlers that answer its calls.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde_json::{Value, json};

use crate::client::ToolSchema;
use crate::prompt::{PLUGIN_ROOT_VAR, PluginDir};

/// Response for tools with no registered handler.
pub const UNHANDLED_RESPONSE: &str = "OK";

fn schema(name: &str, description: &str, input_schema: Value) -> ToolSchema {
    ToolSchema {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// The fixed tool set: Task, Skill, Read, Write, AskUserQuestion, Bash, Glob.
pub fn orchestration_tools() -> Vec<ToolSchema> {
    vec![
        schema(
            "Task",
            "Spawn a subagent to handle a task autonomously.",
            json!({
                "type": "object",
                "properties": {
                    "subagent_type": {"type": "string", "description": "The type of specialized agent to use for this task"},
                    "prompt": {"type": "string", "description": "The task for the agent to perform"},
                    "description": {"type": "string", "description": "Short description of the task"}
                },
                "required": ["subagent_type", "prompt"]
            }),
        ),
        schema(
            "Skill",
            "Invoke a skill inline in the current context.",
            json!({
                "type": "object",
                "properties": {
                    "skill_name": {"type": "string", "description": "The skill to invoke"},
                    "parameters": {"type": "object", "description": "Parameters to pass to the skill"}
                },
                "required": ["skill_name"]
            }),
        ),
        schema(
            "Read",
            "Read a file from the filesystem.",
            json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "The absolute path to the file to read"}
                },
                "required": ["file_path"]
            }),
        ),
        schema(
            "Write",
            "Write content to a file.",
            json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "The absolute path to the file to write"},
                    "content": {"type": "string", "description": "The content to write"}
                },
                "required": ["file_path", "content"]
            }),
        ),
        schema(
            "AskUserQuestion",
            "Ask the user a clarifying question.",
            json!({
                "type": "object",
                "properties": {
                    "questions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "question": {"type": "string"},
                                "header": {"type": "string"},
                                "options": {
                                    "type": "array",
                                    "items": {
                                        "type": "object",
                                        "properties": {
                                            "label": {"type": "string"},
                                            "description": {"type": "string"}
                                        }
                                    }
                                },
                                "multiSelect": {"type": "boolean"}
                            }
                        }
                    }
                },
                "required": ["questions"]
            }),
        ),
        schema(
            "Bash",
            "Execute a bash command.",
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "The command to execute"},
                    "description": {"type": "string", "description": "Short description of what this command does"}
                },
                "required": ["command"]
            }),
        ),
        schema(
            "Glob",
            "Find files matching a glob pattern.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "The glob pattern to match files against"},
                    "path": {"type": "string", "description": "The directory to search in"}
                },
                "required": ["pattern"]
            }),
        ),
    ]
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Produces a simulated tool result from the tool's input.
pub type MockHandler = Box<dyn Fn(&Value) -> String + Send + Sync>;

/// Tool name to mock handler.
#[derive(Default)]
pub struct MockHandlers {
    handlers: HashMap<String, MockHandler>,
}

impl MockHandlers {
    /// Create an empty registry. Every call will answer [`UNHANDLED_RESPONSE`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The default handler for every tool in [`orchestration_tools`].
    pub fn defaults(plugin: &PluginDir) -> Self {
        let mut handlers = Self::new();
        let plugin = plugin.clone();
        handlers.register("Read", move |input| read_handler(&plugin, input));
        handlers.register("Task", |input| {
            let agent = input
                .get("subagent_type")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            format!(
                "Subagent {agent} completed successfully. DRAFT-business-brief.md written to internal path."
            )
        });
        handlers.register("Skill", |input| {
            let skill = input
                .get("skill_name")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            if skill.contains("gathering-input") {
                "Session complete. Structured input captured in .business-brief-input.md. Handing back to parent workflow.".to_string()
            } else {
                format!("Skill {skill} completed successfully.")
            }
        });
        handlers.register_static("AskUserQuestion", json!({"answers": {"0": "1"}}).to_string());
        handlers.register_static("Write", "File written successfully.");
        handlers.register_static("Bash", "Command completed successfully.");
        handlers.register_static("Glob", "[]");
        handlers
    }

    /// Register a handler, returning the one it replaced.
    pub fn register(
        &mut self,
        tool: impl Into<String>,
        handler: impl Fn(&Value) -> String + Send + Sync + 'static,
    ) -> Option<MockHandler> {
        self.handlers.insert(tool.into(), Box::new(handler))
    }

    /// Register a handler that always returns `response`.
    pub fn register_static(&mut self, tool: impl Into<String>, response: impl Into<String>) {
        let response = response.into();
        self.register(tool, move |_| response.clone());
    }

    /// Apply static overrides from a task file.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, String>) -> Self {
        for (tool, response) in overrides {
            self.register_static(tool.clone(), response.clone());
        }
        self
    }

    /// Answer a tool call.
    pub fn respond(&self, tool: &str, input: &Value) -> String {
        match self.handlers.get(tool) {
            Some(handler) => handler(input),
            None => UNHANDLED_RESPONSE.to_string(),
        }
    }

    /// Registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for MockHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHandlers")
            .field("handlers", &self.list())
            .finish()
    }
}

const MOCK_INPUT_DOCUMENT: &str = "# Business Brief Input

## Problem Statement
Decision paralysis in SaaS evaluations with hidden assumptions and no audit trail.

## Solution Overview
AI-augmented decision matrix as a cognitive forcing function.

## Target Market
SMB beachhead via cross-functional SaaS evaluations.

## Business Model
Tiered SaaS, bootstrapped for high ARPU.";

fn mock_config() -> String {
    let config = json!({
        "profiles": {
            "TestStartup": {
                "displayName": "TestStartup",
                "documentsRoot": "~/Startups",
                "documentsPath": "~/Startups/test-startup",
                "applicationsRoot": "~/Development",
                "applicationsPath": "~/Development/test-startup"
            }
        },
        "activeProfile": "TestStartup"
    });
    serde_json::to_string_pretty(&config).unwrap_or_else(|_| config.to_string())
}

/// Serve real plugin files, a mock profile config, a mock gathered-input
/// document, and a generic stub for anything else.
fn read_handler(plugin: &PluginDir, input: &Value) -> String {
    let Some(file_path) = input.get("file_path").and_then(Value::as_str) else {
        return "Error: No file_path provided".to_string();
    };
    let resolved = file_path.replace(PLUGIN_ROOT_VAR, &plugin.root().to_string_lossy());

    if resolved.contains("/plugin/") || Path::new(&resolved).starts_with(plugin.root()) {
        return std::fs::read_to_string(&resolved)
            .unwrap_or_else(|_| format!("Error: File not found: {resolved}"));
    }
    if resolved.contains("config.json") || resolved.contains(".lockstride") {
        return mock_config();
    }
    if resolved.contains(".business-brief-input.md") {
        return MOCK_INPUT_DOCUMENT.to_string();
    }
    format!("Mock file content for: {file_path}")
}
