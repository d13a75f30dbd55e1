//! Spawning the host CLI and checking what it reported.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::events::{HostEvent, HostInit, HostResult, parse_stream_json_line};

pub const DEFAULT_HOST_BINARY: &str = "claude";

/// A failed expectation about a host run.
#[derive(Debug, Error, PartialEq)]
pub enum HostCheckError {
    #[error("host never sent a system/init message")]
    NoInit,

    #[error("plugin {plugin:?} not loaded. Loaded: {}", loaded.join(", "))]
    PluginNotLoaded { plugin: String, loaded: Vec<String> },

    #[error("command {command:?} not found. Available: {}", available.join(", "))]
    CommandMissing {
        command: String,
        available: Vec<String>,
    },

    #[error("agent {agent:?} not found. Available: {}", available.join(", "))]
    AgentMissing { agent: String, available: Vec<String> },

    #[error("run did not succeed (subtype {subtype:?})")]
    NotSuccessful { subtype: String },

    #[error("agent {agent:?} was never spawned. Spawned: {}", spawned.join(", "))]
    AgentNotSpawned { agent: String, spawned: Vec<String> },

    #[error("agent resolution error: {0}")]
    AgentNotFound(String),

    #[error("no Write call with a file_path containing {0:?}")]
    FileNotWritten(String),

    #[error("skill {0:?} was never invoked")]
    SkillNotInvoked(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostToolUse {
    pub name: String,
    pub input: Value,
}

/// Everything a host run reported, folded from its event stream.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HostRun {
    pub init: Option<HostInit>,
    pub result: Option<HostResult>,
    pub texts: Vec<String>,
    pub tool_uses: Vec<HostToolUse>,
    /// Agent types started via the `Task` tool, in order.
    pub agent_starts: Vec<String>,
    pub errors: Vec<String>,
}

impl HostRun {
    pub fn from_events(events: impl IntoIterator<Item = HostEvent>) -> Self {
        let mut run = Self::default();
        for event in events {
            run.apply(event);
        }
        run
    }

    pub fn apply(&mut self, event: HostEvent) {
        match event {
            HostEvent::Init(init) => self.init = Some(init),
            HostEvent::Text(text) => self.texts.push(text),
            HostEvent::ToolUse { name, input, .. } => {
                if name == "Task"
                    && let Some(agent) = input.get("subagent_type").and_then(Value::as_str)
                {
                    self.agent_starts.push(agent.to_string());
                }
                self.tool_uses.push(HostToolUse { name, input });
            }
            HostEvent::Result(result) => {
                self.errors.extend(result.errors.iter().cloned());
                self.result = Some(result);
            }
            HostEvent::Error(message) => self.errors.push(message),
        }
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.result.as_ref().map_or(0.0, |r| r.total_cost_usd)
    }

    pub fn num_turns(&self) -> u32 {
        self.result.as_ref().map_or(0, |r| r.num_turns)
    }

    fn init(&self) -> Result<&HostInit, HostCheckError> {
        self.init.as_ref().ok_or(HostCheckError::NoInit)
    }

    pub fn check_plugin_loaded(&self, plugin: &str) -> Result<(), HostCheckError> {
        let init = self.init()?;
        if init.plugins.iter().any(|p| p.name == plugin) {
            return Ok(());
        }
        Err(HostCheckError::PluginNotLoaded {
            plugin: plugin.to_string(),
            loaded: init.plugins.iter().map(|p| p.name.clone()).collect(),
        })
    }

    pub fn check_command_available(&self, command: &str) -> Result<(), HostCheckError> {
        let init = self.init()?;
        let wanted = command.trim_start_matches('/');
        if init
            .slash_commands
            .iter()
            .any(|c| c.trim_start_matches('/') == wanted)
        {
            return Ok(());
        }
        Err(HostCheckError::CommandMissing {
            command: command.to_string(),
            available: init.slash_commands.clone(),
        })
    }

    pub fn check_agent_available(&self, agent: &str) -> Result<(), HostCheckError> {
        let init = self.init()?;
        if init.agents.iter().any(|a| a == agent) {
            return Ok(());
        }
        Err(HostCheckError::AgentMissing {
            agent: agent.to_string(),
            available: init.agents.clone(),
        })
    }

    pub fn check_success(&self) -> Result<(), HostCheckError> {
        match &self.result {
            Some(r) if r.is_success() => Ok(()),
            Some(r) => Err(HostCheckError::NotSuccessful {
                subtype: r.subtype.clone(),
            }),
            None => Err(HostCheckError::NotSuccessful {
                subtype: "missing".to_string(),
            }),
        }
    }

    pub fn check_agent_spawned(&self, agent: &str) -> Result<(), HostCheckError> {
        if self.agent_starts.iter().any(|a| a == agent) {
            return Ok(());
        }
        Err(HostCheckError::AgentNotSpawned {
            agent: agent.to_string(),
            spawned: self.agent_starts.clone(),
        })
    }

    /// Fails on the first error mentioning an unresolved agent type.
    pub fn check_no_agent_not_found(&self) -> Result<(), HostCheckError> {
        match self
            .errors
            .iter()
            .find(|e| e.contains("Agent type") && e.contains("not found"))
        {
            Some(e) => Err(HostCheckError::AgentNotFound(e.clone())),
            None => Ok(()),
        }
    }

    pub fn check_file_written(&self, pattern: &str) -> Result<(), HostCheckError> {
        let written = self.tool_uses.iter().any(|t| {
            t.name == "Write"
                && t.input
                    .get("file_path")
                    .and_then(Value::as_str)
                    .is_some_and(|p| p.contains(pattern))
        });
        if written {
            Ok(())
        } else {
            Err(HostCheckError::FileNotWritten(pattern.to_string()))
        }
    }

    pub fn check_skill_invoked(&self, skill: &str) -> Result<(), HostCheckError> {
        let invoked = self.tool_uses.iter().any(|t| {
            t.input
                .get("skill_name")
                .or_else(|| t.input.get("skill"))
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains(skill))
        });
        if invoked {
            Ok(())
        } else {
            Err(HostCheckError::SkillNotInvoked(skill.to_string()))
        }
    }
}

/// Runs a single prompt through the host CLI with a plugin directory
/// attached.
#[derive(Debug, Clone)]
pub struct HostSession {
    binary: String,
    plugin_root: PathBuf,
    max_turns: Option<u32>,
    cwd: Option<PathBuf>,
}

impl HostSession {
    pub fn new(plugin_root: impl Into<PathBuf>) -> Self {
        Self {
            binary: DEFAULT_HOST_BINARY.to_string(),
            plugin_root: plugin_root.into(),
            max_turns: None,
            cwd: None,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn plugin_root(&self) -> &Path {
        &self.plugin_root
    }

    /// Spawn the host, read its stream to EOF, and wait for exit.
    ///
    /// A non-zero exit without a `result` message is recorded as an error
    /// on the run rather than returned.
    pub async fn run(&self, prompt: &str) -> Result<HostRun> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--plugin-dir")
            .arg(&self.plugin_root);
        if let Some(max_turns) = self.max_turns {
            cmd.arg("--max-turns").arg(max_turns.to_string());
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn host binary at '{}' -- is it installed and on PATH?",
                self.binary
            )
        })?;
        let stdout = child
            .stdout
            .take()
            .context("host process has no stdout pipe")?;
        info!(binary = %self.binary, plugin_root = %self.plugin_root.display(), "host session started");

        let mut run = HostRun::default();
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match parse_stream_json_line(trimmed) {
                        Ok(events) => events.into_iter().for_each(|e| run.apply(e)),
                        Err(e) => warn!(line = trimmed, error = %e, "skipping malformed JSONL line"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "error reading host stdout");
                    run.errors.push(format!("stdout read error: {e}"));
                    break;
                }
            }
        }

        let status = child.wait().await.context("failed waiting for host process")?;
        debug!(status = %status, "host process exited");
        if !status.success() && run.result.is_none() {
            run.errors.push(format!("host exited with {status}"));
        }

        info!(
            tool_uses = run.tool_uses.len(),
            agents_spawned = run.agent_starts.len(),
            cost_usd = run.total_cost_usd(),
            turns = run.num_turns(),
            "host session finished"
        );
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::events::LoadedPlugin;
    use serde_json::json;

    fn init_event() -> HostEvent {
        HostEvent::Init(HostInit {
            plugins: vec![LoadedPlugin {
                name: "lockstride-kickoff".into(),
                path: None,
            }],
            slash_commands: vec!["lockstride-kickoff:init".into(), "/lockstride-kickoff:status".into()],
            agents: vec!["lockstride-kickoff:researcher".into()],
            model: None,
        })
    }

    #[test]
    fn registry_checks() {
        let run = HostRun::from_events([init_event()]);
        assert!(run.check_plugin_loaded("lockstride-kickoff").is_ok());
        assert!(run.check_command_available("/lockstride-kickoff:init").is_ok());
        assert!(run.check_command_available("lockstride-kickoff:status").is_ok());
        assert!(run.check_agent_available("lockstride-kickoff:researcher").is_ok());

        let err = run.check_agent_available("lockstride-kickoff:writer").unwrap_err();
        assert!(err.to_string().contains("Available: lockstride-kickoff:researcher"));
        assert!(matches!(
            run.check_plugin_loaded("other"),
            Err(HostCheckError::PluginNotLoaded { .. })
        ));
    }

    #[test]
    fn checks_without_init_fail() {
        let run = HostRun::default();
        assert_eq!(run.check_plugin_loaded("x"), Err(HostCheckError::NoInit));
        assert!(run.check_success().is_err());
    }

    #[test]
    fn task_tool_use_counts_as_agent_start() {
        let run = HostRun::from_events([
            HostEvent::ToolUse {
                id: "t1".into(),
                name: "Task".into(),
                input: json!({"subagent_type": "kit:researcher", "prompt": "go"}),
            },
            HostEvent::ToolUse {
                id: "t2".into(),
                name: "Write".into(),
                input: json!({"file_path": "/tmp/docs/brief.md"}),
            },
            HostEvent::ToolUse {
                id: "t3".into(),
                name: "Skill".into(),
                input: json!({"skill_name": "kit:gathering-input"}),
            },
        ]);
        assert_eq!(run.agent_starts, vec!["kit:researcher"]);
        assert!(run.check_agent_spawned("kit:researcher").is_ok());
        assert!(run.check_agent_spawned("kit:writer").is_err());
        assert!(run.check_file_written("brief.md").is_ok());
        assert!(run.check_file_written("prd.md").is_err());
        assert!(run.check_skill_invoked("gathering-input").is_ok());
    }

    #[test]
    fn agent_not_found_errors_are_detected() {
        let run = HostRun::from_events([HostEvent::Result(HostResult {
            subtype: "error_during_execution".into(),
            is_error: true,
            errors: vec!["Agent type 'kit:ghost' not found".into()],
            ..Default::default()
        })]);
        assert!(matches!(
            run.check_no_agent_not_found(),
            Err(HostCheckError::AgentNotFound(_))
        ));
        assert!(matches!(
            run.check_success(),
            Err(HostCheckError::NotSuccessful { ref subtype }) if subtype == "error_during_execution"
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_reads_fake_host_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("fake_host.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             echo '{\"type\":\"system\",\"subtype\":\"init\",\"plugins\":[{\"name\":\"kit\"}],\"slash_commands\":[\"kit:init\"],\"agents\":[]}'\n\
             echo 'garbage line'\n\
             echo '{\"type\":\"result\",\"subtype\":\"success\",\"total_cost_usd\":0.5,\"num_turns\":2}'\n",
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let session = HostSession::new(tmp.path()).with_binary(script.to_str().unwrap());
        let run = session.run("hello").await.unwrap();
        assert!(run.check_plugin_loaded("kit").is_ok());
        assert!(run.check_success().is_ok());
        assert_eq!(run.total_cost_usd(), 0.5);
        assert_eq!(run.num_turns(), 2);
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let session = HostSession::new("plugin").with_binary("/no/such/host-binary");
        let err = session.run("hi").await.unwrap_err();
        assert!(err.to_string().contains("/no/such/host-binary"));
    }
}
