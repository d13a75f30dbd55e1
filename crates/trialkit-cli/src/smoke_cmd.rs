//! `trialkit smoke` command: check that the host runtime loads the plugin.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use trialkit_core::host::{HostCheckError, HostRun, HostSession};

const MANIFEST_PATH: &str = ".claude-plugin/plugin.json";
const DEFAULT_PROMPT: &str =
    "What slash commands and agents are available from the {plugin} plugin? List them briefly.";

/// What the host run must show beyond a successful plugin load.
#[derive(Debug, Default, Clone)]
pub struct Expectations {
    /// Agents registered at init.
    pub agents: Vec<String>,
    /// Slash commands registered at init.
    pub commands: Vec<String>,
    /// Agents started through the `Task` tool during the run.
    pub spawned: Vec<String>,
    /// Path fragments that some `Write` call must target.
    pub written: Vec<String>,
    /// Skills invoked during the run.
    pub skills: Vec<String>,
}

pub struct SmokeOptions {
    pub plugin_root: PathBuf,
    pub plugin_name: Option<String>,
    pub expect: Expectations,
    pub binary: String,
    pub max_turns: u32,
    pub prompt: Option<String>,
    pub workdir: Option<PathBuf>,
}

#[derive(Deserialize)]
struct PluginManifest {
    name: String,
}

/// The plugin's name from its manifest, or the directory name.
pub fn plugin_name(root: &Path) -> Result<String> {
    let manifest = root.join(MANIFEST_PATH);
    if manifest.exists() {
        let text = std::fs::read_to_string(&manifest)
            .with_context(|| format!("failed to read {}", manifest.display()))?;
        let parsed: PluginManifest = serde_json::from_str(&text)
            .with_context(|| format!("invalid plugin manifest {}", manifest.display()))?;
        return Ok(parsed.name);
    }
    root.canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .with_context(|| format!("cannot determine plugin name for {}", root.display()))
}

/// Every failed expectation, in check order.
pub fn collect_failures(run: &HostRun, plugin: &str, expect: &Expectations) -> Vec<HostCheckError> {
    let mut checks = vec![run.check_plugin_loaded(plugin)];
    checks.extend(expect.commands.iter().map(|c| run.check_command_available(c)));
    checks.extend(expect.agents.iter().map(|a| run.check_agent_available(a)));
    checks.push(run.check_no_agent_not_found());
    checks.push(run.check_success());
    checks.extend(expect.spawned.iter().map(|a| run.check_agent_spawned(a)));
    checks.extend(expect.written.iter().map(|p| run.check_file_written(p)));
    checks.extend(expect.skills.iter().map(|s| run.check_skill_invoked(s)));
    checks.into_iter().filter_map(Result::err).collect()
}

/// Run the smoke command. Returns whether every check passed.
pub async fn run_smoke(options: SmokeOptions) -> Result<bool> {
    if !std::env::var("ANTHROPIC_API_KEY").is_ok_and(|k| !k.trim().is_empty()) {
        println!("ANTHROPIC_API_KEY not set -- skipping plugin smoke test.");
        return Ok(true);
    }

    let plugin = match options.plugin_name {
        Some(name) => name,
        None => plugin_name(&options.plugin_root)?,
    };
    let prompt = options
        .prompt
        .unwrap_or_else(|| DEFAULT_PROMPT.replace("{plugin}", &plugin));

    let mut session = HostSession::new(&options.plugin_root)
        .with_binary(options.binary)
        .with_max_turns(options.max_turns);
    if let Some(dir) = options.workdir {
        session = session.with_cwd(dir);
    }

    println!("Loading plugin {plugin} from {}", options.plugin_root.display());
    let run = session.run(&prompt).await?;

    let failures = collect_failures(&run, &plugin, &options.expect);
    if let Some(init) = &run.init {
        println!("  commands: {}", init.slash_commands.len());
        println!("  agents:   {}", init.agents.len());
    }
    println!("  turns:    {}", run.num_turns());
    println!("  cost:     ${:.4}", run.total_cost_usd());

    if failures.is_empty() {
        println!("Plugin smoke test passed.");
        return Ok(true);
    }
    println!("Plugin smoke test failed:");
    for failure in &failures {
        println!("  - {failure}");
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trialkit_core::host::{HostEvent, HostInit, HostResult, LoadedPlugin};

    #[test]
    fn plugin_name_from_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(".claude-plugin")).unwrap();
        std::fs::write(
            tmp.path().join(MANIFEST_PATH),
            r#"{"name": "lockstride-kickoff", "version": "1.0.0"}"#,
        )
        .unwrap();
        assert_eq!(plugin_name(tmp.path()).unwrap(), "lockstride-kickoff");
    }

    #[test]
    fn plugin_name_falls_back_to_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("my-plugin");
        std::fs::create_dir_all(&root).unwrap();
        assert_eq!(plugin_name(&root).unwrap(), "my-plugin");
    }

    #[test]
    fn failures_are_collected() {
        let run = HostRun::from_events([
            HostEvent::Init(HostInit {
                plugins: vec![LoadedPlugin {
                    name: "kit".into(),
                    path: None,
                }],
                slash_commands: vec!["kit:init".into()],
                agents: vec!["kit:researcher".into()],
                model: None,
            }),
            HostEvent::Result(HostResult {
                subtype: "success".into(),
                ..Default::default()
            }),
        ]);

        let ok = Expectations {
            agents: vec!["kit:researcher".into()],
            commands: vec!["kit:init".into()],
            ..Expectations::default()
        };
        assert!(collect_failures(&run, "kit", &ok).is_empty());

        let missing = Expectations {
            agents: vec!["kit:business-writer".into()],
            commands: vec!["kit:status".into()],
            ..Expectations::default()
        };
        let failures = collect_failures(&run, "kit", &missing);
        assert_eq!(failures.len(), 2);
        assert!(matches!(failures[0], HostCheckError::CommandMissing { .. }));
        assert!(matches!(failures[1], HostCheckError::AgentMissing { .. }));
    }

    #[test]
    fn run_activity_is_checked() {
        let run = HostRun::from_events([
            HostEvent::Init(HostInit {
                plugins: vec![LoadedPlugin {
                    name: "kit".into(),
                    path: None,
                }],
                ..Default::default()
            }),
            HostEvent::ToolUse {
                id: "t1".into(),
                name: "Skill".into(),
                input: json!({"skill_name": "kit:gathering-input"}),
            },
            HostEvent::ToolUse {
                id: "t2".into(),
                name: "Task".into(),
                input: json!({"subagent_type": "kit:business-writer", "prompt": "write"}),
            },
            HostEvent::ToolUse {
                id: "t3".into(),
                name: "Write".into(),
                input: json!({"file_path": "/tmp/acme/business-brief.md", "content": "#"}),
            },
            HostEvent::Result(HostResult {
                subtype: "success".into(),
                ..Default::default()
            }),
        ]);

        let seen = Expectations {
            spawned: vec!["kit:business-writer".into()],
            written: vec!["business-brief.md".into()],
            skills: vec!["gathering-input".into()],
            ..Expectations::default()
        };
        assert!(collect_failures(&run, "kit", &seen).is_empty());

        let unseen = Expectations {
            spawned: vec!["kit:researcher".into()],
            written: vec!["lean-canvas.md".into()],
            skills: vec!["naming".into()],
            ..Expectations::default()
        };
        let failures = collect_failures(&run, "kit", &unseen);
        assert_eq!(failures.len(), 3);
        assert!(matches!(failures[0], HostCheckError::AgentNotSpawned { .. }));
        assert_eq!(failures[1], HostCheckError::FileNotWritten("lean-canvas.md".into()));
        assert_eq!(failures[2], HostCheckError::SkillNotInvoked("naming".into()));
    }
}
