//! Loading task files of either shape.
//!
//! Orchestration tasks are recognised by a top-level `assertions` key;
//! everything else is parsed as a content task.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use trialkit_core::orchestration::{OrchestratorTask, parse_orchestrator_toml};
use trialkit_core::task::{Task, parse_task_toml};
use trialkit_core::transcript::sanitize_filename;

#[derive(Debug, Clone)]
pub enum TaskFile {
    Content(Task),
    Orchestration(OrchestratorTask),
}

impl TaskFile {
    pub fn name(&self) -> &str {
        match self {
            TaskFile::Content(t) => &t.name,
            TaskFile::Orchestration(t) => &t.name,
        }
    }

    pub fn trials(&self) -> u32 {
        match self {
            TaskFile::Content(t) => t.trials,
            TaskFile::Orchestration(t) => t.trials,
        }
    }

    pub fn kind(&self) -> String {
        match self {
            TaskFile::Content(t) => t.mode().to_string(),
            TaskFile::Orchestration(_) => "orchestration".to_string(),
        }
    }
}

pub fn parse_task_file(content: &str) -> Result<TaskFile> {
    let table: toml::Table = toml::from_str(content).context("invalid TOML")?;
    if table.contains_key("assertions") {
        Ok(TaskFile::Orchestration(parse_orchestrator_toml(content)?))
    } else {
        Ok(TaskFile::Content(parse_task_toml(content)?))
    }
}

pub fn load_task_file(path: &Path) -> Result<TaskFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read task file {}", path.display()))?;
    parse_task_file(&content).with_context(|| format!("invalid task file {}", path.display()))
}

/// Load every file, collecting all failures before giving up.
pub fn load_all(paths: &[std::path::PathBuf]) -> Result<Vec<TaskFile>> {
    let mut tasks = Vec::with_capacity(paths.len());
    let mut errors = Vec::new();
    for path in paths {
        match load_task_file(path) {
            Ok(task) => tasks.push(task),
            Err(e) => errors.push(format!("{e:#}")),
        }
    }
    if !errors.is_empty() {
        anyhow::bail!("{} task file(s) failed to load:\n  {}", errors.len(), errors.join("\n  "));
    }

    // Transcripts are keyed by the sanitized name, so compare on that.
    let mut seen: HashMap<String, &str> = HashMap::new();
    for task in &tasks {
        if let Some(previous) = seen.insert(sanitize_filename(task.name()), task.name()) {
            if previous == task.name() {
                anyhow::bail!("duplicate task name {:?}", task.name());
            }
            anyhow::bail!(
                "task names {previous:?} and {:?} map to the same transcript file name",
                task.name()
            );
        }
    }
    Ok(tasks)
}
