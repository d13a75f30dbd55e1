//! System prompt and opening message composition.
//!
//! Prompts are assembled from files in the plugin under test. A missing
//! plugin file contributes empty text; a missing fixture is an error, since
//! the opening message would be meaningless without it.

use std::path::{Path, PathBuf};

use crate::fixtures::{FixtureError, FixtureStore};
use crate::grader::code::TURN_SEPARATOR;
use crate::task::TaskInput;

/// Placeholder the plugin uses for its own install directory.
pub const PLUGIN_ROOT_VAR: &str = "${CLAUDE_PLUGIN_ROOT}";

/// Read-only view of the plugin directory.
#[derive(Debug, Clone)]
pub struct PluginDir {
    root: PathBuf,
}

impl PluginDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Replace every `${CLAUDE_PLUGIN_ROOT}` with the plugin root.
    pub fn substitute(&self, content: &str) -> String {
        content.replace(PLUGIN_ROOT_VAR, &self.root.to_string_lossy())
    }

    /// Read a file relative to the root, substituted. Missing files read as
    /// `None`.
    pub fn read(&self, relative: impl AsRef<Path>) -> Option<String> {
        std::fs::read_to_string(self.root.join(relative))
            .ok()
            .map(|c| self.substitute(&c))
    }

    fn read_or_empty(&self, relative: impl AsRef<Path>) -> String {
        self.read(relative).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// System prompts
// ---------------------------------------------------------------------------

/// Challenger domain file for a document type.
pub fn challenger_domain(document_type: &str) -> &'static str {
    match document_type {
        "market-analysis" => "market",
        "business-brief" => "problem",
        "product-brief" | "product-spec" => "solution",
        "business-plan" | "pitch-deck" => "financials",
        _ => "market",
    }
}

/// Compose the system prompt for a content task.
pub fn compose_system_prompt(input: &TaskInput, plugin: &PluginDir) -> String {
    match input {
        TaskInput::Autonomous { document_type, .. } => autonomous_prompt(document_type, plugin),
        TaskInput::Interactive {
            startup_name,
            skill,
            document_type,
            references,
            ..
        } => interactive_prompt(
            startup_name,
            skill,
            document_type.as_deref(),
            references,
            plugin,
        ),
        TaskInput::Challenger {
            startup_name,
            document_type,
            ..
        } => challenger_prompt(startup_name, document_type, plugin),
    }
}

fn autonomous_prompt(document_type: &str, plugin: &PluginDir) -> String {
    let agent = plugin.read_or_empty("agents/business-writer.md");
    let template = plugin.read_or_empty(format!(
        "skills/generating-documents/assets/templates/{document_type}.md"
    ));

    format!(
        "You are the business-writer agent generating startup documentation.

## Agent Definition
{agent}

## Output Template
{template}

## Instructions
- Generate the document directly without asking clarifying questions
- Follow the template structure exactly, including all section headers
- Fill in all sections with realistic, specific content based on the provided context
- Do not include placeholder text like {{FIELD_NAME}} or {{TAM_ESTIMATE}}
- Remove all <!-- Guidance: ... --> comments from output
- Use the startup name and context provided by the user"
    )
}

fn interactive_prompt(
    startup_name: &str,
    skill: &str,
    document_type: Option<&str>,
    references: &[String],
    plugin: &PluginDir,
) -> String {
    let skill_dir = PathBuf::from("skills").join(skill);
    let skill_content = plugin.read_or_empty(skill_dir.join("SKILL.md"));

    let reference_content = references
        .iter()
        .filter_map(|r| plugin.read(skill_dir.join(r)))
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(TURN_SEPARATOR);

    let topic_content = match document_type {
        Some(doc) if skill == "gathering-input" => {
            plugin.read_or_empty(format!("skills/gathering-input/references/{doc}-topic.md"))
        }
        _ => String::new(),
    };

    let topic_section = if topic_content.is_empty() {
        String::new()
    } else {
        format!("## Topic Guide\n{topic_content}")
    };
    let reference_section = if reference_content.is_empty() {
        String::new()
    } else {
        format!("## Reference Material\n{reference_content}")
    };
    let doc_context = document_type
        .map(|d| format!("- document_type: {d}"))
        .unwrap_or_default();
    let doc_instruction = document_type
        .map(|d| format!("- You are gathering input for a {d}"))
        .unwrap_or_default();

    format!(
        "You are conducting an interactive session with a startup founder.

## Skill Definition
{skill_content}

{topic_section}

{reference_section}

## Session Context
{doc_context}
- startup_name: {startup_name}

## Instructions
- Follow the conversational pattern defined in the skill
{doc_instruction}
- Ask questions and wait for user responses
- Use the checkpoint and phase structure from the skill
- Adapt based on user responses
- Do NOT generate final output until all phases are complete
- For naming: generate candidates when preferences are gathered
- For input gathering: produce a structured summary after all phases"
    )
}

fn challenger_prompt(startup_name: &str, document_type: &str, plugin: &PluginDir) -> String {
    let skill = plugin.read_or_empty("skills/challenging-assumptions/SKILL.md");
    let domain = plugin.read_or_empty(format!(
        "skills/challenging-assumptions/references/domains/{}.md",
        challenger_domain(document_type)
    ));

    format!(
        "You are the Challenger agent in SKEPTIC MODE. The user has just completed a {document_type} and opted into scrutiny.

## Challenger Skill
{skill}

## Domain-Specific Challenges
{domain}

## Session Context
- document_type: {document_type}
- startup_name: {startup_name}

## Instructions
- Begin with the SKEPTIC MODE ENGAGED header as defined in the skill
- Challenge the assumptions in the provided document
- Use the domain-specific challenges as inspiration (not scripts)
- Move to a new topic after 1 satisfactory answer OR 3 questions on same topic
- Exit after 3 cumulative satisfactory answers OR 6 cumulative unsatisfactory answers
- When exiting, provide calibrated \"tough love\" based on session outcome
- Always produce the structured insights summary (Validated Strengths, Identified Gaps, Revision Suggestions) as defined in the Session Exit section"
    )
}

// ---------------------------------------------------------------------------
// Opening user message
// ---------------------------------------------------------------------------

/// Compose the first user message. Fails if a referenced fixture is missing.
pub fn compose_user_message(
    input: &TaskInput,
    fixtures: &FixtureStore,
) -> Result<String, FixtureError> {
    let message = match input {
        TaskInput::Autonomous {
            startup_name,
            context,
            document_type,
            context_fixture: Some(fixture),
        } => {
            let prior = fixtures.load(fixture)?;
            format!(
                "Generate {document_type} for \"{startup_name}\".\n\n\
                 Prior document for context:\n---\n{prior}\n---\n\n\
                 Additional context:\n{context}\n\n\
                 Generate the complete document now."
            )
        }
        TaskInput::Autonomous {
            startup_name,
            context,
            document_type,
            context_fixture: None,
        } => format!(
            "Generate {document_type} for \"{startup_name}\".\n\n\
             Context:\n{context}\n\n\
             Generate the complete document now."
        ),
        TaskInput::Interactive {
            startup_name,
            context,
            ..
        } => format!(
            "Let's work on \"{startup_name}\".\n\nContext:\n{context}\n\nPlease begin the session."
        ),
        TaskInput::Challenger {
            startup_name,
            context,
            document_type,
            fixture,
            ..
        } => {
            let document = fixtures.load(fixture)?;
            format!(
                "I just completed this {document_type} for \"{startup_name}\":\n\n\
                 ---\n{document}\n---\n\n{context}"
            )
        }
    };
    Ok(message)
}

// ---------------------------------------------------------------------------
// Orchestrator prompt
// ---------------------------------------------------------------------------

const ORCHESTRATOR_PREAMBLE: &str = "You are the generating-documents skill orchestrator for a Claude Code plugin.
You have access to tools (Task, Skill, Read, Write, AskUserQuestion, Bash, Glob) to execute workflows.
Follow the documentation below to determine what tools to call and in what order.
When spawning subagents via Task, use the exact subagent_type value shown in the documentation.";

/// A plugin file injected into the orchestrator prompt under `header`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ContextFile {
    /// Path relative to the plugin root.
    pub path: String,
    pub header: String,
}

/// Preamble, then each existing context file, then the extra instructions,
/// separated by horizontal rules. Missing context files are left out.
pub fn compose_orchestrator_prompt(
    context_files: &[ContextFile],
    instructions: &str,
    plugin: &PluginDir,
) -> String {
    let mut sections = vec![ORCHESTRATOR_PREAMBLE.to_string()];
    for file in context_files {
        if let Some(content) = plugin.read(&file.path) {
            sections.push(format!("## {}\n\n{content}", file.header));
        }
    }
    if !instructions.trim().is_empty() {
        sections.push(format!(
            "## Additional Instructions\n\n{}",
            plugin.substitute(instructions)
        ));
    }
    sections.join(TURN_SEPARATOR)
}
