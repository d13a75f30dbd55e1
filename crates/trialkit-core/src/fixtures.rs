//! Fixture documents and their freshness relative to plugin templates.
//!
//! Fixtures are pre-generated documents that tasks feed back into the model
//! (prior context, documents to challenge, reference solutions). A manifest
//! pairs each fixture with the template it was generated from so stale
//! fixtures can be detected by mtime and regenerated.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::client::{Message, MessageRequest, MessagesClient};
use crate::usage::UsageStats;

const REGENERATION_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("fixture not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed to read fixture {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Read access to the fixtures directory.
#[derive(Debug, Clone)]
pub struct FixtureStore {
    dir: PathBuf,
}

impl FixtureStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Read a fixture that must exist.
    pub fn load(&self, name: &str) -> Result<String, FixtureError> {
        let path = self.path(name);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FixtureError::NotFound { path })
            }
            Err(source) => Err(FixtureError::Io { path, source }),
        }
    }

    /// Read a reference solution. A missing file is logged and yields
    /// `None`; grading proceeds without a reference.
    pub fn load_reference(&self, name: &str) -> Option<String> {
        match self.load(name) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!(reference = name, error = %e, "reference solution unavailable");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// `fixtures.toml`: one `[[fixtures]]` entry per generated document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureManifest {
    #[serde(default)]
    pub fixtures: Vec<FixtureDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureDefinition {
    /// Filename relative to the fixtures directory.
    pub fixture: String,
    /// Template stem under `skills/generating-documents/assets/templates/`.
    pub template: String,
    pub startup: String,
    pub document_type: String,
    /// Short brief used when regenerating.
    pub context: String,
}

impl FixtureManifest {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse fixture manifest")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture manifest {}", path.display()))?;
        Self::parse(&content)
    }
}

/// Directory holding document templates inside a plugin.
pub fn templates_dir(plugin_root: &Path) -> PathBuf {
    plugin_root
        .join("skills")
        .join("generating-documents")
        .join("assets")
        .join("templates")
}

// ---------------------------------------------------------------------------
// Freshness
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Freshness {
    pub fixture: String,
    pub stale: bool,
    pub template_mtime: Option<DateTime<Utc>>,
    pub fixture_mtime: Option<DateTime<Utc>>,
    pub reason: String,
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Compare a fixture against its template.
///
/// A missing template is skipped (not stale); a missing fixture is stale;
/// otherwise the fixture is stale when the template is newer.
pub fn check_freshness(
    def: &FixtureDefinition,
    store: &FixtureStore,
    templates: &Path,
) -> Freshness {
    let template_path = templates.join(format!("{}.md", def.template));
    let fixture_path = store.path(&def.fixture);

    let Some(template_time) = mtime(&template_path) else {
        return Freshness {
            fixture: def.fixture.clone(),
            stale: false,
            template_mtime: None,
            fixture_mtime: None,
            reason: format!("Template {}.md not found, skipping", def.template),
        };
    };

    let Some(fixture_time) = mtime(&fixture_path) else {
        return Freshness {
            fixture: def.fixture.clone(),
            stale: true,
            template_mtime: Some(template_time.into()),
            fixture_mtime: None,
            reason: "Fixture does not exist".to_string(),
        };
    };

    let template_mtime: DateTime<Utc> = template_time.into();
    let fixture_mtime: DateTime<Utc> = fixture_time.into();
    let stale = template_time > fixture_time;
    let reason = if stale {
        format!(
            "Template modified after fixture ({} > {})",
            template_mtime.to_rfc3339(),
            fixture_mtime.to_rfc3339()
        )
    } else {
        "Fixture is up to date".to_string()
    };

    Freshness {
        fixture: def.fixture.clone(),
        stale,
        template_mtime: Some(template_mtime),
        fixture_mtime: Some(fixture_mtime),
        reason,
    }
}

pub fn check_all(manifest: &FixtureManifest, store: &FixtureStore, templates: &Path) -> Vec<Freshness> {
    manifest
        .fixtures
        .iter()
        .map(|def| check_freshness(def, store, templates))
        .collect()
}

// ---------------------------------------------------------------------------
// Regeneration
// ---------------------------------------------------------------------------

fn regeneration_prompt(def: &FixtureDefinition, template: &str) -> String {
    format!(
        "Generate a complete {doc} document for a startup called \"{startup}\".\n\n\
         ## Template to Follow\n{template}\n\n\
         ## Startup Context\n{context}\n\n\
         ## Instructions\n\
         - Fill in ALL sections from the template with realistic, specific content\n\
         - Use the startup name and context provided\n\
         - Do NOT include placeholder text like {{FIELD_NAME}} or [INSERT HERE]\n\
         - Keep the document concise but complete (aim for 300-600 words)\n\
         - Use realistic numbers, names, and examples\n\
         - Output ONLY the document content (no preamble or explanation)",
        doc = def.document_type,
        startup = def.startup,
        context = def.context,
    )
}

/// Regenerate one fixture from its template and write it to the store.
pub async fn regenerate_fixture(
    def: &FixtureDefinition,
    store: &FixtureStore,
    templates: &Path,
    client: &dyn MessagesClient,
    model: &str,
    usage: &mut UsageStats,
) -> Result<PathBuf> {
    let template_path = templates.join(format!("{}.md", def.template));
    let template = std::fs::read_to_string(&template_path)
        .with_context(|| format!("template not found: {}", template_path.display()))?;

    let request = MessageRequest::new(
        model,
        REGENERATION_MAX_TOKENS,
        vec![Message::user(regeneration_prompt(def, &template))],
    );
    let response = client.create(&request).await?;
    usage.record(&response.usage, model);

    let text = response.first_text();
    if text.is_empty() {
        anyhow::bail!("unexpected non-text response while generating {}", def.fixture);
    }

    std::fs::create_dir_all(store.dir())
        .with_context(|| format!("failed to create {}", store.dir().display()))?;
    let path = store.path(&def.fixture);
    std::fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegenerationSummary {
    pub checked: usize,
    pub stale: usize,
    pub regenerated: usize,
    /// `"<fixture>: <error>"` for each fixture that could not be regenerated.
    pub failed: Vec<String>,
}

/// Regenerate every stale fixture. Failures are collected, not propagated.
pub async fn regenerate_stale(
    manifest: &FixtureManifest,
    store: &FixtureStore,
    templates: &Path,
    client: &dyn MessagesClient,
    model: &str,
    usage: &mut UsageStats,
) -> RegenerationSummary {
    let results = check_all(manifest, store, templates);
    let mut summary = RegenerationSummary {
        checked: results.len(),
        stale: results.iter().filter(|r| r.stale).count(),
        ..Default::default()
    };

    for def in &manifest.fixtures {
        let is_stale = results.iter().any(|r| r.fixture == def.fixture && r.stale);
        if !is_stale {
            continue;
        }
        info!(fixture = %def.fixture, "regenerating fixture");
        match regenerate_fixture(def, store, templates, client, model, usage).await {
            Ok(_) => summary.regenerated += 1,
            Err(e) => {
                warn!(fixture = %def.fixture, error = %e, "fixture regeneration failed");
                summary.failed.push(format!("{}: {e:#}", def.fixture));
            }
        }
    }

    summary
}
