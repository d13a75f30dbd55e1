//! Per-trial transcript files for post-mortem debugging.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// Replace anything outside `[A-Za-z0-9-]` with `-` and lowercase.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Writes `<sanitized-task>-trial-<n>.json` files into a directory.
#[derive(Debug, Clone)]
pub struct TranscriptWriter {
    dir: PathBuf,
}

impl TranscriptWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, task: &str, trial: u32) -> PathBuf {
        self.dir
            .join(format!("{}-trial-{trial}.json", sanitize_filename(task)))
    }

    /// Serialize `body` as pretty JSON, overwriting any previous run.
    pub fn write<T: Serialize>(&self, task: &str, trial: u32, body: &T) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create transcripts dir {}", self.dir.display()))?;
        let path = self.path_for(task, trial);
        let json = serde_json::to_string_pretty(body).context("failed to serialize transcript")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write transcript {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_and_lowercases() {
        assert_eq!(sanitize_filename("Market Analysis: FinTech"), "market-analysis--fintech");
        assert_eq!(sanitize_filename("already-fine-123"), "already-fine-123");
        assert_eq!(sanitize_filename("a/b_c"), "a-b-c");
    }

    #[test]
    fn writes_unique_file_per_trial() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TranscriptWriter::new(dir.path().join("t"));
        let p1 = writer.write("My Task", 1, &serde_json::json!({"n": 1})).unwrap();
        let p2 = writer.write("My Task", 2, &serde_json::json!({"n": 2})).unwrap();
        assert_ne!(p1, p2);
        assert!(p1.ends_with("my-task-trial-1.json"));
        let body: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(p2).unwrap()).unwrap();
        assert_eq!(body["n"], 2);
    }
}
