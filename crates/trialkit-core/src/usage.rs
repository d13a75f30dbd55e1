//! Token and cost accounting.
//!
//! [`UsageStats`] is a plain additive counter. Concurrent workers never share
//! one: each worker emits an immutable [`UsageRecord`] into a
//! [`UsageLedger`] directory, and the suite total is a fold over the ledger.

use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::client::ApiUsage;

/// Per-million-token USD pricing for a model family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
}

const HAIKU: ModelPricing = ModelPricing {
    input: 0.8,
    output: 4.0,
};
const SONNET: ModelPricing = ModelPricing {
    input: 3.0,
    output: 15.0,
};
const OPUS: ModelPricing = ModelPricing {
    input: 15.0,
    output: 75.0,
};

/// Look up pricing by model name. Unknown models are priced as Haiku.
pub fn pricing_for(model: &str) -> ModelPricing {
    if model.starts_with("claude-opus") {
        OPUS
    } else if model.starts_with("claude-sonnet") {
        SONNET
    } else {
        HAIKU
    }
}

/// Token and cost counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub api_calls: u64,
    pub estimated_cost_usd: f64,
}

impl UsageStats {
    /// Record one API response made against `model`.
    ///
    /// Cost is added per call, so stats that mix generation and grader
    /// models are priced correctly.
    pub fn record(&mut self, usage: &ApiUsage, model: &str) {
        let pricing = pricing_for(model);
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cache_creation_input_tokens += usage.cache_creation_input_tokens.unwrap_or(0);
        self.cache_read_input_tokens += usage.cache_read_input_tokens.unwrap_or(0);
        self.api_calls += 1;
        self.estimated_cost_usd += (usage.input_tokens as f64 / 1_000_000.0) * pricing.input
            + (usage.output_tokens as f64 / 1_000_000.0) * pricing.output;
    }

    pub fn is_empty(&self) -> bool {
        self.api_calls == 0
    }
}

impl AddAssign<&UsageStats> for UsageStats {
    fn add_assign(&mut self, other: &UsageStats) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
        self.api_calls += other.api_calls;
        self.estimated_cost_usd += other.estimated_cost_usd;
    }
}

impl<'a> std::iter::Sum<&'a UsageStats> for UsageStats {
    fn sum<I: Iterator<Item = &'a UsageStats>>(iter: I) -> Self {
        iter.fold(UsageStats::default(), |mut acc, u| {
            acc += u;
            acc
        })
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// One worker's usage for one task, written once and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub worker: String,
    pub task: String,
    pub recorded_at: DateTime<Utc>,
    pub usage: UsageStats,
}

impl UsageRecord {
    pub fn new(worker: impl Into<String>, task: impl Into<String>, usage: UsageStats) -> Self {
        Self {
            id: Uuid::new_v4(),
            worker: worker.into(),
            task: task.into(),
            recorded_at: Utc::now(),
            usage,
        }
    }
}

/// Append-only directory of [`UsageRecord`] files.
#[derive(Debug, Clone)]
pub struct UsageLedger {
    dir: PathBuf,
}

const RECORD_PREFIX: &str = "usage-";
const TMP_SUFFIX: &str = ".tmp";

impl UsageLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a record under a unique filename and return its path.
    ///
    /// The file is written to a temporary name first and renamed into
    /// place, so readers never observe a partial record.
    pub fn append(&self, record: &UsageRecord) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create ledger dir {}", self.dir.display()))?;
        let path = self.dir.join(format!("{RECORD_PREFIX}{}.json", record.id));
        let tmp = self.dir.join(format!(".{}{TMP_SUFFIX}", record.id));
        let body = serde_json::to_string_pretty(record).context("failed to serialize usage")?;
        std::fs::write(&tmp, body)
            .with_context(|| format!("failed to write usage record {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to move usage record into {}", path.display()))?;
        Ok(path)
    }

    /// Read every record in the ledger. A missing directory is an empty
    /// ledger.
    pub fn records(&self) -> Result<Vec<UsageRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read ledger dir {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(RECORD_PREFIX) && n.ends_with(".json"));
            if !is_record {
                continue;
            }
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            match serde_json::from_str::<UsageRecord>(&text) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping malformed usage record");
                }
            }
        }
        records.sort_by_key(|r| r.recorded_at);
        Ok(records)
    }

    /// Fold every record into a single total.
    pub fn total(&self) -> Result<UsageStats> {
        Ok(aggregate(&self.records()?))
    }

    /// Remove all records (start of a fresh suite run), including malformed
    /// ones and temporaries left by an interrupted [`append`](Self::append).
    /// Returns the number of record files removed.
    pub fn clear(&self) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read ledger dir {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let is_record = name.starts_with(RECORD_PREFIX) && name.ends_with(".json");
            let is_stale_tmp = name.starts_with('.') && name.ends_with(TMP_SUFFIX);
            if !is_record && !is_stale_tmp {
                continue;
            }
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            if is_record {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Pure fold of records into a total.
pub fn aggregate(records: &[UsageRecord]) -> UsageStats {
    records.iter().map(|r| &r.usage).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(input: u64, output: u64) -> ApiUsage {
        ApiUsage {
            input_tokens: input,
            output_tokens: output,
            cache_creation_input_tokens: Some(5),
            cache_read_input_tokens: None,
        }
    }

    #[test]
    fn record_accumulates_tokens_and_cost() {
        let mut stats = UsageStats::default();
        stats.record(&api(1_000_000, 0), "claude-haiku-4-5");
        stats.record(&api(0, 1_000_000), "claude-sonnet-4-5");
        assert_eq!(stats.api_calls, 2);
        assert_eq!(stats.input_tokens, 1_000_000);
        assert_eq!(stats.cache_creation_input_tokens, 10);
        assert!((stats.estimated_cost_usd - (0.8 + 15.0)).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_priced_as_haiku() {
        assert_eq!(pricing_for("some-other-model"), HAIKU);
        assert_eq!(pricing_for("claude-opus-4-5"), OPUS);
    }

    #[test]
    fn merge_is_additive() {
        let mut a = UsageStats::default();
        a.record(&api(10, 20), "claude-haiku-4-5");
        let mut b = UsageStats::default();
        b.record(&api(1, 2), "claude-haiku-4-5");
        let mut total = UsageStats::default();
        total += &a;
        total += &b;
        assert_eq!(total.input_tokens, 11);
        assert_eq!(total.output_tokens, 22);
        assert_eq!(total.api_calls, 2);
    }

    #[test]
    fn ledger_roundtrip_and_fold() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = UsageLedger::new(dir.path().join("usage"));
        assert_eq!(ledger.total().unwrap(), UsageStats::default());

        let mut u = UsageStats::default();
        u.record(&api(100, 50), "claude-haiku-4-5");
        ledger.append(&UsageRecord::new("w1", "task-a", u)).unwrap();
        ledger.append(&UsageRecord::new("w2", "task-b", u)).unwrap();

        let total = ledger.total().unwrap();
        assert_eq!(total.input_tokens, 200);
        assert_eq!(total.api_calls, 2);

        assert_eq!(ledger.clear().unwrap(), 2);
        assert!(ledger.records().unwrap().is_empty());
    }

    #[test]
    fn malformed_record_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = UsageLedger::new(dir.path());
        let mut u = UsageStats::default();
        u.record(&api(100, 50), "claude-haiku-4-5");
        ledger.append(&UsageRecord::new("w1", "task-a", u)).unwrap();
        std::fs::write(dir.path().join("usage-broken.json"), "{\"id\": ").unwrap();

        assert_eq!(ledger.records().unwrap().len(), 1);
        assert_eq!(ledger.total().unwrap().input_tokens, 100);

        // Both files are ledger records, readable or not.
        assert_eq!(ledger.clear().unwrap(), 2);
        assert!(!dir.path().join("usage-broken.json").exists());
    }

    #[test]
    fn clear_removes_stale_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join(format!(".{}.tmp", Uuid::new_v4()));
        std::fs::write(&stale, "{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();
        let ledger = UsageLedger::new(dir.path());

        assert!(ledger.records().unwrap().is_empty());
        assert_eq!(ledger.clear().unwrap(), 0);
        assert!(!stale.exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn ledger_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        let ledger = UsageLedger::new(dir.path());
        assert!(ledger.records().unwrap().is_empty());
    }
}
