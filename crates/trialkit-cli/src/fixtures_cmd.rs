//! `trialkit fixtures` commands: check and regenerate fixture documents.

use std::path::Path;

use anyhow::Result;

use trialkit_core::client::ApiError;
use trialkit_core::config::HarnessConfig;
use trialkit_core::fixtures::{
    FixtureManifest, FixtureStore, check_all, regenerate_stale, templates_dir,
};
use trialkit_core::usage::UsageStats;

use crate::report::print_usage;

/// Print freshness for every fixture. Returns whether all are fresh.
pub fn run_check(config: &HarnessConfig, manifest_path: &Path) -> Result<bool> {
    let manifest = FixtureManifest::load(manifest_path)?;
    let store = FixtureStore::new(&config.fixtures_dir);
    let results = check_all(&manifest, &store, &templates_dir(&config.plugin_root));

    for r in &results {
        let mark = if r.stale { "STALE" } else { "ok   " };
        println!("{mark} {} -- {}", r.fixture, r.reason);
    }
    let stale = results.iter().filter(|r| r.stale).count();
    println!();
    println!("{stale}/{} fixture(s) stale", results.len());
    Ok(stale == 0)
}

/// Regenerate stale fixtures. Returns whether none failed.
pub async fn run_regenerate(config: &HarnessConfig, manifest_path: &Path) -> Result<bool> {
    let manifest = FixtureManifest::load(manifest_path)?;
    let client = match crate::config::api_client(config) {
        Ok(client) => client,
        Err(ApiError::MissingApiKey) => {
            println!("ANTHROPIC_API_KEY not set -- skipping fixture regeneration.");
            return Ok(true);
        }
        Err(e) => return Err(e.into()),
    };

    let store = FixtureStore::new(&config.fixtures_dir);
    let mut usage = UsageStats::default();
    let summary = regenerate_stale(
        &manifest,
        &store,
        &templates_dir(&config.plugin_root),
        &client,
        &config.generation_model,
        &mut usage,
    )
    .await;

    println!(
        "Checked {}, stale {}, regenerated {}, failed {}",
        summary.checked,
        summary.stale,
        summary.regenerated,
        summary.failed.len()
    );
    for failure in &summary.failed {
        println!("  - {failure}");
    }
    if !usage.is_empty() {
        print_usage("Usage:", &usage);
    }
    Ok(summary.failed.is_empty())
}
