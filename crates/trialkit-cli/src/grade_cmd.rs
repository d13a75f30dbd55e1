//! `trialkit grade` command: run the code grader on a local document.

use std::path::Path;

use anyhow::{Context, Result};

use trialkit_core::grader::{CodeChecks, GraderDetails, run_code_grader};

/// Parse a checks file. Accepts either bare check keys or a `[checks]`
/// table, so a grader block copied from a task file works too.
pub fn parse_checks(content: &str) -> Result<CodeChecks> {
    let table: toml::Table = toml::from_str(content).context("invalid checks TOML")?;
    let value = match table.get("checks") {
        Some(inner) => inner.clone(),
        None => toml::Value::Table(table),
    };
    value.try_into().context("invalid code checks")
}

/// Run the grade command. Returns whether every check passed.
pub fn run_grade(document: &Path, checks_path: &Path) -> Result<bool> {
    let output = std::fs::read_to_string(document)
        .with_context(|| format!("failed to read {}", document.display()))?;
    let checks_toml = std::fs::read_to_string(checks_path)
        .with_context(|| format!("failed to read {}", checks_path.display()))?;
    let checks = parse_checks(&checks_toml)?;

    let result = run_code_grader(&output, &checks);
    if let GraderDetails::Checks(items) = &result.details {
        for item in items {
            let mark = if item.passed { "pass" } else { "FAIL" };
            match &item.message {
                Some(message) => println!("{mark}  {}: {message}", item.check),
                None => println!("{mark}  {}", item.check),
            }
        }
    }
    println!();
    println!(
        "{}: {}",
        document.display(),
        if result.passed { "passed" } else { "failed" }
    );
    Ok(result.passed)
}
