//! `trialkit usage` command: fold and print a usage ledger.

use std::path::Path;

use anyhow::Result;

use trialkit_core::usage::{UsageLedger, aggregate};

use crate::report::{format_token_count, print_usage};

pub fn run_usage(dir: &Path) -> Result<()> {
    let ledger = UsageLedger::new(dir);
    let records = ledger.records()?;
    if records.is_empty() {
        println!("No usage records in {}", dir.display());
        return Ok(());
    }

    println!(
        "{:<30} {:<12} {:>6} {:>10} {:>10} {:>10}",
        "TASK", "WORKER", "CALLS", "INPUT", "OUTPUT", "COST"
    );
    println!("{}", "-".repeat(83));
    for record in &records {
        let name = if record.task.chars().count() > 28 {
            format!("{}...", record.task.chars().take(25).collect::<String>())
        } else {
            record.task.clone()
        };
        println!(
            "{:<30} {:<12} {:>6} {:>10} {:>10} {:>10}",
            name,
            record.worker,
            record.usage.api_calls,
            format_token_count(record.usage.input_tokens),
            format_token_count(record.usage.output_tokens),
            format!("${:.4}", record.usage.estimated_cost_usd),
        );
    }
    println!();
    print_usage(&format!("Total ({} record(s)):", records.len()), &aggregate(&records));
    Ok(())
}
