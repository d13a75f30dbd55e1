//! `trialkit probe` command: report rate limits and a worker count.

use anyhow::Result;

use trialkit_core::client::{ApiError, max_workers};
use trialkit_core::config::HarnessConfig;

pub async fn run_probe(config: &HarnessConfig) -> Result<()> {
    let client = match crate::config::api_client(config) {
        Ok(client) => client,
        Err(ApiError::MissingApiKey) => {
            println!("ANTHROPIC_API_KEY not set -- cannot probe rate limits.");
            println!("Fallback workers: {}", max_workers(None));
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let limits = client.probe_rate_limits(&config.generation_model).await?;
    println!("Rate limits for {}:", config.generation_model);
    println!("  Requests/min:      {}", limits.requests_per_minute);
    println!("  Input tokens/min:  {}", limits.input_tokens_per_minute);
    println!("  Output tokens/min: {}", limits.output_tokens_per_minute);
    println!("Recommended workers: {}", max_workers(Some(&limits)));
    Ok(())
}
