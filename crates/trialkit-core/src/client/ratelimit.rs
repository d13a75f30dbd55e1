//! Rate-limit detection and worker sizing.

use reqwest::header::HeaderMap;
use serde::Serialize;

const FALLBACK_WORKERS: usize = 2;
const OUTPUT_TPM_PER_WORKER: u64 = 10_000;
const MAX_WORKERS: usize = 16;

/// Per-minute limits reported by the API for one model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateLimits {
    pub requests_per_minute: u64,
    pub input_tokens_per_minute: u64,
    pub output_tokens_per_minute: u64,
}

impl RateLimits {
    /// Read the `anthropic-ratelimit-*-limit` headers. Missing or
    /// unparseable headers read as 0.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(0)
        };
        Self {
            requests_per_minute: get("anthropic-ratelimit-requests-limit"),
            input_tokens_per_minute: get("anthropic-ratelimit-input-tokens-limit"),
            output_tokens_per_minute: get("anthropic-ratelimit-output-tokens-limit"),
        }
    }
}

/// Number of concurrent task workers the limits can sustain.
///
/// Output tokens per minute is the binding constraint: one worker per
/// 10k output TPM, clamped to `1..=16`. Unknown limits give 2.
pub fn max_workers(limits: Option<&RateLimits>) -> usize {
    match limits {
        Some(l) if l.output_tokens_per_minute > 0 => {
            let n = (l.output_tokens_per_minute / OUTPUT_TPM_PER_WORKER) as usize;
            n.clamp(1, MAX_WORKERS)
        }
        _ => FALLBACK_WORKERS,
    }
}
