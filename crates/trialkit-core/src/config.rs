//! Resolved harness settings.
//!
//! [`HarnessConfig`] is plain data. The CLI builds one from flags, the
//! environment and its config file; tests build one directly.

use std::path::PathBuf;

use crate::client::AnthropicClient;

pub const DEFAULT_GENERATION_MODEL: &str = "claude-haiku-4-5";
pub const DEFAULT_GRADER_MODEL: &str = "claude-haiku-4-5";
pub const DEFAULT_MIN_PASS_RATE: f64 = 0.33;

/// Environment variables read by [`HarnessConfig::from_env`].
pub const ENV_GENERATION_MODEL: &str = "TRIALKIT_GENERATION_MODEL";
pub const ENV_GRADER_MODEL: &str = "TRIALKIT_GRADER_MODEL";
pub const ENV_MIN_PASS_RATE: &str = "TRIALKIT_MIN_PASS_RATE";
pub const ENV_API_BASE_URL: &str = "TRIALKIT_API_BASE_URL";

/// Settings shared by every evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub generation_model: String,
    pub grader_model: String,
    /// Used when a task does not set `success_criteria.min_pass_rate`.
    pub min_pass_rate: f64,
    /// Root of the plugin under test; substituted for `${CLAUDE_PLUGIN_ROOT}`.
    pub plugin_root: PathBuf,
    pub fixtures_dir: PathBuf,
    /// Where trial transcripts are written. `None` disables transcripts.
    pub transcripts_dir: Option<PathBuf>,
    pub api_base_url: String,
    /// Retry budget for transient API failures.
    pub max_retries: u32,
    /// Upper bound on concurrent task workers. `None` means probe.
    pub max_workers: Option<usize>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            grader_model: DEFAULT_GRADER_MODEL.to_string(),
            min_pass_rate: DEFAULT_MIN_PASS_RATE,
            plugin_root: PathBuf::from("plugin"),
            fixtures_dir: PathBuf::from("fixtures"),
            transcripts_dir: Some(PathBuf::from("transcripts")),
            api_base_url: AnthropicClient::DEFAULT_BASE_URL.to_string(),
            max_retries: AnthropicClient::DEFAULT_MAX_RETRIES,
            max_workers: None,
        }
    }
}

impl HarnessConfig {
    /// Defaults overlaid with any `TRIALKIT_*` variables that are set.
    ///
    /// An unparseable `TRIALKIT_MIN_PASS_RATE` is ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(model) = std::env::var(ENV_GENERATION_MODEL) {
            config.generation_model = model;
        }
        if let Ok(model) = std::env::var(ENV_GRADER_MODEL) {
            config.grader_model = model;
        }
        if let Ok(raw) = std::env::var(ENV_MIN_PASS_RATE) {
            match parse_pass_rate(&raw) {
                Some(rate) => config.min_pass_rate = rate,
                None => tracing::warn!(
                    value = %raw,
                    "ignoring {ENV_MIN_PASS_RATE}: expected a number in 0.0..=1.0"
                ),
            }
        }
        if let Ok(url) = std::env::var(ENV_API_BASE_URL) {
            config.api_base_url = url;
        }
        config
    }
}

/// Parse a pass rate in `0.0..=1.0`.
pub fn parse_pass_rate(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|r| (0.0..=1.0).contains(r))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = HarnessConfig::default();
        assert_eq!(c.generation_model, "claude-haiku-4-5");
        assert_eq!(c.min_pass_rate, 0.33);
        assert_eq!(c.api_base_url, "https://api.anthropic.com");
        assert!(c.max_workers.is_none());
    }

    #[test]
    fn pass_rate_parsing() {
        assert_eq!(parse_pass_rate("0.5"), Some(0.5));
        assert_eq!(parse_pass_rate(" 1 "), Some(1.0));
        assert_eq!(parse_pass_rate("1.2"), None);
        assert_eq!(parse_pass_rate("half"), None);
    }
}
