//! Configuration file management for trialkit.
//!
//! Provides a TOML-based config file at `~/.config/trialkit/config.toml` and
//! a resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use trialkit_core::client::{AnthropicClient, ApiError};
use trialkit_core::config::{
    ENV_API_BASE_URL, ENV_GENERATION_MODEL, ENV_GRADER_MODEL, ENV_MIN_PASS_RATE, HarnessConfig,
    parse_pass_rate,
};

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub models: ModelsSection,
    pub paths: PathsSection,
    pub eval: EvalSection,
    pub api: ApiSection,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsSection {
    pub generation: Option<String>,
    pub grader: Option<String>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub plugin_root: Option<PathBuf>,
    pub fixtures_dir: Option<PathBuf>,
    pub transcripts_dir: Option<PathBuf>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalSection {
    pub min_pass_rate: Option<f64>,
    pub max_workers: Option<usize>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: Option<String>,
    pub max_retries: Option<u32>,
}

impl ConfigFile {
    /// A file with every value set to the built-in default.
    pub fn with_defaults() -> Self {
        let d = HarnessConfig::default();
        Self {
            models: ModelsSection {
                generation: Some(d.generation_model),
                grader: Some(d.grader_model),
            },
            paths: PathsSection {
                plugin_root: Some(d.plugin_root),
                fixtures_dir: Some(d.fixtures_dir),
                transcripts_dir: d.transcripts_dir,
            },
            eval: EvalSection {
                min_pass_rate: Some(d.min_pass_rate),
                max_workers: None,
            },
            api: ApiSection {
                base_url: Some(d.api_base_url),
                max_retries: Some(d.max_retries),
            },
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the trialkit config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/trialkit` or
/// `~/.config/trialkit`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("trialkit");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("trialkit")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))
}

/// Load the config file if there is one. A malformed file is an error; a
/// missing one is not.
pub fn load_config() -> Result<Option<ConfigFile>> {
    let path = config_path();
    if !path.exists() {
        return Ok(None);
    }
    load_config_from(&path).map(Some)
}

/// Serialize and write `config` to `path`, creating parent dirs as needed.
pub fn save_config_to(config: &ConfigFile, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolution
// -----------------------------------------------------------------------

/// Values given on the command line.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub generation_model: Option<String>,
    pub grader_model: Option<String>,
    pub min_pass_rate: Option<f64>,
    pub plugin_root: Option<PathBuf>,
    pub fixtures_dir: Option<PathBuf>,
    pub transcripts_dir: Option<PathBuf>,
    pub no_transcripts: bool,
    pub workers: Option<usize>,
}

/// Resolve configuration using the chain: CLI flag > env var > config file
/// > default.
///
/// `env` looks up an environment variable; the real process environment
/// is [`std_env`].
pub fn resolve(
    cli: &CliOverrides,
    env: impl Fn(&str) -> Option<String>,
    file: Option<&ConfigFile>,
) -> HarnessConfig {
    let defaults = HarnessConfig::default();
    let file_default = ConfigFile::default();
    let file = file.unwrap_or(&file_default);

    let env_rate = env(ENV_MIN_PASS_RATE).and_then(|raw| {
        let rate = parse_pass_rate(&raw);
        if rate.is_none() {
            tracing::warn!(value = %raw, "ignoring {ENV_MIN_PASS_RATE}: expected a number in 0.0..=1.0");
        }
        rate
    });

    let transcripts_dir = if cli.no_transcripts {
        None
    } else {
        cli.transcripts_dir
            .clone()
            .or_else(|| file.paths.transcripts_dir.clone())
            .or(defaults.transcripts_dir)
    };

    HarnessConfig {
        generation_model: cli
            .generation_model
            .clone()
            .or_else(|| env(ENV_GENERATION_MODEL))
            .or_else(|| file.models.generation.clone())
            .unwrap_or(defaults.generation_model),
        grader_model: cli
            .grader_model
            .clone()
            .or_else(|| env(ENV_GRADER_MODEL))
            .or_else(|| file.models.grader.clone())
            .unwrap_or(defaults.grader_model),
        min_pass_rate: cli
            .min_pass_rate
            .or(env_rate)
            .or(file.eval.min_pass_rate)
            .unwrap_or(defaults.min_pass_rate),
        plugin_root: cli
            .plugin_root
            .clone()
            .or_else(|| file.paths.plugin_root.clone())
            .unwrap_or(defaults.plugin_root),
        fixtures_dir: cli
            .fixtures_dir
            .clone()
            .or_else(|| file.paths.fixtures_dir.clone())
            .unwrap_or(defaults.fixtures_dir),
        transcripts_dir,
        api_base_url: env(ENV_API_BASE_URL)
            .or_else(|| file.api.base_url.clone())
            .unwrap_or(defaults.api_base_url),
        max_retries: file.api.max_retries.unwrap_or(defaults.max_retries),
        max_workers: cli.workers.or(file.eval.max_workers),
    }
}

pub fn std_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Load the config file and resolve against the process environment.
pub fn resolve_config(cli: &CliOverrides) -> Result<HarnessConfig> {
    let file = load_config()?;
    Ok(resolve(cli, std_env, file.as_ref()))
}

/// API client for the resolved settings. Fails with
/// [`ApiError::MissingApiKey`] when `ANTHROPIC_API_KEY` is unset.
pub fn api_client(config: &HarnessConfig) -> Result<AnthropicClient, ApiError> {
    Ok(AnthropicClient::from_env(&config.api_base_url)?.with_max_retries(config.max_retries))
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn file_with_models(generation: &str) -> ConfigFile {
        ConfigFile {
            models: ModelsSection {
                generation: Some(generation.into()),
                grader: None,
            },
            ..ConfigFile::default()
        }
    }

    #[test]
    fn cli_flag_overrides_all() {
        let cli = CliOverrides {
            generation_model: Some("cli-model".into()),
            ..CliOverrides::default()
        };
        let file = file_with_models("file-model");
        let env = env_of(&[(ENV_GENERATION_MODEL, "env-model")]);

        let config = resolve(&cli, env, Some(&file));
        assert_eq!(config.generation_model, "cli-model");
    }

    #[test]
    fn env_var_overrides_config_file() {
        let file = file_with_models("file-model");
        let env = env_of(&[(ENV_GENERATION_MODEL, "env-model")]);

        let config = resolve(&CliOverrides::default(), env, Some(&file));
        assert_eq!(config.generation_model, "env-model");
    }

    #[test]
    fn config_file_overrides_default() {
        let file = file_with_models("file-model");
        let config = resolve(&CliOverrides::default(), env_of(&[]), Some(&file));
        assert_eq!(config.generation_model, "file-model");
        assert_eq!(config.grader_model, HarnessConfig::default().grader_model);
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = resolve(&CliOverrides::default(), env_of(&[]), None);
        assert_eq!(config, HarnessConfig::default());
    }

    #[test]
    fn invalid_env_pass_rate_falls_through() {
        let file = ConfigFile {
            eval: EvalSection {
                min_pass_rate: Some(0.5),
                max_workers: Some(3),
            },
            ..ConfigFile::default()
        };
        let env = env_of(&[(ENV_MIN_PASS_RATE, "lots")]);

        let config = resolve(&CliOverrides::default(), env, Some(&file));
        assert_eq!(config.min_pass_rate, 0.5);
        assert_eq!(config.max_workers, Some(3));
    }

    #[test]
    fn retry_budget_comes_from_file() {
        let file: ConfigFile = toml::from_str("[api]\nmax_retries = 1\n").unwrap();
        let config = resolve(&CliOverrides::default(), env_of(&[]), Some(&file));
        assert_eq!(config.max_retries, 1);

        let config = resolve(&CliOverrides::default(), env_of(&[]), None);
        assert_eq!(config.max_retries, AnthropicClient::DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn no_transcripts_wins_over_everything() {
        let cli = CliOverrides {
            transcripts_dir: Some("out".into()),
            no_transcripts: true,
            ..CliOverrides::default()
        };
        let config = resolve(&cli, env_of(&[]), None);
        assert!(config.transcripts_dir.is_none());
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("trialkit").join("config.toml");

        let original = ConfigFile::with_defaults();
        save_config_to(&original, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded, original);
    }

    #[test]
    fn partial_file_parses() {
        let cfg: ConfigFile = toml::from_str("[eval]\nmin_pass_rate = 0.67\n").unwrap();
        assert_eq!(cfg.eval.min_pass_rate, Some(0.67));
        assert!(cfg.models.generation.is_none());
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("trialkit/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
