mod config;
mod fixtures_cmd;
mod grade_cmd;
mod probe_cmd;
mod report;
mod run_cmd;
mod smoke_cmd;
mod task_file;
mod usage_cmd;
mod validate_cmd;

use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use config::CliOverrides;

#[derive(Parser)]
#[command(name = "trialkit", about = "Trial-based evaluation harness for LLM plugin prompts")]
struct Cli {
    /// Plugin directory under test
    #[arg(long, global = true)]
    plugin_root: Option<PathBuf>,

    /// Directory holding fixture documents
    #[arg(long, global = true)]
    fixtures_dir: Option<PathBuf>,

    /// Where trial transcripts are written
    #[arg(long, global = true)]
    transcripts_dir: Option<PathBuf>,

    /// Do not write trial transcripts
    #[arg(long, global = true)]
    no_transcripts: bool,

    /// Model used for generation (overrides TRIALKIT_GENERATION_MODEL)
    #[arg(long, global = true)]
    generation_model: Option<String>,

    /// Model used for rubric grading (overrides TRIALKIT_GRADER_MODEL)
    #[arg(long, global = true)]
    grader_model: Option<String>,

    /// Default fraction of trials that must pass (overrides TRIALKIT_MIN_PASS_RATE)
    #[arg(long, global = true, value_parser = parse_rate)]
    min_pass_rate: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a trialkit config file with default values
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Parse task files and report problems without running them
    Validate {
        /// Task TOML files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Evaluate task files
    Run {
        /// Task TOML files (content or orchestration)
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Maximum concurrent tasks (default: probe rate limits)
        #[arg(long)]
        workers: Option<usize>,
        /// Timeout per task in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Usage ledger directory (default: <transcripts>/usage)
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
    /// Run the code grader on a local document
    Grade {
        /// Document to grade
        file: PathBuf,
        /// TOML file with code checks
        #[arg(long)]
        checks: PathBuf,
    },
    /// Fixture freshness and regeneration
    Fixtures {
        #[command(subcommand)]
        command: FixtureCommands,
    },
    /// Show API rate limits and the recommended worker count
    Probe,
    /// Check that the host runtime loads the plugin
    Smoke {
        /// Plugin name (default: from .claude-plugin/plugin.json)
        #[arg(long)]
        plugin: Option<String>,
        /// Agent that must be registered (repeatable)
        #[arg(long = "expect-agent")]
        expect_agents: Vec<String>,
        /// Slash command that must be registered (repeatable)
        #[arg(long = "expect-command")]
        expect_commands: Vec<String>,
        /// Agent that must be started during the run (repeatable)
        #[arg(long = "expect-spawn")]
        expect_spawned: Vec<String>,
        /// Path fragment some Write call must target (repeatable)
        #[arg(long = "expect-write")]
        expect_written: Vec<String>,
        /// Skill that must be invoked during the run (repeatable)
        #[arg(long = "expect-skill")]
        expect_skills: Vec<String>,
        /// Host CLI binary
        #[arg(long, default_value = trialkit_core::host::DEFAULT_HOST_BINARY)]
        binary: String,
        /// Maximum host turns
        #[arg(long, default_value_t = 5)]
        max_turns: u32,
        /// Prompt sent to the host
        #[arg(long)]
        prompt: Option<String>,
        /// Working directory for the host process
        #[arg(long)]
        workdir: Option<PathBuf>,
    },
    /// Fold and print a usage ledger
    Usage {
        /// Ledger directory
        dir: PathBuf,
    },
    /// Print shell completions
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum FixtureCommands {
    /// Report which fixtures are older than their templates
    Check {
        /// Fixture manifest TOML
        #[arg(long)]
        manifest: PathBuf,
    },
    /// Regenerate stale fixtures with the generation model
    Regenerate {
        /// Fixture manifest TOML
        #[arg(long)]
        manifest: PathBuf,
    },
}

fn parse_rate(raw: &str) -> Result<f64, String> {
    trialkit_core::config::parse_pass_rate(raw)
        .ok_or_else(|| format!("{raw:?} is not a number in 0.0..=1.0"))
}

impl Cli {
    fn overrides(&self, workers: Option<usize>) -> CliOverrides {
        CliOverrides {
            generation_model: self.generation_model.clone(),
            grader_model: self.grader_model.clone(),
            min_pass_rate: self.min_pass_rate,
            plugin_root: self.plugin_root.clone(),
            fixtures_dir: self.fixtures_dir.clone(),
            transcripts_dir: self.transcripts_dir.clone(),
            no_transcripts: self.no_transcripts,
            workers,
        }
    }
}

/// Execute the `trialkit init` command: write config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    config::save_config_to(&config::ConfigFile::with_defaults(), &path)?;
    println!("Config written to {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let passed = match &cli.command {
        Commands::Init { force } => {
            cmd_init(*force)?;
            true
        }
        Commands::Validate { files } => validate_cmd::run_validate(files),
        Commands::Run {
            files,
            workers,
            timeout,
            ledger,
        } => {
            let resolved = config::resolve_config(&cli.overrides(*workers))?;
            let options = run_cmd::RunOptions {
                files: files.clone(),
                timeout: timeout.map(Duration::from_secs),
                ledger_dir: ledger.clone(),
            };
            run_cmd::run_tasks(resolved, options).await?
        }
        Commands::Grade { file, checks } => grade_cmd::run_grade(file, checks)?,
        Commands::Fixtures { command } => {
            let resolved = config::resolve_config(&cli.overrides(None))?;
            match command {
                FixtureCommands::Check { manifest } => fixtures_cmd::run_check(&resolved, manifest)?,
                FixtureCommands::Regenerate { manifest } => {
                    fixtures_cmd::run_regenerate(&resolved, manifest).await?
                }
            }
        }
        Commands::Probe => {
            let resolved = config::resolve_config(&cli.overrides(None))?;
            probe_cmd::run_probe(&resolved).await?;
            true
        }
        Commands::Smoke {
            plugin,
            expect_agents,
            expect_commands,
            expect_spawned,
            expect_written,
            expect_skills,
            binary,
            max_turns,
            prompt,
            workdir,
        } => {
            let resolved = config::resolve_config(&cli.overrides(None))?;
            smoke_cmd::run_smoke(smoke_cmd::SmokeOptions {
                plugin_root: resolved.plugin_root,
                plugin_name: plugin.clone(),
                expect: smoke_cmd::Expectations {
                    agents: expect_agents.clone(),
                    commands: expect_commands.clone(),
                    spawned: expect_spawned.clone(),
                    written: expect_written.clone(),
                    skills: expect_skills.clone(),
                },
                binary: binary.clone(),
                max_turns: *max_turns,
                prompt: prompt.clone(),
                workdir: workdir.clone(),
            })
            .await?
        }
        Commands::Usage { dir } => {
            usage_cmd::run_usage(dir)?;
            true
        }
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "trialkit", &mut std::io::stdout());
            true
        }
    };

    if !passed {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_reach_overrides() {
        let cli = Cli::parse_from([
            "trialkit",
            "run",
            "--workers",
            "3",
            "--min-pass-rate",
            "0.67",
            "--no-transcripts",
            "tasks/brief.toml",
        ]);
        let Commands::Run { workers, files, .. } = &cli.command else {
            panic!("expected run");
        };
        assert_eq!(files, &vec![PathBuf::from("tasks/brief.toml")]);
        let overrides = cli.overrides(*workers);
        assert_eq!(overrides.workers, Some(3));
        assert_eq!(overrides.min_pass_rate, Some(0.67));
        assert!(overrides.no_transcripts);
    }

    #[test]
    fn bad_pass_rate_is_rejected() {
        assert!(Cli::try_parse_from(["trialkit", "--min-pass-rate", "2", "probe"]).is_err());
    }
}
