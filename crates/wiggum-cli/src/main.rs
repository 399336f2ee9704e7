//! # wiggum-cli
//!
//! Binary entry point for Wiggum.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Configuration loading with command-line overrides
//! - The supervised iteration loop via `wiggum run` and `wiggum once`
//! - Outstanding work and recent activity via `wiggum status`
//! - Threshold lookup via `wiggum thresholds`

mod runner;
mod status;
mod trackers;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::warn;
use wiggum_core::WiggumConfig;

/// Wiggum - context-rotating supervisor for long-running coding agents.
#[derive(Parser, Debug)]
#[command(name = "wiggum", version, about)]
struct Cli {
    /// Config file (missing file means defaults)
    #[arg(short, long, default_value = "wiggum.yml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent loop until the work is done or a limit is hit
    Run(RunArgs),

    /// Run exactly one iteration
    Once(OnceArgs),

    /// Show outstanding tracker items and recent activity
    Status(StatusArgs),

    /// Show the context thresholds a model resolves to
    Thresholds(ThresholdsArgs),
}

/// Overrides shared by `run` and `once`.
#[derive(Args, Debug, Default, Clone)]
struct TaskArgs {
    /// Inline task prompt (overrides loop.prompt and loop.prompt_file)
    #[arg(short = 'p', long = "prompt", conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// Task prompt file (overrides loop.prompt and loop.prompt_file)
    #[arg(short = 'P', long = "prompt-file")]
    prompt_file: Option<PathBuf>,

    /// Agent model
    #[arg(short, long)]
    model: Option<String>,

    /// Tracker label that scopes outstanding work
    #[arg(long)]
    label: Option<String>,

    /// Print the resolved agent command and thresholds without launching
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    task: TaskArgs,

    /// Maximum number of iterations
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Work branch to create or check out before the first iteration
    #[arg(long)]
    branch: Option<String>,

    /// Push and open a pull request when the run completes
    #[arg(long)]
    pr: bool,
}

#[derive(Args, Debug, Clone)]
struct OnceArgs {
    #[command(flatten)]
    task: TaskArgs,
}

#[derive(Args, Debug, Clone)]
struct StatusArgs {
    /// Activity log lines to show
    #[arg(short = 'n', long, default_value_t = 20)]
    lines: usize,
}

#[derive(Args, Debug, Clone)]
struct ThresholdsArgs {
    /// Model identifier, e.g. `sonnet-4.5`
    model: String,
}

impl TaskArgs {
    fn apply(&self, config: &mut WiggumConfig) {
        if let Some(prompt) = &self.prompt {
            config.loop_config.prompt = Some(prompt.clone());
            config.loop_config.prompt_file = None;
        }
        if let Some(file) = &self.prompt_file {
            config.loop_config.prompt_file = Some(file.clone());
            config.loop_config.prompt = None;
        }
        if let Some(model) = &self.model {
            config.agent.model.clone_from(model);
        }
        if let Some(label) = &self.label {
            config.tracker.label = Some(label.clone());
        }
    }
}

impl RunArgs {
    fn apply(&self, config: &mut WiggumConfig) {
        self.task.apply(config);
        if let Some(max) = self.max_iterations {
            config.loop_config.max_iterations = max;
        }
        if let Some(branch) = &self.branch {
            config.loop_config.branch = Some(branch.clone());
        }
        if self.pr {
            config.loop_config.open_pr = true;
        }
    }
}

/// Loads the config without logging, so the state directory is known
/// before tracing is installed. Returns whether the file was missing.
fn load_config(path: &Path) -> Result<(WiggumConfig, bool)> {
    if path.exists() {
        let config = WiggumConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        Ok((config, false))
    } else {
        Ok((WiggumConfig::default(), true))
    }
}

/// Installs the tracing subscriber.
///
/// `RUST_LOG` wins over `--verbose`. With `WIGGUM_DEBUG_LOG=1` output goes
/// to `<state_dir>/wiggum.log` instead of stderr.
fn init_logging(verbose: bool, state_dir: &Path) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let debug_log = std::env::var("WIGGUM_DEBUG_LOG").is_ok_and(|v| v == "1");
    if debug_log
        && std::fs::create_dir_all(state_dir).is_ok()
        && let Ok(file) = std::fs::File::create(state_dir.join("wiggum.log"))
    {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("failed to resolve the working directory")?;
    let (mut config, missing) = load_config(&cli.config)?;

    init_logging(cli.verbose, &root.join(&config.loop_config.state_dir));
    if missing {
        warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    let code = match cli.command {
        Commands::Run(args) => {
            args.apply(&mut config);
            runner::run(config, root, args.task.dry_run).await?
        }
        Commands::Once(args) => {
            args.task.apply(&mut config);
            config.loop_config.max_iterations = 1;
            runner::run(config, root, args.task.dry_run).await?
        }
        Commands::Status(args) => {
            status::print_status(&config, &root, args.lines).await?;
            0
        }
        Commands::Thresholds(args) => {
            print_thresholds(&config, &args.model);
            0
        }
    };

    std::process::exit(code);
}

fn print_thresholds(config: &WiggumConfig, model: &str) {
    let table = config.budget.threshold_table();
    let tier = table.resolve(model);
    println!("model:   {model}");
    println!("tier:    {}", tier.name);
    println!("warn:    {} tokens", tier.warn);
    println!("rotate:  {} tokens", tier.rotate);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags_override_config() {
        let cli = Cli::try_parse_from([
            "wiggum",
            "run",
            "-p",
            "Port the parser",
            "--model",
            "gpt-5",
            "--label",
            "parser",
            "--max-iterations",
            "7",
            "--branch",
            "wiggum/parser",
            "--pr",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        let mut config = WiggumConfig::default();
        config.loop_config.prompt_file = Some(PathBuf::from("PROMPT.md"));
        args.apply(&mut config);

        assert_eq!(config.loop_config.prompt.as_deref(), Some("Port the parser"));
        assert_eq!(config.loop_config.prompt_file, None);
        assert_eq!(config.agent.model, "gpt-5");
        assert_eq!(config.tracker.label.as_deref(), Some("parser"));
        assert_eq!(config.loop_config.max_iterations, 7);
        assert_eq!(config.loop_config.branch.as_deref(), Some("wiggum/parser"));
        assert!(config.loop_config.open_pr);
    }

    #[test]
    fn test_prompt_and_prompt_file_conflict() {
        let result = Cli::try_parse_from(["wiggum", "run", "-p", "x", "-P", "PROMPT.md"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["wiggum", "status", "-c", "custom.yml", "-n", "5"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("custom.yml"));
        assert!(matches!(cli.command, Commands::Status(StatusArgs { lines: 5 })));
    }

    #[test]
    fn test_missing_config_yields_defaults() {
        let temp = tempfile::TempDir::new().unwrap();
        let (config, missing) = load_config(&temp.path().join("wiggum.yml")).unwrap();
        assert!(missing);
        assert_eq!(config, WiggumConfig::default());
    }
}
