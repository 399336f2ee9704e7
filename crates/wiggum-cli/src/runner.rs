//! Wires the configured agent, tracker, and repository into the loop.

use crate::trackers::ConfiguredTracker;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wiggum_adapters::{AgentExecutor, CursorBackend};
use wiggum_core::vcs::GitRepo;
use wiggum_core::{IterationLoop, LaunchRequest, LoopSettings, PromptBuilder, TaskTracker, WiggumConfig};

/// Runs the loop and returns the process exit code.
pub async fn run(config: WiggumConfig, root: PathBuf, dry_run: bool) -> Result<i32> {
    let warnings = config.validate().context("invalid configuration")?;
    for warning in &warnings {
        warn!("{}", warning);
    }

    let base_prompt = config.base_prompt(&root).context("failed to read the task prompt")?;
    let settings = LoopSettings::from_config(&config, &root);
    let backend = CursorBackend::from_config(&config.agent);
    let tracker = ConfiguredTracker::from_config(&config, &root);
    let prompt = PromptBuilder::new(base_prompt, &config.sentinels.complete, &config.sentinels.gutter);

    if dry_run {
        print_dry_run(&config, &settings, &backend, &tracker, &prompt);
        return Ok(0);
    }

    let executor = AgentExecutor::new(backend, &root);
    let repo = GitRepo::new(&root, &config.vcs.remote);
    let mut iteration_loop = IterationLoop::new(settings, executor, tracker, repo, prompt);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping the agent");
            interrupt.cancel();
        }
    });

    let reason = iteration_loop.run(cancel).await.context("loop failed")?;
    let state = iteration_loop.state();
    println!(
        "\n{}",
        reason.status_message(state.iteration, state.started_at.elapsed(), &iteration_loop.failure_log_path())
    );
    Ok(reason.exit_code())
}

fn print_dry_run(
    config: &WiggumConfig,
    settings: &LoopSettings,
    backend: &CursorBackend,
    tracker: &ConfiguredTracker,
    prompt: &PromptBuilder,
) {
    let request = LaunchRequest {
        prompt: prompt.build(1, false),
        model: settings.model.clone(),
        resume_session: None,
        iteration: 1,
    };
    let tier = config.budget.threshold_table().resolve(&settings.model).clone();

    println!("Dry run mode - no agent will be launched");
    println!("  command:        {}", backend.display_command(&request));
    println!("  model:          {}", settings.model);
    println!(
        "  thresholds:     warn {} / rotate {} tokens ({})",
        tier.warn, tier.rotate, tier.name
    );
    println!("  max iterations: {}", settings.max_iterations);
    println!("  tracker:        {}", tracker.name());
    println!("  state dir:      {}", settings.state_dir.display());
    if let Some(branch) = &settings.branch {
        println!("  branch:         {branch}");
    }
}
