//! Iteration loop controller.
//!
//! Starts one agent per iteration, wires the stream pipeline, watchdog and
//! heartbeat around it, waits for a terminal signal or natural exit, tears
//! everything down, and decides whether to continue, rotate, abort, or
//! finish.

mod loop_state;
#[cfg(test)]
mod tests;

pub use loop_state::{LoopDecision, LoopPhase, LoopState, TerminationReason, decide};

use crate::activity_log::{ActivityLog, FailureLog, ignore_run_logs, spawn_activity_writer};
use crate::agent::{AgentLauncher, AgentProcess, LaunchRequest};
use crate::classifier::{ClassifierSettings, EventClassifier};
use crate::config::WiggumConfig;
use crate::heartbeat::run_heartbeat;
use crate::pipeline::{PipelineReport, StreamPipeline};
use crate::process_tree::{ProcessTable, SystemProcessTable};
use crate::prompt::PromptBuilder;
use crate::signal_channel::{SignalReceiver, signal_channel};
use crate::tracker::TaskTracker;
use crate::utils::format_tokens;
use crate::vcs::VersionControl;
use crate::watchdog::Watchdog;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wiggum_proto::{ActivityKind, ActivityRecord, ControlSignal, Health, Result};

/// How long teardown waits for the pipeline to drain after the agent is gone.
const PIPELINE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Loop knobs, resolved from configuration and CLI flags.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub max_iterations: u32,
    pub model: String,
    pub resume: bool,
    pub state_dir: PathBuf,
    pub echo_activity: bool,
    /// `None` disables the heartbeat.
    pub heartbeat: Option<Duration>,
    /// `None` disables the watchdog.
    pub watchdog_interval: Option<Duration>,
    pub checkpoint: bool,
    pub checkpoint_message: String,
    pub push: bool,
    pub branch: Option<String>,
    pub open_pr: bool,
    pub pr_title: Option<String>,
    pub classifier: ClassifierSettings,
    pub drain_timeout: Duration,
}

impl LoopSettings {
    /// Resolves settings; `state_dir` is taken relative to `root`.
    pub fn from_config(config: &WiggumConfig, root: &Path) -> Self {
        let loop_config = &config.loop_config;
        Self {
            max_iterations: loop_config.max_iterations,
            model: config.agent.model.clone(),
            resume: config.agent.resume,
            state_dir: root.join(&loop_config.state_dir),
            echo_activity: loop_config.echo_activity,
            heartbeat: (loop_config.heartbeat_secs > 0)
                .then(|| Duration::from_secs(loop_config.heartbeat_secs)),
            watchdog_interval: config
                .watchdog
                .enabled
                .then(|| Duration::from_millis(config.watchdog.interval_ms.max(1))),
            checkpoint: config.vcs.checkpoint,
            checkpoint_message: config.vcs.checkpoint_message.clone(),
            push: config.vcs.push,
            branch: loop_config.branch.clone(),
            open_pr: loop_config.open_pr,
            pr_title: loop_config.pr_title.clone(),
            classifier: ClassifierSettings::from_config(config),
            drain_timeout: PIPELINE_DRAIN_TIMEOUT,
        }
    }
}

/// What one iteration produced.
#[derive(Debug, Default)]
struct IterationOutcome {
    signal: Option<ControlSignal>,
    warned: bool,
    interrupted: bool,
    exit_code: Option<i32>,
    report: PipelineReport,
}

/// The top-level supervisor.
pub struct IterationLoop<L, T, V> {
    settings: LoopSettings,
    launcher: L,
    tracker: T,
    vcs: V,
    prompt: PromptBuilder,
    process_table: Arc<dyn ProcessTable>,
    state: LoopState,
}

impl<L, T, V> IterationLoop<L, T, V>
where
    L: AgentLauncher,
    T: TaskTracker,
    V: VersionControl,
{
    pub fn new(settings: LoopSettings, launcher: L, tracker: T, vcs: V, prompt: PromptBuilder) -> Self {
        Self {
            settings,
            launcher,
            tracker,
            vcs,
            prompt,
            process_table: Arc::new(SystemProcessTable),
            state: LoopState::new(),
        }
    }

    /// Replaces the OS process table the watchdog scans.
    pub fn with_process_table(mut self, table: Arc<dyn ProcessTable>) -> Self {
        self.process_table = table;
        self
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn failure_log_path(&self) -> PathBuf {
        self.settings.state_dir.join(crate::activity_log::FAILURE_LOG_FILE)
    }

    /// Runs iterations until the run completes, guts, exhausts, or `cancel`
    /// fires.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<TerminationReason> {
        std::fs::create_dir_all(&self.settings.state_dir)?;
        if let Err(e) = ignore_run_logs(&self.settings.state_dir) {
            warn!(path = %self.settings.state_dir.display(), "Failed to write state .gitignore: {}", e);
        }
        let failure_log = FailureLog::open(&self.settings.state_dir)?;
        let mut activity_log = ActivityLog::open(&self.settings.state_dir)?;

        info!(
            model = %self.settings.model,
            max_iterations = self.settings.max_iterations,
            tracker = self.tracker.name(),
            "Starting wiggum loop"
        );

        if let Some(branch) = self.settings.branch.clone()
            && let Err(e) = self.vcs.ensure_branch(&branch).await
        {
            warn!(branch = %branch, "Could not switch to work branch: {}", e);
        }
        self.checkpoint(&mut activity_log).await;

        let reason = loop {
            if cancel.is_cancelled() {
                break TerminationReason::Interrupted;
            }
            let iteration = self.state.begin_iteration();
            if let Err(e) = activity_log.banner(iteration) {
                warn!("Failed to write iteration banner: {}", e);
            }

            let (outcome, log) = self.run_iteration(iteration, activity_log, &failure_log, &cancel).await?;
            activity_log = log;
            self.summarize(&mut activity_log, iteration, &outcome);

            if let Some(session_id) = outcome.report.session_id.clone() {
                self.state.session_id = Some(session_id);
            }
            self.state.last_signal = outcome.signal;
            if outcome.interrupted {
                break TerminationReason::Interrupted;
            }

            if outcome.signal != Some(ControlSignal::Gutter) {
                self.checkpoint(&mut activity_log).await;
            }

            let outstanding = self.outstanding().await;
            let decision = decide(outcome.signal, outstanding);
            if outcome.signal == Some(ControlSignal::Complete)
                && let LoopDecision::Continue { .. } = decision
            {
                warn!(
                    iteration,
                    outstanding = outstanding.unwrap_or_default(),
                    "Agent claimed COMPLETE but the tracker still has outstanding work"
                );
                log_line(
                    &mut activity_log,
                    &format!("⚠ COMPLETE claimed with {} outstanding item(s); continuing", outstanding.unwrap_or_default()),
                );
            }
            debug!(iteration, ?decision, ?outstanding, "Iteration decision");

            if let Some(reason) = self.state.advance(decision, self.settings.max_iterations) {
                break reason;
            }
        };

        if reason == TerminationReason::Completed && self.settings.open_pr {
            self.open_pull_request().await;
        }

        log_line(
            &mut activity_log,
            &format!("═══ Run ended: {} after {} iteration(s) ═══", reason, self.state.iteration),
        );
        info!(reason = %reason, iterations = self.state.iteration, "Wiggum loop finished");
        Ok(reason)
    }

    async fn run_iteration(
        &mut self,
        iteration: u32,
        activity_log: ActivityLog,
        failure_log: &FailureLog,
        cancel: &CancellationToken,
    ) -> Result<(IterationOutcome, ActivityLog)> {
        let rotated = self.state.cold;
        let prompt = self
            .prompt
            .clone()
            .with_guardrails(PromptBuilder::load_guardrails(&self.settings.state_dir))
            .build(iteration, rotated);
        let request = LaunchRequest {
            prompt,
            model: self.settings.model.clone(),
            resume_session: if self.settings.resume && !rotated {
                self.state.session_id.clone()
            } else {
                None
            },
            iteration,
        };

        info!(iteration, cold = rotated, resume = ?request.resume_session, "Launching agent");
        let mut process = self.launcher.launch(&request).await?;
        self.state.phase = LoopPhase::Running;

        let (signal_tx, mut signal_rx) = signal_channel();
        let (record_tx, record_rx) = mpsc::unbounded_channel();
        let writer = spawn_activity_writer(activity_log, record_rx, self.settings.echo_activity);
        let tasks = cancel.child_token();

        let pipeline = process.take_stdout().map(|stdout| {
            let pipeline = StreamPipeline::new(
                EventClassifier::new(&self.settings.classifier),
                signal_tx.clone(),
                record_tx.clone(),
                failure_log.clone(),
            );
            tokio::spawn(pipeline.run(stdout))
        });
        let watchdog = match (self.settings.watchdog_interval, process.pid()) {
            (Some(interval), Some(pid)) => Some(tokio::spawn(
                Watchdog::new(
                    Arc::clone(&self.process_table),
                    pid,
                    interval,
                    signal_tx.clone(),
                    failure_log.clone(),
                )
                .run(tasks.clone()),
            )),
            _ => None,
        };
        let heartbeat = self
            .settings
            .heartbeat
            .map(|interval| tokio::spawn(run_heartbeat(iteration, interval, tasks.clone())));
        drop(signal_tx);
        drop(record_tx);

        let mut outcome = wait_for_decision(iteration, process.as_mut(), &mut signal_rx, cancel).await;

        // Teardown: process tree first, then the helper tasks.
        if let Err(e) = process.terminate().await {
            warn!(iteration, "Failed to terminate agent: {}", e);
        }
        tasks.cancel();

        if let Some(handle) = pipeline {
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.settings.drain_timeout, handle).await {
                Ok(Ok(report)) => outcome.report = report,
                Ok(Err(e)) => warn!(iteration, "Stream pipeline task failed: {}", e),
                Err(_) => {
                    warn!(iteration, "Stream pipeline did not drain in time, aborting it");
                    abort.abort();
                }
            }
        }
        if let Some(handle) = watchdog
            && let Ok(Some(hit)) = handle.await
        {
            info!(iteration, pid = hit.pid, kind = %hit.kind, "Watchdog killed a blocking process");
        }
        if let Some(handle) = heartbeat {
            let _ = handle.await;
        }

        // Signals raised before the writers stopped still count; the first
        // terminal one wins.
        signal_rx.close();
        while let Some(signal) = signal_rx.recv().await {
            note_signal(&mut outcome, signal, iteration);
        }

        let log = match writer.await {
            Ok(log) => log,
            Err(e) => {
                warn!(iteration, "Activity writer failed: {}", e);
                ActivityLog::open(&self.settings.state_dir)?
            }
        };
        Ok((outcome, log))
    }

    async fn checkpoint(&mut self, activity_log: &mut ActivityLog) {
        if !self.settings.checkpoint {
            return;
        }
        match self.vcs.checkpoint(&self.settings.checkpoint_message).await {
            Ok(Some(sha)) => {
                self.state.checkpoints += 1;
                let record = ActivityRecord::new(
                    ActivityKind::GitCommit,
                    self.settings.checkpoint_message.clone(),
                    Health::Healthy,
                )
                .with_detail(sha);
                if let Err(e) = activity_log.record(&record) {
                    warn!("Failed to log checkpoint: {}", e);
                }
                if self.settings.push
                    && let Err(e) = self.vcs.push().await
                {
                    warn!("Push failed: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Checkpoint failed: {}", e),
        }
    }

    async fn outstanding(&self) -> Option<usize> {
        match self.tracker.outstanding().await {
            Ok(Some(items)) => {
                debug!(tracker = self.tracker.name(), outstanding = items.len(), "Tracker queried");
                Some(items.len())
            }
            Ok(None) => None,
            Err(e) => {
                warn!(tracker = self.tracker.name(), "Tracker query failed: {}", e);
                None
            }
        }
    }

    async fn open_pull_request(&self) {
        let title = self
            .settings
            .pr_title
            .clone()
            .or_else(|| self.settings.branch.as_ref().map(|b| format!("wiggum: {b}")))
            .unwrap_or_else(|| "wiggum: completed work".to_string());
        let body = format!(
            "Completed by wiggum after {} iteration(s) with model `{}`.",
            self.state.iteration, self.settings.model
        );
        match self.vcs.open_pull_request(&title, &body).await {
            Ok(Some(url)) => info!(url = %url, "Opened pull request"),
            Ok(None) => info!("Opened pull request"),
            Err(e) => warn!("Could not open pull request: {}", e),
        }
    }

    fn summarize(&self, activity_log: &mut ActivityLog, iteration: u32, outcome: &IterationOutcome) {
        let ended_by = match (outcome.signal, outcome.interrupted) {
            (_, true) => "interrupt".to_string(),
            (Some(signal), false) => signal.to_string(),
            (None, false) => match outcome.exit_code {
                Some(code) => format!("exit {code}"),
                None => "exit".to_string(),
            },
        };
        let mut line = format!(
            "── Iteration {iteration} ended by {ended_by} · ~{} tokens",
            format_tokens(outcome.report.estimated_tokens)
        );
        if outcome.warned {
            line.push_str(" · warned");
        }
        if outcome.report.malformed > 0 {
            line.push_str(&format!(" · {} malformed line(s)", outcome.report.malformed));
        }
        info!(
            iteration,
            signal = ?outcome.signal,
            exit_code = ?outcome.exit_code,
            tokens = outcome.report.estimated_tokens,
            "Iteration finished"
        );
        log_line(activity_log, &line);
    }
}

/// Blocks until a terminal signal, natural exit, or cancellation.
async fn wait_for_decision(
    iteration: u32,
    process: &mut dyn AgentProcess,
    signal_rx: &mut SignalReceiver,
    cancel: &CancellationToken,
) -> IterationOutcome {
    let mut outcome = IterationOutcome::default();
    let mut signals_open = true;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                outcome.interrupted = true;
                break;
            }
            received = signal_rx.recv(), if signals_open => match received {
                Some(signal) => {
                    note_signal(&mut outcome, signal, iteration);
                    if outcome.signal.is_some() {
                        break;
                    }
                }
                None => signals_open = false,
            },
            exit = process.wait() => {
                match exit {
                    Ok(code) => {
                        debug!(iteration, exit_code = ?code, "Agent exited");
                        outcome.exit_code = code;
                        if code.is_some_and(|c| c != 0) {
                            warn!(iteration, exit_code = ?code, "Agent exited with a failure status");
                        }
                    }
                    Err(e) => warn!(iteration, "Waiting for agent failed: {}", e),
                }
                break;
            }
        }
    }
    outcome
}

fn note_signal(outcome: &mut IterationOutcome, signal: ControlSignal, iteration: u32) {
    if signal == ControlSignal::Warn {
        if !outcome.warned {
            warn!(iteration, "⚠ Context budget warning threshold reached");
        }
        outcome.warned = true;
    } else if outcome.signal.is_none() {
        info!(iteration, %signal, "Terminal signal received");
        outcome.signal = Some(signal);
    } else {
        debug!(iteration, %signal, "Ignoring terminal signal after the first");
    }
}

fn log_line(activity_log: &mut ActivityLog, line: &str) {
    if let Err(e) = activity_log.line(line) {
        warn!(path = %activity_log.path().display(), "Failed to write activity log: {}", e);
    }
}
