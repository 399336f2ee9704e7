//! # wiggum-core
//!
//! Core supervision functionality for Wiggum.
//!
//! This crate provides:
//! - The iteration loop that starts, watches, and replaces agent subprocesses
//! - Stream classification of agent events into activity records
//! - The token budget model and per-model threshold table
//! - Repeated-failure and write-thrashing detectors
//! - The blocking-process watchdog
//! - Task tracker and version control seams
//! - Configuration loading and validation

mod activity_log;
mod agent;
pub mod budget;
mod classifier;
pub mod command;
mod config;
pub mod detector;
mod heartbeat;
mod iteration_loop;
mod pipeline;
pub mod process_tree;
mod prompt;
mod signal_channel;
pub mod stream_event;
pub mod testing;
mod text;
pub mod tracker;
pub mod utils;
pub mod vcs;
pub mod watchdog;

pub use activity_log::{
    ACTIVITY_LOG_FILE, ActivityLog, FAILURE_LOG_FILE, FailureKind, FailureLog, FailureNote, ignore_run_logs,
    spawn_activity_writer,
};
pub use agent::{AgentLauncher, AgentProcess, AgentStdout, LaunchRequest};
pub use budget::{ThresholdTable, ThresholdTier, Thresholds, TokenBudget, thresholds};
pub use classifier::{Classification, ClassifierSettings, EventClassifier};
pub use config::{
    AgentConfig, BudgetConfig, ConfigError, DetectorConfig, LoopConfig, PromptMode,
    SentinelConfig, TrackerConfig, TrackerKind, VcsConfig, WatchdogConfig, WiggumConfig,
};
pub use heartbeat::run_heartbeat;
pub use iteration_loop::{IterationLoop, LoopDecision, LoopPhase, LoopSettings, LoopState, TerminationReason, decide};
pub use pipeline::{PipelineReport, StreamPipeline};
pub use process_tree::{ProcessInfo, ProcessTable, SystemProcessTable};
pub use prompt::PromptBuilder;
pub use signal_channel::{SignalReceiver, SignalSender, signal_channel};
pub use stream_event::{AgentEvent, AgentEventKind, ToolCall, ToolCompletion};
pub use text::{floor_char_boundary, truncate_with_ellipsis};
pub use tracker::{TaskTracker, TrackedItem, TrackerError};
pub use vcs::{VcsError, VersionControl};
pub use watchdog::{BlockingHit, BlockingKind, Watchdog};
