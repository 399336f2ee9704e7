//! Loop state and the pure decision functions behind each iteration boundary.

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use wiggum_proto::ControlSignal;

/// Where the loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Starting,
    Running,
    Rotating,
    Guttered,
    Completed,
    Exhausted,
}

impl LoopPhase {
    /// True for phases that end the run.
    pub fn is_final(self) -> bool {
        matches!(self, LoopPhase::Guttered | LoopPhase::Completed | LoopPhase::Exhausted)
    }
}

/// Reason the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The tracker reports no outstanding work, or COMPLETE was trusted.
    Completed,
    /// GUTTER was raised; the agent is stuck.
    Guttered,
    /// The iteration limit was reached.
    Exhausted,
    /// Ctrl+C.
    Interrupted,
}

impl TerminationReason {
    /// Process exit code:
    /// - 0: completed
    /// - 1: guttered
    /// - 2: iteration limit reached
    /// - 130: user interrupt (SIGINT = 128 + 2)
    pub fn exit_code(self) -> i32 {
        match self {
            TerminationReason::Completed => 0,
            TerminationReason::Guttered => 1,
            TerminationReason::Exhausted => 2,
            TerminationReason::Interrupted => 130,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::Completed => "COMPLETE",
            TerminationReason::Guttered => "GUTTER",
            TerminationReason::Exhausted => "EXHAUSTED",
            TerminationReason::Interrupted => "INTERRUPTED",
        }
    }

    /// Final status shown to the user on every termination path.
    pub fn status_message(self, iterations: u32, elapsed: Duration, failure_log: &Path) -> String {
        let headline = match self {
            TerminationReason::Completed => "✅ COMPLETE: no outstanding work",
            TerminationReason::Guttered => "🚨 GUTTER: the agent is stuck and needs a human",
            TerminationReason::Exhausted => "⏹ EXHAUSTED: iteration limit reached",
            TerminationReason::Interrupted => "🛑 INTERRUPTED",
        };
        format!(
            "{headline}\n   iterations: {iterations} · elapsed: {}\n   failures:   {}\n   history:    git log --oneline",
            crate::utils::format_elapsed(elapsed),
            failure_log.display(),
        )
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do after an iteration has been torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    /// The run is complete.
    Finish,
    /// Start another iteration. `rotate` starts it cold.
    Continue { rotate: bool },
    /// The run is stuck.
    Abort,
}

/// Decides the next step from the iteration's terminal signal and the
/// tracker's outstanding count (`None` when there is no tracker or it failed).
///
/// Zero outstanding items finishes the run regardless of the signal.
pub fn decide(signal: Option<ControlSignal>, outstanding: Option<usize>) -> LoopDecision {
    if outstanding == Some(0) {
        return LoopDecision::Finish;
    }
    match signal {
        Some(ControlSignal::Complete) if outstanding.is_none() => LoopDecision::Finish,
        Some(ControlSignal::Complete) => LoopDecision::Continue { rotate: false },
        Some(ControlSignal::Rotate) => LoopDecision::Continue { rotate: true },
        Some(ControlSignal::Gutter) => LoopDecision::Abort,
        Some(ControlSignal::Warn) | None => LoopDecision::Continue { rotate: false },
    }
}

/// State carried across iterations. Only the counter and the session id
/// survive an iteration; everything else is rebuilt.
#[derive(Debug, Clone)]
pub struct LoopState {
    /// Current iteration number (1-indexed, 0 before the first).
    pub iteration: u32,
    pub phase: LoopPhase,
    /// Session to resume on the next iteration.
    pub session_id: Option<String>,
    /// Terminal signal of the last finished iteration.
    pub last_signal: Option<ControlSignal>,
    /// The next iteration starts cold because the last one rotated.
    pub cold: bool,
    /// Checkpoint commits made so far.
    pub checkpoints: u32,
    pub started_at: Instant,
}

impl Default for LoopState {
    fn default() -> Self {
        Self {
            iteration: 0,
            phase: LoopPhase::Starting,
            session_id: None,
            last_signal: None,
            cold: false,
            checkpoints: 0,
            started_at: Instant::now(),
        }
    }
}

impl LoopState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Moves to the next iteration.
    pub fn begin_iteration(&mut self) -> u32 {
        self.iteration += 1;
        self.phase = LoopPhase::Starting;
        self.iteration
    }

    /// Applies a decision. Returns the termination reason when the run ends.
    pub fn advance(&mut self, decision: LoopDecision, max_iterations: u32) -> Option<TerminationReason> {
        match decision {
            LoopDecision::Finish => {
                self.phase = LoopPhase::Completed;
                Some(TerminationReason::Completed)
            }
            LoopDecision::Abort => {
                self.phase = LoopPhase::Guttered;
                Some(TerminationReason::Guttered)
            }
            LoopDecision::Continue { rotate } => {
                if rotate {
                    self.phase = LoopPhase::Rotating;
                    self.session_id = None;
                }
                self.cold = rotate;
                if self.iteration >= max_iterations {
                    self.phase = LoopPhase::Exhausted;
                    Some(TerminationReason::Exhausted)
                } else {
                    None
                }
            }
        }
    }
}
