//! Agent launch seam.
//!
//! The loop controller only needs to start an agent with a prompt, read its
//! event stream, wait for it, and tear it down. The tokio-backed executor in
//! `wiggum-adapters` and the scripted [`MockAgent`](crate::testing::MockAgent)
//! both implement these traits.

use async_trait::async_trait;
use tokio::io::AsyncBufRead;
use wiggum_proto::Result;

/// The agent's stdout, one NDJSON event per line.
pub type AgentStdout = Box<dyn AsyncBufRead + Send + Unpin>;

/// Everything needed to start one iteration's agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub prompt: String,
    pub model: String,
    /// Session to resume; `None` starts cold.
    pub resume_session: Option<String>,
    pub iteration: u32,
}

/// A running agent subprocess.
#[async_trait]
pub trait AgentProcess: Send {
    /// OS process id, if the process has one. Used as the watchdog root.
    fn pid(&self) -> Option<u32>;

    /// Hands out stdout. Returns `None` after the first call.
    fn take_stdout(&mut self) -> Option<AgentStdout>;

    /// Waits for natural exit and returns the exit code (`None` if killed
    /// by a signal).
    async fn wait(&mut self) -> Result<Option<i32>>;

    /// Kills the process and everything it spawned. Safe to call more than
    /// once and after the process has already exited.
    async fn terminate(&mut self) -> Result<()>;
}

/// Starts agent processes.
#[async_trait]
pub trait AgentLauncher: Send + Sync {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn AgentProcess>>;
}
