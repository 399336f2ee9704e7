//! Mock agent launcher that replays pre-scripted event streams.

use crate::agent::{AgentLauncher, AgentProcess, AgentStdout, LaunchRequest};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use wiggum_proto::Result;

/// One scripted agent run.
#[derive(Debug, Clone, Default)]
pub struct MockRun {
    /// Stdout lines, emitted in order.
    pub lines: Vec<String>,
    /// Exit code reported on natural exit.
    pub exit_code: Option<i32>,
    /// Keep running after stdout ends until terminated.
    pub hang: bool,
}

impl MockRun {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            exit_code: Some(0),
            hang: false,
        }
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }
}

#[derive(Debug, Default)]
struct MockAgentState {
    runs: VecDeque<MockRun>,
    launches: Vec<LaunchRequest>,
    terminations: usize,
}

/// Launcher that hands out one [`MockRun`] per launch. Once the script is
/// exhausted every launch is an empty run that exits 0.
#[derive(Debug, Clone, Default)]
pub struct MockAgent {
    state: Arc<Mutex<MockAgentState>>,
    pid: Option<u32>,
}

impl MockAgent {
    pub fn new(runs: Vec<MockRun>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockAgentState {
                runs: runs.into(),
                ..MockAgentState::default()
            })),
            pid: None,
        }
    }

    /// Reports `pid` as the process id so the watchdog runs.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockAgentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of times launch was called.
    pub fn launch_count(&self) -> usize {
        self.lock().launches.len()
    }

    /// Returns every launch request, in order.
    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.lock().launches.clone()
    }

    /// Total terminate calls across all processes.
    pub fn terminations(&self) -> usize {
        self.lock().terminations
    }
}

#[async_trait]
impl AgentLauncher for MockAgent {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn AgentProcess>> {
        let run = {
            let mut state = self.lock();
            state.launches.push(request.clone());
            state.runs.pop_front().unwrap_or_else(|| MockRun::new(Vec::<String>::new()))
        };

        let mut stdout = run.lines.join("\n");
        stdout.push('\n');
        let (killed_tx, killed_rx) = watch::channel(false);

        Ok(Box::new(MockProcess {
            pid: self.pid,
            stdout: Some(Box::new(Cursor::new(stdout.into_bytes()))),
            exit_code: run.exit_code,
            hang: run.hang,
            killed_tx,
            killed_rx,
            shared: Arc::clone(&self.state),
        }))
    }
}

struct MockProcess {
    pid: Option<u32>,
    stdout: Option<AgentStdout>,
    exit_code: Option<i32>,
    hang: bool,
    killed_tx: watch::Sender<bool>,
    killed_rx: watch::Receiver<bool>,
    shared: Arc<Mutex<MockAgentState>>,
}

#[async_trait]
impl AgentProcess for MockProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn take_stdout(&mut self) -> Option<AgentStdout> {
        self.stdout.take()
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        let killed = *self.killed_rx.borrow();
        if killed {
            return Ok(None);
        }
        if !self.hang {
            return Ok(self.exit_code);
        }
        // Only terminate ends a hanging run.
        let _ = self.killed_rx.wait_for(|killed| *killed).await;
        Ok(None)
    }

    async fn terminate(&mut self) -> Result<()> {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .terminations += 1;
        self.killed_tx.send_replace(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;

    fn request(iteration: u32) -> LaunchRequest {
        LaunchRequest {
            prompt: format!("prompt {iteration}"),
            model: "test".into(),
            resume_session: None,
            iteration,
        }
    }

    #[tokio::test]
    async fn test_mock_agent_replays_script() {
        let agent = MockAgent::new(vec![MockRun::new(["a", "b"]).exit_code(3)]);
        let mut process = agent.launch(&request(1)).await.unwrap();

        let mut lines = process.take_stdout().unwrap().lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("a"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("b"));
        assert_eq!(lines.next_line().await.unwrap(), None);
        assert!(process.take_stdout().is_none());
        assert_eq!(process.wait().await.unwrap(), Some(3));

        let mut empty = agent.launch(&request(2)).await.unwrap();
        assert_eq!(empty.wait().await.unwrap(), Some(0));
        assert_eq!(agent.launch_count(), 2);
        assert_eq!(agent.launches()[1].prompt, "prompt 2");
    }

    #[tokio::test]
    async fn test_hanging_run_waits_for_terminate() {
        let agent = MockAgent::new(vec![MockRun::new(["x"]).hanging()]);
        let mut process = agent.launch(&request(1)).await.unwrap();

        let pending = tokio::time::timeout(std::time::Duration::from_millis(20), process.wait()).await;
        assert!(pending.is_err());

        process.terminate().await.unwrap();
        process.terminate().await.unwrap();
        assert_eq!(process.wait().await.unwrap(), None);
        assert_eq!(agent.terminations(), 2);
    }
}
