//! Tokio process executor for agent CLIs.
//!
//! Each agent runs in its own process group with stdout piped for the event
//! stream and stderr forwarded to tracing.

use crate::cursor_backend::CursorBackend;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use wiggum_core::process_tree::kill_descendants;
use wiggum_core::{AgentLauncher, AgentProcess, AgentStdout, LaunchRequest, ProcessTable, SystemProcessTable};
use wiggum_proto::{Error, Result};

/// How long terminate waits for the killed agent to be reaped.
pub const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Launches agents as child processes of this one.
pub struct AgentExecutor {
    backend: CursorBackend,
    workdir: PathBuf,
    process_table: Arc<dyn ProcessTable>,
}

impl AgentExecutor {
    pub fn new(backend: CursorBackend, workdir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            workdir: workdir.into(),
            process_table: Arc::new(SystemProcessTable),
        }
    }

    pub fn with_process_table(mut self, table: Arc<dyn ProcessTable>) -> Self {
        self.process_table = table;
        self
    }

    pub fn backend(&self) -> &CursorBackend {
        &self.backend
    }
}

#[async_trait]
impl AgentLauncher for AgentExecutor {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn AgentProcess>> {
        let (cmd, args, stdin_input) = self.backend.build_command(request);
        debug!(
            iteration = request.iteration,
            command = %self.backend.display_command(request),
            "Spawning agent"
        );

        let mut command = Command::new(&cmd);
        command
            .args(&args)
            .current_dir(&self.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin_input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        // Own process group, so one killpg reaches everything the agent
        // spawns without touching wiggum itself.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| Error::AgentSpawn(format!("{cmd}: {e}")))?;
        let pid = child.id();
        info!(iteration = request.iteration, pid = ?pid, "Agent started");

        if let Some(input) = stdin_input
            && let Some(mut stdin) = child.stdin.take()
        {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    warn!("Failed to write prompt to agent stdin: {}", e);
                }
                // Dropping stdin closes it so the agent sees EOF.
            });
        }

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "wiggum::agent", "stderr: {}", line);
                }
            });
        }

        let stdout = child
            .stdout
            .take()
            .map(|stdout| Box::new(BufReader::new(stdout)) as AgentStdout);

        Ok(Box::new(ExecutorProcess {
            child,
            pid,
            stdout,
            process_table: Arc::clone(&self.process_table),
            exit: None,
            terminated: false,
        }))
    }
}

struct ExecutorProcess {
    child: Child,
    pid: Option<u32>,
    stdout: Option<AgentStdout>,
    process_table: Arc<dyn ProcessTable>,
    /// Exit code once reaped.
    exit: Option<Option<i32>>,
    terminated: bool,
}

impl ExecutorProcess {
    #[cfg(unix)]
    fn kill_group(pid: u32) {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return;
        };
        match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => debug!(pgid = pid, "Sent SIGKILL to agent process group"),
            Err(Errno::ESRCH) => debug!(pgid = pid, "Agent process group already gone"),
            Err(e) => warn!(pgid = pid, "Failed to kill agent process group: {}", e),
        }
    }

    #[cfg(not(unix))]
    fn kill_group(_pid: u32) {}
}

#[async_trait]
impl AgentProcess for ExecutorProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn take_stdout(&mut self) -> Option<AgentStdout> {
        self.stdout.take()
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        if let Some(code) = self.exit {
            return Ok(code);
        }
        let status = self.child.wait().await?;
        self.exit = Some(status.code());
        Ok(status.code())
    }

    async fn terminate(&mut self) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;

        if let Some(pid) = self.pid {
            // Descendants first: once the agent dies its children are
            // reparented and no longer reachable through it.
            if self.exit.is_none() {
                let table = Arc::clone(&self.process_table);
                match tokio::task::spawn_blocking(move || kill_descendants(table.as_ref(), pid)).await {
                    Ok(killed) if killed > 0 => debug!(pid, killed, "Killed agent descendants"),
                    Ok(_) => {}
                    Err(e) => warn!(pid, "Descendant sweep failed: {}", e),
                }
            }
            // The group outlives its leader while background children remain.
            Self::kill_group(pid);
        }
        if let Err(e) = self.child.start_kill() {
            debug!("Agent already exited: {}", e);
        }

        match tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(exit_code = ?status.code(), "Agent reaped");
                self.exit = Some(status.code());
                Ok(())
            }
            Ok(Err(e)) => Err(Error::AgentProcess(format!("failed to reap agent: {e}"))),
            Err(_) => Err(Error::AgentProcess(format!(
                "agent did not exit within {}s of SIGKILL",
                REAP_TIMEOUT.as_secs()
            ))),
        }
    }
}
