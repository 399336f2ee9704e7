//! Plain-text logs a human tails while the loop runs.
//!
//! - `activity.log`: one line per activity record plus iteration banners
//! - `errors.log`: failure notes from the classifier and the watchdog
//!
//! Both are append-only and flushed per line.

use chrono::{DateTime, Local, Utc};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use wiggum_proto::ActivityRecord;

pub const ACTIVITY_LOG_FILE: &str = "activity.log";
pub const FAILURE_LOG_FILE: &str = "errors.log";

/// Run logs that must never reach a checkpoint commit.
const IGNORED_STATE_FILES: &[&str] = &[ACTIVITY_LOG_FILE, FAILURE_LOG_FILE, "wiggum.log"];

/// Writes `<state_dir>/.gitignore` listing the run logs, unless one exists.
///
/// Other files in the state directory, such as `guardrails.md`, stay
/// committable.
pub fn ignore_run_logs(state_dir: &Path) -> io::Result<()> {
    let path = state_dir.join(".gitignore");
    if path.exists() {
        return Ok(());
    }
    fs::create_dir_all(state_dir)?;
    let mut body = String::from("# Written by wiggum\n");
    for name in IGNORED_STATE_FILES {
        body.push_str(name);
        body.push('\n');
    }
    fs::write(path, body)
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Appender for the activity log.
pub struct ActivityLog {
    path: PathBuf,
    file: BufWriter<File>,
}

impl ActivityLog {
    /// Opens `<state_dir>/activity.log` for appending, creating it if needed.
    pub fn open(state_dir: &Path) -> io::Result<Self> {
        let path = state_dir.join(ACTIVITY_LOG_FILE);
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn banner(&mut self, iteration: u32) -> io::Result<()> {
        self.line(&format!(
            "\n═══ Iteration {iteration} ═══ {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ))
    }

    pub fn record(&mut self, record: &ActivityRecord) -> io::Result<()> {
        self.line(&record.to_string())
    }

    /// Appends a free-form line such as a signal or checkpoint notice.
    pub fn line(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.file, "{text}")?;
        self.file.flush()
    }
}

/// Classification of a failure note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A shell command exited non-zero.
    CommandFailed,
    /// A non-shell tool call reported failure.
    ToolFailed,
    /// The same failure hit the limit.
    RepeatedFailure,
    /// One file was rewritten too often inside the window.
    Thrashing,
    /// The watchdog killed a process waiting on interactive input.
    BlockingProcess,
    /// The agent declared itself stuck.
    AgentGutter,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::CommandFailed => "COMMAND_FAILED",
            FailureKind::ToolFailed => "TOOL_FAILED",
            FailureKind::RepeatedFailure => "REPEATED_FAILURE",
            FailureKind::Thrashing => "THRASHING",
            FailureKind::BlockingProcess => "BLOCKING_PROCESS",
            FailureKind::AgentGutter => "AGENT_GUTTER",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the failure log.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureNote {
    pub timestamp: DateTime<Utc>,
    pub kind: FailureKind,
    pub subject: String,
    pub detail: String,
}

impl FailureNote {
    pub fn new(kind: FailureKind, subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            subject: subject.into(),
            detail: detail.into(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

impl fmt::Display for FailureNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            self.kind,
            self.subject
        )?;
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

/// Appender for the failure log.
///
/// Cheap to clone. Every append opens the file in append mode and writes one
/// whole line, so the pipeline and the watchdog can share it without locking.
#[derive(Debug, Clone)]
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    /// Creates `<state_dir>/errors.log` if it does not exist.
    pub fn open(state_dir: &Path) -> io::Result<Self> {
        let path = state_dir.join(FAILURE_LOG_FILE);
        open_append(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, note: &FailureNote) -> io::Result<()> {
        let mut file = open_append(&self.path)?;
        file.write_all(format!("{note}\n").as_bytes())?;
        file.flush()
    }

    /// Appends and downgrades any I/O error to a warning.
    pub fn append_or_warn(&self, note: &FailureNote) {
        if let Err(e) = self.append(note) {
            warn!(path = %self.path.display(), "Failed to write failure note: {}", e);
        }
    }
}

/// Drains activity records into the log until every sender is dropped, then
/// hands the log back.
///
/// With `echo` set, each line is also printed to stderr.
pub fn spawn_activity_writer(
    mut log: ActivityLog,
    mut records: mpsc::UnboundedReceiver<ActivityRecord>,
    echo: bool,
) -> JoinHandle<ActivityLog> {
    tokio::spawn(async move {
        while let Some(record) = records.recv().await {
            if echo {
                eprintln!("{record}");
            }
            if let Err(e) = log.record(&record) {
                warn!(path = %log.path().display(), "Failed to write activity record: {}", e);
            }
        }
        log
    })
}
