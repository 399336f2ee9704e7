//! Activity records: the human-readable side of the event stream.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of agent action an activity record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    Read,
    Write,
    Edit,
    Delete,
    Shell,
    AssistantText,
    SessionStart,
    SessionEnd,
    TaskStart,
    TaskFinish,
    GitCommit,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::Read => "READ",
            ActivityKind::Write => "WRITE",
            ActivityKind::Edit => "EDIT",
            ActivityKind::Delete => "DELETE",
            ActivityKind::Shell => "SHELL",
            ActivityKind::AssistantText => "ASSISTANT",
            ActivityKind::SessionStart => "SESSION START",
            ActivityKind::SessionEnd => "SESSION END",
            ActivityKind::TaskStart => "TASK START",
            ActivityKind::TaskFinish => "TASK FINISH",
            ActivityKind::GitCommit => "COMMIT",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context health bucket, derived from token usage as a percentage of the
/// rotate threshold. Purely cosmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// Below 60%.
    Healthy,
    /// 60% up to 80%.
    Warning,
    /// 80% and above.
    Critical,
}

impl Health {
    pub fn from_percent(percent: u64) -> Self {
        match percent {
            0..60 => Health::Healthy,
            60..80 => Health::Warning,
            _ => Health::Critical,
        }
    }

    pub fn indicator(self) -> &'static str {
        match self {
            Health::Healthy => "🟢",
            Health::Warning => "🟡",
            Health::Critical => "🔴",
        }
    }
}

/// One classified observation of agent activity.
///
/// Records are immutable once created and are only ever appended to the
/// activity log, in the order their source events arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    /// Path, command text, commit subject, or tracked item.
    pub subject: String,
    /// Bytes attributed to this action in the token budget.
    pub bytes: u64,
    pub health: Health,
    /// Short display annotation such as line counts or an exit code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ActivityRecord {
    pub fn new(kind: ActivityKind, subject: impl Into<String>, health: Health) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            subject: subject.into(),
            bytes: 0,
            health,
            detail: None,
        }
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = bytes;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

impl fmt::Display for ActivityRecord {
    /// Formats as `[HH:MM:SS] 🟢 KIND subject (detail)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.timestamp.with_timezone(&Local).format("%H:%M:%S"),
            self.health.indicator(),
            self.kind
        )?;
        if !self.subject.is_empty() {
            write!(f, " {}", self.subject)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}
