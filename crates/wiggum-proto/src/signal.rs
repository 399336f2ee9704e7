//! Control tokens carried on the decision channel.
//!
//! Exactly four values are ever valid on that channel. Representing them as a
//! closed enum means no diagnostic text can be mistaken for a decision.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A decision token raised by the parsing pipeline or the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlSignal {
    /// Context is nearly full; the agent should wrap up. Never terminal.
    Warn,
    /// Context is full; the subprocess must be replaced by a fresh one.
    Rotate,
    /// The agent is stuck and a human needs to look.
    Gutter,
    /// The agent reports that all work is done.
    Complete,
}

impl ControlSignal {
    /// All tokens, in declaration order.
    pub const ALL: [ControlSignal; 4] = [
        ControlSignal::Warn,
        ControlSignal::Rotate,
        ControlSignal::Gutter,
        ControlSignal::Complete,
    ];

    /// Returns the literal token text.
    pub fn as_str(self) -> &'static str {
        match self {
            ControlSignal::Warn => "WARN",
            ControlSignal::Rotate => "ROTATE",
            ControlSignal::Gutter => "GUTTER",
            ControlSignal::Complete => "COMPLETE",
        }
    }

    /// Returns true if receiving this token ends the current agent subprocess.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ControlSignal::Warn)
    }
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when text is not one of the four control tokens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a control token: {0:?}")]
pub struct UnknownSignal(pub String);

impl FromStr for ControlSignal {
    type Err = UnknownSignal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "WARN" => Ok(ControlSignal::Warn),
            "ROTATE" => Ok(ControlSignal::Rotate),
            "GUTTER" => Ok(ControlSignal::Gutter),
            "COMPLETE" => Ok(ControlSignal::Complete),
            other => Err(UnknownSignal(other.to_string())),
        }
    }
}
