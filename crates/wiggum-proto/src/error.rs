//! Error types for Wiggum.

use thiserror::Error;

/// Errors that can occur while supervising an agent.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Event parse error: {0}")]
    EventParse(String),

    #[error("Agent spawn error: {0}")]
    AgentSpawn(String),

    #[error("Agent process error: {0}")]
    AgentProcess(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
