//! # wiggum-adapters
//!
//! Agent adapters for Wiggum.
//!
//! This crate provides:
//! - [`CursorBackend`]: builds the `cursor-agent` command line for an
//!   iteration (model, session resume, prompt delivery)
//! - [`AgentExecutor`]: spawns the agent as a tokio child process in its own
//!   process group and implements the core launch traits
//!
//! Termination reaches the whole process tree: descendants found through the
//! process table, then the agent's process group, then the agent itself.

mod agent_executor;
mod cursor_backend;

pub use agent_executor::{AgentExecutor, REAP_TIMEOUT};
pub use cursor_backend::CursorBackend;
