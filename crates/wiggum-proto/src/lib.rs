//! # wiggum-proto
//!
//! Shared types and error definitions for the Wiggum agent supervisor.
//!
//! This crate provides the vocabulary every other Wiggum crate speaks:
//! - The four control tokens carried on the decision channel
//! - Activity records appended to the human-readable activity log
//! - The health bucket derived from the running token estimate
//! - Common error types

mod activity;
mod error;
mod signal;

pub use activity::{ActivityKind, ActivityRecord, Health};
pub use error::{Error, Result};
pub use signal::{ControlSignal, UnknownSignal};
