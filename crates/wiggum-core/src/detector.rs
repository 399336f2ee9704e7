//! Repeated-failure and write-thrashing detectors.
//!
//! Both are owned by the classifier for a single iteration and dropped with
//! it. Counts never decay inside an iteration.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

/// Default number of identical failures that mark the agent as stuck.
pub const DEFAULT_FAILURE_LIMIT: u32 = 3;

/// Default number of writes to one file inside the window that count as thrashing.
pub const DEFAULT_THRASH_WRITES: usize = 5;

/// Default sliding window for write thrashing.
pub const DEFAULT_THRASH_WINDOW_SECS: u64 = 600;

/// Counts failures per exact command text.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    limit: u32,
    counts: HashMap<String, u32>,
}

impl FailureTracker {
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            counts: HashMap::new(),
        }
    }

    /// Records one failure and returns the new count for that key.
    pub fn record_failure(&mut self, key: &str) -> u32 {
        let count = self.counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// True once `count` has reached the limit.
    pub fn is_stuck(&self, count: u32) -> bool {
        count >= self.limit
    }

    pub fn count(&self, key: &str) -> u32 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

/// Per-path write timestamps, counted over a trailing window at query time.
#[derive(Debug, Clone)]
pub struct ThrashTracker {
    limit: usize,
    window: Duration,
    writes: HashMap<String, VecDeque<DateTime<Utc>>>,
}

impl ThrashTracker {
    pub fn new(limit: usize, window_secs: u64) -> Self {
        Self {
            limit: limit.max(1),
            window: i64::try_from(window_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
            writes: HashMap::new(),
        }
    }

    /// Records a write at `now` and returns how many writes to `path` fall
    /// within the trailing window, this one included.
    pub fn record_write(&mut self, path: &str, now: DateTime<Utc>) -> usize {
        let stamps = self.writes.entry(path.to_string()).or_default();
        stamps.push_back(now);
        while let Some(oldest) = stamps.front() {
            if now.signed_duration_since(*oldest) > self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }
        stamps.len()
    }

    pub fn is_thrashing(&self, window_count: usize) -> bool {
        window_count >= self.limit
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
