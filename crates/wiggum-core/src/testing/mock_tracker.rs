//! Mock task tracker with scripted outstanding counts.

use crate::tracker::{TaskTracker, TrackedItem, TrackerError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One scripted answer to an outstanding-work query.
#[derive(Debug, Clone)]
enum Response {
    Count(Option<usize>),
    Error(String),
}

#[derive(Debug, Default)]
struct MockTrackerState {
    responses: VecDeque<Response>,
    last: Option<Response>,
    queries: usize,
}

/// Tracker returning pre-scripted outstanding counts. When the script runs
/// out the last answer repeats; an empty script always answers `None`.
#[derive(Debug, Clone, Default)]
pub struct MockTracker {
    state: Arc<Mutex<MockTrackerState>>,
}

impl MockTracker {
    pub fn new<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = Option<usize>>,
    {
        let tracker = Self::default();
        tracker.lock().responses = counts.into_iter().map(Response::Count).collect();
        tracker
    }

    /// Queues a failing query.
    pub fn then_error(self, message: impl Into<String>) -> Self {
        self.lock().responses.push_back(Response::Error(message.into()));
        self
    }

    /// Queues an outstanding count.
    pub fn then(self, count: Option<usize>) -> Self {
        self.lock().responses.push_back(Response::Count(count));
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockTrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of times outstanding was queried.
    pub fn query_count(&self) -> usize {
        self.lock().queries
    }
}

#[async_trait]
impl TaskTracker for MockTracker {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn outstanding(&self) -> Result<Option<Vec<TrackedItem>>, TrackerError> {
        let response = {
            let mut state = self.lock();
            state.queries += 1;
            let next = state.responses.pop_front().or_else(|| state.last.clone());
            state.last.clone_from(&next);
            next
        };
        match response {
            None | Some(Response::Count(None)) => Ok(None),
            Some(Response::Count(Some(n))) => Ok(Some(
                (1..=n)
                    .map(|i| TrackedItem {
                        id: format!("mock-{i}"),
                        title: format!("Task {i}"),
                        status: "open".to_string(),
                    })
                    .collect(),
            )),
            Some(Response::Error(message)) => Err(TrackerError::Parse(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_repeat_last() {
        let tracker = MockTracker::new([Some(2)]).then_error("boom").then(Some(0));

        assert_eq!(tracker.outstanding().await.unwrap().map(|v| v.len()), Some(2));
        assert!(tracker.outstanding().await.is_err());
        assert_eq!(tracker.outstanding().await.unwrap().map(|v| v.len()), Some(0));
        assert_eq!(tracker.outstanding().await.unwrap().map(|v| v.len()), Some(0));
        assert_eq!(tracker.query_count(), 4);
    }

    #[tokio::test]
    async fn test_empty_script_is_no_tracker() {
        let tracker = MockTracker::default();
        assert!(tracker.outstanding().await.unwrap().is_none());
    }
}
