//! Mock version control that records every call.

use crate::vcs::{VcsError, VersionControl};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MockVcsState {
    dirty: bool,
    failing: bool,
    checkpoints: Vec<String>,
    pushes: usize,
    branches: Vec<String>,
    pull_requests: Vec<(String, String)>,
}

/// Records checkpoints, pushes, branch switches and pull requests.
///
/// While dirty, every checkpoint produces a commit; otherwise the tree is
/// reported clean.
#[derive(Debug, Clone, Default)]
pub struct MockVcs {
    state: Arc<Mutex<MockVcsState>>,
}

impl MockVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// A working tree that always has changes to commit.
    pub fn dirty() -> Self {
        let vcs = Self::default();
        vcs.lock().dirty = true;
        vcs
    }

    /// Every operation fails.
    pub fn failing() -> Self {
        let vcs = Self::default();
        vcs.lock().failing = true;
        vcs
    }

    fn lock(&self) -> MutexGuard<'_, MockVcsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(state: &MockVcsState, what: &str) -> Result<(), VcsError> {
        if state.failing {
            Err(VcsError::Failed {
                program: "git".to_string(),
                args: what.to_string(),
                stderr: "mock failure".to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Messages of the commits made so far.
    pub fn checkpoints(&self) -> Vec<String> {
        self.lock().checkpoints.clone()
    }

    pub fn push_count(&self) -> usize {
        self.lock().pushes
    }

    pub fn branches(&self) -> Vec<String> {
        self.lock().branches.clone()
    }

    /// `(title, body)` of every pull request opened.
    pub fn pull_requests(&self) -> Vec<(String, String)> {
        self.lock().pull_requests.clone()
    }
}

#[async_trait]
impl VersionControl for MockVcs {
    async fn checkpoint(&self, message: &str) -> Result<Option<String>, VcsError> {
        let mut state = self.lock();
        Self::check(&state, "commit")?;
        if !state.dirty {
            return Ok(None);
        }
        state.checkpoints.push(message.to_string());
        Ok(Some(format!("{:07x}", state.checkpoints.len())))
    }

    async fn push(&self) -> Result<(), VcsError> {
        let mut state = self.lock();
        Self::check(&state, "push")?;
        state.pushes += 1;
        Ok(())
    }

    async fn ensure_branch(&self, branch: &str) -> Result<(), VcsError> {
        let mut state = self.lock();
        Self::check(&state, "checkout")?;
        state.branches.push(branch.to_string());
        Ok(())
    }

    async fn open_pull_request(&self, title: &str, body: &str) -> Result<Option<String>, VcsError> {
        let mut state = self.lock();
        Self::check(&state, "pr create")?;
        state.pushes += 1;
        state.pull_requests.push((title.to_string(), body.to_string()));
        Ok(Some(format!("https://example.com/pr/{}", state.pull_requests.len())))
    }
}
