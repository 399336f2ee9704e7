//! Version control seam.
//!
//! Wiggum only checkpoints, pushes, switches branches, and opens pull
//! requests. Diff content is never inspected.

use crate::command::{CommandOutput, capture};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from version control subprocesses.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program} {args}` failed: {stderr}")]
    Failed {
        program: String,
        args: String,
        stderr: String,
    },
}

#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Commits every working-tree change with `message`. Returns the short
    /// commit hash, or `None` when the tree was clean.
    async fn checkpoint(&self, message: &str) -> Result<Option<String>, VcsError>;

    /// Pushes the current branch.
    async fn push(&self) -> Result<(), VcsError>;

    /// Checks out `branch`, creating it from HEAD if it does not exist.
    async fn ensure_branch(&self, branch: &str) -> Result<(), VcsError>;

    /// Pushes and opens a pull request. Returns its URL when the tool prints one.
    async fn open_pull_request(&self, title: &str, body: &str) -> Result<Option<String>, VcsError>;
}

/// A git working tree, driven through the `git` and `gh` CLIs.
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
    remote: String,
}

impl GitRepo {
    pub fn new(root: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            remote: remote.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, VcsError> {
        capture(program, args, &self.root)
            .await
            .map_err(|source| VcsError::Spawn {
                program: program.to_string(),
                source,
            })
    }

    async fn run_ok(&self, program: &str, args: &[&str]) -> Result<CommandOutput, VcsError> {
        let output = self.run(program, args).await?;
        if output.success {
            Ok(output)
        } else {
            Err(VcsError::Failed {
                program: program.to_string(),
                args: args.join(" "),
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    async fn current_branch(&self) -> Result<String, VcsError> {
        let output = self.run_ok("git", &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(output.stdout.trim().to_string())
    }
}

#[async_trait]
impl VersionControl for GitRepo {
    async fn checkpoint(&self, message: &str) -> Result<Option<String>, VcsError> {
        let status = self.run_ok("git", &["status", "--porcelain"]).await?;
        if status.stdout.trim().is_empty() {
            debug!("Working tree clean, no checkpoint needed");
            return Ok(None);
        }

        self.run_ok("git", &["add", "-A"]).await?;
        self.run_ok("git", &["commit", "--no-verify", "-m", message]).await?;
        let head = self.run_ok("git", &["rev-parse", "--short", "HEAD"]).await?;
        let sha = head.stdout.trim().to_string();
        info!(sha = %sha, "Checkpointed working tree");
        Ok(Some(sha))
    }

    async fn push(&self) -> Result<(), VcsError> {
        let branch = self.current_branch().await?;
        self.run_ok("git", &["push", "-u", &self.remote, &branch]).await?;
        Ok(())
    }

    async fn ensure_branch(&self, branch: &str) -> Result<(), VcsError> {
        if self.current_branch().await? == branch {
            return Ok(());
        }
        let exists = self
            .run("git", &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .await?
            .success;
        if exists {
            self.run_ok("git", &["checkout", branch]).await?;
        } else {
            self.run_ok("git", &["checkout", "-b", branch]).await?;
        }
        info!(branch, created = !exists, "Switched to work branch");
        Ok(())
    }

    async fn open_pull_request(&self, title: &str, body: &str) -> Result<Option<String>, VcsError> {
        self.push().await?;
        let output = self
            .run_ok("gh", &["pr", "create", "--title", title, "--body", body])
            .await?;
        let url = output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with("https://"))
            .map(str::to_string);
        Ok(url)
    }
}
