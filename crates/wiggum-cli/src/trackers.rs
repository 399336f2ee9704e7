//! Tracker selection from `tracker.kind`.

use async_trait::async_trait;
use std::path::Path;
use wiggum_core::tracker::{BeadsTracker, ChecklistTracker, NoTracker};
use wiggum_core::{TaskTracker, TrackedItem, TrackerError, TrackerKind, WiggumConfig};

/// The tracker named by the config.
pub enum ConfiguredTracker {
    None(NoTracker),
    Beads(BeadsTracker),
    Checklist(ChecklistTracker),
}

impl ConfiguredTracker {
    /// Relative task files resolve against `root`.
    pub fn from_config(config: &WiggumConfig, root: &Path) -> Self {
        let tracker = &config.tracker;
        match tracker.kind {
            TrackerKind::None => Self::None(NoTracker),
            TrackerKind::Beads => Self::Beads(BeadsTracker::new(&tracker.command, tracker.label.clone(), root)),
            TrackerKind::Checklist => Self::Checklist(ChecklistTracker::new(root.join(&tracker.task_file))),
        }
    }

    fn inner(&self) -> &dyn TaskTracker {
        match self {
            Self::None(t) => t,
            Self::Beads(t) => t,
            Self::Checklist(t) => t,
        }
    }
}

#[async_trait]
impl TaskTracker for ConfiguredTracker {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    async fn outstanding(&self) -> Result<Option<Vec<TrackedItem>>, TrackerError> {
        self.inner().outstanding().await
    }
}
