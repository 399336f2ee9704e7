//! `wiggum status`: outstanding work and the tail of the activity log.

use crate::trackers::ConfiguredTracker;
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;
use wiggum_core::{ACTIVITY_LOG_FILE, TaskTracker, TrackedItem, WiggumConfig};

pub async fn print_status(config: &WiggumConfig, root: &Path, lines: usize) -> Result<()> {
    let tracker = ConfiguredTracker::from_config(config, root);
    let outstanding = tracker.outstanding().await.map_err(|e| e.to_string());

    let log_path = root.join(&config.loop_config.state_dir).join(ACTIVITY_LOG_FILE);
    let activity = match std::fs::read_to_string(&log_path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", log_path.display())),
    };

    print!(
        "{}",
        render_status(tracker.name(), &outstanding, activity.as_deref(), lines)
    );
    Ok(())
}

fn render_status(
    tracker: &str,
    outstanding: &Result<Option<Vec<TrackedItem>>, String>,
    activity: Option<&str>,
    lines: usize,
) -> String {
    let mut out = String::new();
    match outstanding {
        Ok(Some(items)) if items.is_empty() => {
            let _ = writeln!(out, "Tracker ({tracker}): no outstanding items");
        }
        Ok(Some(items)) => {
            let _ = writeln!(out, "Tracker ({tracker}): {} outstanding item(s)", items.len());
            for item in items {
                let _ = writeln!(out, "  {:<10} {:<12} {}", item.id, item.status, item.title);
            }
        }
        Ok(None) => {
            let _ = writeln!(out, "Tracker ({tracker}): not tracking work items");
        }
        Err(e) => {
            let _ = writeln!(out, "Tracker ({tracker}): unavailable: {e}");
        }
    }

    out.push('\n');
    match activity {
        Some(content) => {
            let all: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
            let start = all.len().saturating_sub(lines);
            let _ = writeln!(out, "Recent activity:");
            for line in &all[start..] {
                let _ = writeln!(out, "  {line}");
            }
        }
        None => {
            let _ = writeln!(out, "No activity yet");
        }
    }
    out
}
