//! Task tracker seam.
//!
//! The tracker is the authority on whether a run is done. Three flavours are
//! supported:
//! - [`NoTracker`]: nothing to ask, the agent's COMPLETE sentinel is trusted
//! - [`BeadsTracker`]: the `bd` issue tracker CLI, filtered by label
//! - [`ChecklistTracker`]: unchecked `- [ ]` items in a markdown file
//!
//! This module also recognizes tracker claim/close commands in the agent's
//! shell activity so they can be logged as task boundaries.

use crate::command::{self, program_name};
use async_trait::async_trait;
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from querying a tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("could not parse tracker output: {0}")]
    Parse(String),

    #[error("failed to read task file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One outstanding work item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackedItem {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: String,
}

#[async_trait]
pub trait TaskTracker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Outstanding items, or `None` when this tracker cannot say.
    async fn outstanding(&self) -> Result<Option<Vec<TrackedItem>>, TrackerError>;
}

/// Tracker used when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTracker;

#[async_trait]
impl TaskTracker for NoTracker {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn outstanding(&self) -> Result<Option<Vec<TrackedItem>>, TrackerError> {
        Ok(None)
    }
}

/// Queries `bd list --label <label> --json`.
#[derive(Debug, Clone)]
pub struct BeadsTracker {
    command: String,
    label: Option<String>,
    workdir: PathBuf,
}

impl BeadsTracker {
    pub fn new(command: impl Into<String>, label: Option<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            label,
            workdir: workdir.into(),
        }
    }

    fn list_args(&self) -> Vec<&str> {
        let mut args = vec!["list"];
        if let Some(label) = &self.label {
            args.push("--label");
            args.push(label);
        }
        args.push("--json");
        args
    }
}

#[async_trait]
impl TaskTracker for BeadsTracker {
    fn name(&self) -> &'static str {
        "beads"
    }

    async fn outstanding(&self) -> Result<Option<Vec<TrackedItem>>, TrackerError> {
        let args = self.list_args();
        let rendered = format!("{} {}", self.command, args.join(" "));
        let output = command::capture(&self.command, &args, &self.workdir)
            .await
            .map_err(|source| TrackerError::Spawn {
                command: rendered.clone(),
                source,
            })?;
        if !output.success {
            return Err(TrackerError::Failed {
                command: rendered,
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        parse_beads_list(&output.stdout).map(Some)
    }
}

/// Parses `bd list --json` output, keeping items that are not closed.
pub fn parse_beads_list(stdout: &str) -> Result<Vec<TrackedItem>, TrackerError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let items: Vec<TrackedItem> =
        serde_json::from_str(trimmed).map_err(|e| TrackerError::Parse(e.to_string()))?;
    Ok(items
        .into_iter()
        .filter(|item| !item.status.eq_ignore_ascii_case("closed"))
        .collect())
}

/// Counts unchecked `- [ ]` items in a markdown task file.
#[derive(Debug, Clone)]
pub struct ChecklistTracker {
    path: PathBuf,
}

impl ChecklistTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TaskTracker for ChecklistTracker {
    fn name(&self) -> &'static str {
        "checklist"
    }

    async fn outstanding(&self) -> Result<Option<Vec<TrackedItem>>, TrackerError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| TrackerError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(Some(parse_checklist(&content)))
    }
}

/// Unchecked list items, identified by their 1-based line number.
pub fn parse_checklist(content: &str) -> Vec<TrackedItem> {
    content
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let trimmed = line.trim_start();
            let rest = trimmed
                .strip_prefix("- [ ]")
                .or_else(|| trimmed.strip_prefix("* [ ]"))?;
            Some(TrackedItem {
                id: format!("L{}", idx + 1),
                title: rest.trim().to_string(),
                status: "open".to_string(),
            })
        })
        .collect()
}

/// A tracker transition spotted in the agent's shell activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerAction {
    Claim(String),
    Close(String),
}

/// Recognizes `bd update <id> --status in_progress --json`,
/// `bd update <id> --claim --json` and `bd close <id> --json` invocations.
///
/// Only invocations with the structured-output flag count.
pub fn parse_tracker_action(command_text: &str, tracker_command: &str) -> Option<TrackerAction> {
    let wanted = program_name(tracker_command);
    command::split_commands(command_text)
        .into_iter()
        .find_map(|words| action_from_words(&words, wanted))
}

/// Tracker options that consume the following word.
pub const TRACKER_VALUE_FLAGS: &[&str] = &[
    "--status", "-s", "--reason", "-r", "--label", "-l", "--assignee", "-a", "--priority", "-p",
    "--title", "--description", "-d", "--notes", "--type", "-t", "--db", "--actor",
];

/// Positional words after the program, skipping flags and their values.
fn positional_words<'a>(rest: &'a [String]) -> Vec<&'a String> {
    let mut words = Vec::new();
    let mut i = 0;
    while i < rest.len() {
        let word = rest[i].as_str();
        if TRACKER_VALUE_FLAGS.contains(&word) {
            i += 2;
        } else {
            if !word.starts_with('-') {
                words.push(&rest[i]);
            }
            i += 1;
        }
    }
    words
}

fn action_from_words(words: &[String], tracker: &str) -> Option<TrackerAction> {
    let (program, rest) = words.split_first()?;
    if program_name(program) != tracker || !rest.iter().any(|w| w == "--json") {
        return None;
    }
    let positional = positional_words(rest);
    let verb = positional.first()?;
    let id = (*positional.get(1)?).clone();

    match verb.as_str() {
        "close" => Some(TrackerAction::Close(id)),
        "update" => {
            let claims = rest.iter().enumerate().any(|(i, w)| {
                w == "--claim"
                    || w == "--status=in_progress"
                    || ((w == "--status" || w == "-s") && rest.get(i + 1).is_some_and(|v| v == "in_progress"))
            });
            claims.then_some(TrackerAction::Claim(id))
        }
        _ => None,
    }
}

/// Extracts the title for `id` from a tracker's JSON output, which may be a
/// single object or an array of objects.
pub fn parse_item_title(stdout: &str, id: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(stdout.trim()).ok()?;
    let candidates: Vec<&serde_json::Value> = match &value {
        serde_json::Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    candidates
        .into_iter()
        .find(|item| item.get("id").and_then(|v| v.as_str()).is_none_or(|v| v == id))
        .and_then(|item| item.get("title"))
        .and_then(|title| title.as_str())
        .filter(|title| !title.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_beads_list_filters_closed() {
        let stdout = r#"[
            {"id":"wg-1","title":"Parser","status":"open"},
            {"id":"wg-2","title":"Lexer","status":"closed"},
            {"id":"wg-3","title":"Docs","status":"in_progress"}
        ]"#;
        let items = parse_beads_list(stdout).unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["wg-1", "wg-3"]);
    }

    #[test]
    fn test_parse_beads_list_empty_and_garbage() {
        assert!(parse_beads_list("").unwrap().is_empty());
        assert!(parse_beads_list("null").unwrap().is_empty());
        assert!(matches!(parse_beads_list("oops"), Err(TrackerError::Parse(_))));
    }

    #[test]
    fn test_parse_checklist() {
        let content = "# Tasks\n- [x] done\n- [ ] write parser\n  * [ ] nested item\n- [] not an item\n";
        let items = parse_checklist(content);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "L3");
        assert_eq!(items[0].title, "write parser");
        assert_eq!(items[1].title, "nested item");
    }

    #[test]
    fn test_claim_and_close_detection() {
        assert_eq!(
            parse_tracker_action("bd update wg-7 --status in_progress --json", "bd"),
            Some(TrackerAction::Claim("wg-7".to_string()))
        );
        assert_eq!(
            parse_tracker_action("bd update wg-7 --claim --json", "bd"),
            Some(TrackerAction::Claim("wg-7".to_string()))
        );
        assert_eq!(
            parse_tracker_action("cd repo && bd close wg-7 --json", "bd"),
            Some(TrackerAction::Close("wg-7".to_string()))
        );
    }

    #[test]
    fn test_flag_values_before_id_are_skipped() {
        assert_eq!(
            parse_tracker_action("bd update --status in_progress wg-7 --json", "bd"),
            Some(TrackerAction::Claim("wg-7".to_string()))
        );
        assert_eq!(
            parse_tracker_action("bd close --reason done wg-9 --json", "bd"),
            Some(TrackerAction::Close("wg-9".to_string()))
        );
        assert_eq!(
            parse_tracker_action("bd --db .beads/x.db update -s in_progress wg-3 --json", "bd"),
            Some(TrackerAction::Claim("wg-3".to_string()))
        );
        assert_eq!(
            parse_tracker_action("bd update --status=in_progress wg-4 --json", "bd"),
            Some(TrackerAction::Claim("wg-4".to_string()))
        );
    }

    #[test]
    fn test_detection_requires_json_flag_and_claiming_status() {
        assert_eq!(parse_tracker_action("bd close wg-7", "bd"), None);
        assert_eq!(
            parse_tracker_action("bd update wg-7 --status blocked --json", "bd"),
            None
        );
        assert_eq!(parse_tracker_action("bd list --json", "bd"), None);
        assert_eq!(parse_tracker_action("echo bd close wg-7 --json", "bd"), None);
    }

    #[test]
    fn test_parse_item_title() {
        assert_eq!(
            parse_item_title(r#"{"id":"wg-7","title":"Write lexer"}"#, "wg-7").as_deref(),
            Some("Write lexer")
        );
        assert_eq!(
            parse_item_title(
                r#"[{"id":"wg-1","title":"Other"},{"id":"wg-7","title":"Mine"}]"#,
                "wg-7"
            )
            .as_deref(),
            Some("Mine")
        );
        assert_eq!(parse_item_title("not json", "wg-7"), None);
    }

    #[tokio::test]
    async fn test_checklist_tracker_reads_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("TASKS.md");
        std::fs::write(&path, "- [ ] one\n- [x] two\n").unwrap();

        let tracker = ChecklistTracker::new(&path);
        let items = tracker.outstanding().await.unwrap().unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_checklist_tracker_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        let tracker = ChecklistTracker::new(temp.path().join("missing.md"));
        assert!(matches!(tracker.outstanding().await, Err(TrackerError::Io { .. })));
    }

    #[tokio::test]
    async fn test_beads_tracker_reports_missing_binary() {
        let temp = TempDir::new().unwrap();
        let tracker = BeadsTracker::new("wiggum-no-such-bd", Some("x".to_string()), temp.path());
        assert!(matches!(tracker.outstanding().await, Err(TrackerError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_beads_tracker_uses_stub_script() {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("bd");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '[{\"id\":\"a\",\"status\":\"open\"},{\"id\":\"b\",\"status\":\"closed\"}]'\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let tracker = BeadsTracker::new(script.to_string_lossy(), None, temp.path());
        // A concurrent fork in another test can briefly hold the script's
        // write handle open, so exec may see ETXTBSY.
        let mut attempts = 0;
        let items = loop {
            match tracker.outstanding().await {
                Err(TrackerError::Spawn { source, .. })
                    if source.kind() == io::ErrorKind::ExecutableFileBusy && attempts < 20 =>
                {
                    attempts += 1;
                    tokio::time::sleep(std::time::Duration::from_millis(25)).await;
                }
                other => break other.unwrap().unwrap(),
            }
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "a");
    }

    #[tokio::test]
    async fn test_no_tracker_cannot_say() {
        assert_eq!(NoTracker.outstanding().await.unwrap(), None);
    }
}
