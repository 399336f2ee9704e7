//! Event classifier.
//!
//! Turns decoded agent events into activity records, charges the token
//! budget, feeds the failure and thrash detectors, and raises control signals.
//! One classifier serves exactly one iteration; all per-iteration state lives
//! here and is dropped with it.

use crate::activity_log::{FailureKind, FailureNote};
use crate::budget::{Thresholds, TokenBudget};
use crate::command::{self, is_git_commit};
use crate::config::WiggumConfig;
use crate::detector::{FailureTracker, ThrashTracker};
use crate::stream_event::{AgentEvent, AgentEventKind, ToolCall, ToolCompletion};
use crate::text::{single_line, tail, truncate_with_ellipsis};
use crate::tracker::{TrackerAction, parse_item_title, parse_tracker_action};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, trace};
use wiggum_proto::{ActivityKind, ActivityRecord, ControlSignal};

/// Bytes charged per line when a read reports no content size.
const BYTES_PER_READ_LINE: u64 = 100;

const SUBJECT_CHARS: usize = 100;

/// `[branch sha] subject`, as printed by `git commit`.
static COMMIT_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?m)^\[(?:[^\]]+?) ([0-9a-f]{7,40})\] (.+?)\s*$").ok()
});

/// Everything the classifier needs from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierSettings {
    pub thresholds: Thresholds,
    pub prompt_bytes: u64,
    pub bytes_per_token: u64,
    pub failure_limit: u32,
    pub thrash_writes: usize,
    pub thrash_window_secs: u64,
    pub complete_sentinel: String,
    pub gutter_sentinel: String,
    /// Tracker CLI name, for spotting claim/close commands.
    pub tracker_command: String,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self::from_config(&WiggumConfig::default())
    }
}

impl ClassifierSettings {
    pub fn from_config(config: &WiggumConfig) -> Self {
        Self {
            thresholds: config.budget.threshold_table().lookup(&config.agent.model),
            prompt_bytes: config.budget.prompt_bytes,
            bytes_per_token: config.budget.bytes_per_token,
            failure_limit: config.detector.failure_limit,
            thrash_writes: config.detector.thrash_writes,
            thrash_window_secs: config.detector.thrash_window_secs,
            complete_sentinel: config.sentinels.complete.clone(),
            gutter_sentinel: config.sentinels.gutter.clone(),
            tracker_command: config.tracker.command.clone(),
        }
    }
}

/// Output of classifying one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// Activity records, in the order they should be logged.
    pub records: Vec<ActivityRecord>,
    /// Control tokens, in the order they were raised.
    pub signals: Vec<ControlSignal>,
    /// Notes destined for the failure log.
    pub failures: Vec<FailureNote>,
}

impl Classification {
    fn record(&mut self, record: ActivityRecord) {
        self.records.push(record);
    }

    fn gutter(&mut self, note: FailureNote) {
        self.failures.push(note);
        self.signals.push(ControlSignal::Gutter);
    }

    pub fn terminal_signal(&self) -> Option<ControlSignal> {
        self.signals.iter().copied().find(|s| s.is_terminal())
    }
}

/// Finds sentinels in streamed text, including ones split across chunks.
#[derive(Debug, Clone)]
struct SentinelScanner {
    complete: String,
    gutter: String,
    carry: String,
}

impl SentinelScanner {
    fn new(complete: String, gutter: String) -> Self {
        Self {
            complete,
            gutter,
            carry: String::new(),
        }
    }

    fn scan(&mut self, chunk: &str) -> Option<ControlSignal> {
        let mut window = std::mem::take(&mut self.carry);
        window.push_str(chunk);

        let position = |needle: &str| {
            if needle.is_empty() {
                None
            } else {
                window.find(needle)
            }
        };
        let found = match (position(&self.complete), position(&self.gutter)) {
            (Some(c), Some(g)) if g < c => Some(ControlSignal::Gutter),
            (Some(_), _) => Some(ControlSignal::Complete),
            (None, Some(_)) => Some(ControlSignal::Gutter),
            (None, None) => None,
        };

        if found.is_none() {
            let keep = self.complete.len().max(self.gutter.len()).saturating_sub(1);
            self.carry = tail(&window, keep).to_string();
        }
        found
    }
}

/// Per-iteration classifier.
#[derive(Debug, Clone)]
pub struct EventClassifier {
    thresholds: Thresholds,
    tracker_command: String,
    budget: TokenBudget,
    failures: FailureTracker,
    thrash: ThrashTracker,
    sentinels: SentinelScanner,
    warned: bool,
    terminal: Option<ControlSignal>,
    session_id: Option<String>,
}

impl EventClassifier {
    pub fn new(settings: &ClassifierSettings) -> Self {
        Self {
            thresholds: settings.thresholds,
            tracker_command: settings.tracker_command.clone(),
            budget: TokenBudget::new(settings.prompt_bytes, settings.bytes_per_token),
            failures: FailureTracker::new(settings.failure_limit),
            thrash: ThrashTracker::new(settings.thrash_writes, settings.thrash_window_secs),
            sentinels: SentinelScanner::new(
                settings.complete_sentinel.clone(),
                settings.gutter_sentinel.clone(),
            ),
            warned: false,
            terminal: None,
            session_id: None,
        }
    }

    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn estimated_tokens(&self) -> u64 {
        self.budget.estimate_tokens()
    }

    /// Session id reported by the agent's init event, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The terminal signal already raised this iteration.
    pub fn terminal(&self) -> Option<ControlSignal> {
        self.terminal
    }

    pub fn classify(&mut self, event: &AgentEvent) -> Classification {
        self.classify_at(event, Utc::now())
    }

    /// Classifies `event` as if observed at `now`.
    ///
    /// Once a terminal signal has been raised, further events are ignored.
    pub fn classify_at(&mut self, event: &AgentEvent, now: DateTime<Utc>) -> Classification {
        let mut out = Classification::default();
        if self.terminal.is_some() {
            return out;
        }

        match event.kind() {
            AgentEventKind::SessionStart { session_id, model } => {
                let subject = model.clone().unwrap_or_default();
                let mut record = self.new_record(ActivityKind::SessionStart, subject, now);
                if let Some(id) = &session_id {
                    record = record.with_detail(format!("session {id}"));
                }
                self.session_id = session_id.or(self.session_id.take());
                out.record(record);
            }
            AgentEventKind::SessionEnd {
                duration_ms,
                is_error,
            } => {
                let mut record = self.new_record(ActivityKind::SessionEnd, "", now);
                let detail = match (duration_ms, is_error) {
                    (_, true) => Some("error".to_string()),
                    (Some(ms), false) => Some(format!("{:.1}s", ms as f64 / 1000.0)),
                    (None, false) => None,
                };
                if let Some(detail) = detail {
                    record = record.with_detail(detail);
                }
                out.record(record);
            }
            AgentEventKind::AssistantText(text) => self.on_assistant_text(&text, now, &mut out),
            AgentEventKind::ToolStarted { call_id, tool } => {
                trace!(?call_id, tool = %tool, "Tool started");
            }
            AgentEventKind::ToolCompleted(done) => {
                self.on_tool_completed(done, now, &mut out);
                self.evaluate_thresholds(&mut out);
            }
            AgentEventKind::Unknown => {
                trace!(event_type = ?event.event_type(), "Ignoring event");
            }
        }

        self.terminal = out.terminal_signal();
        out
    }

    fn new_record(&self, kind: ActivityKind, subject: impl Into<String>, now: DateTime<Utc>) -> ActivityRecord {
        ActivityRecord::new(kind, subject, self.budget.health(self.thresholds)).at(now)
    }

    fn on_assistant_text(&mut self, text: &str, now: DateTime<Utc>, out: &mut Classification) {
        let bytes = text.len() as u64;
        self.budget.add_assistant(bytes);

        let summary = single_line(text);
        if !summary.is_empty() {
            out.record(
                self.new_record(
                    ActivityKind::AssistantText,
                    truncate_with_ellipsis(&summary, SUBJECT_CHARS),
                    now,
                )
                .with_bytes(bytes),
            );
        }

        match self.sentinels.scan(text) {
            Some(ControlSignal::Complete) => {
                debug!("Completion sentinel detected");
                out.signals.push(ControlSignal::Complete);
            }
            Some(signal) => {
                debug!("Gutter sentinel detected");
                out.failures.push(FailureNote::new(
                    FailureKind::AgentGutter,
                    "agent",
                    truncate_with_ellipsis(&summary, 200),
                ));
                out.signals.push(signal);
            }
            None => {}
        }
    }

    fn on_tool_completed(&mut self, done: ToolCompletion, now: DateTime<Utc>, out: &mut Classification) {
        match done.call {
            ToolCall::Shell {
                command,
                exit_code,
                stdout,
                stderr,
            } => self.on_shell(&command, exit_code, &stdout, &stderr, now, out),
            ToolCall::Read {
                path,
                content_bytes,
                lines,
            } => {
                if !done.success {
                    self.on_tool_failure(ActivityKind::Read, &path, done.error.as_deref(), now, out);
                    return;
                }
                let bytes = content_bytes
                    .or_else(|| lines.map(|l| l.saturating_mul(BYTES_PER_READ_LINE)))
                    .unwrap_or(0);
                self.budget.add_read(bytes);
                let mut record = self.new_record(ActivityKind::Read, path, now).with_bytes(bytes);
                if let Some(lines) = lines {
                    record = record.with_detail(format!("{lines} lines"));
                }
                out.record(record);
            }
            ToolCall::Write { path, bytes, lines } => {
                if !done.success {
                    self.on_tool_failure(ActivityKind::Write, &path, done.error.as_deref(), now, out);
                    return;
                }
                let bytes = bytes.unwrap_or(0);
                self.budget.add_write(bytes);
                let mut record = self.new_record(ActivityKind::Write, path.clone(), now).with_bytes(bytes);
                if let Some(lines) = lines {
                    record = record.with_detail(format!("{lines} lines"));
                }
                out.record(record);
                self.track_write(&path, now, out);
            }
            ToolCall::Edit {
                path,
                old_bytes,
                new_bytes,
                lines_added,
                lines_removed,
            } => {
                if !done.success {
                    self.on_tool_failure(ActivityKind::Edit, &path, done.error.as_deref(), now, out);
                    return;
                }
                let bytes = old_bytes.saturating_add(new_bytes);
                self.budget.add_write(bytes);
                let mut record = self.new_record(ActivityKind::Edit, path.clone(), now).with_bytes(bytes);
                if lines_added.is_some() || lines_removed.is_some() {
                    record = record.with_detail(format!(
                        "+{} -{}",
                        lines_added.unwrap_or(0),
                        lines_removed.unwrap_or(0)
                    ));
                }
                out.record(record);
                self.track_write(&path, now, out);
            }
            ToolCall::Delete { path } => {
                if !done.success {
                    self.on_tool_failure(ActivityKind::Delete, &path, done.error.as_deref(), now, out);
                    return;
                }
                out.record(self.new_record(ActivityKind::Delete, path, now));
            }
            ToolCall::Other { name } => {
                trace!(tool = %name, success = done.success, "Untracked tool completed");
            }
        }
    }

    fn on_shell(
        &mut self,
        command_text: &str,
        exit_code: i64,
        stdout: &str,
        stderr: &str,
        now: DateTime<Utc>,
        out: &mut Classification,
    ) {
        let bytes = (stdout.len() + stderr.len()) as u64;
        self.budget.add_shell(bytes);

        let display = truncate_with_ellipsis(&single_line(command_text), SUBJECT_CHARS);
        out.record(
            self.new_record(ActivityKind::Shell, display.clone(), now)
                .with_bytes(bytes)
                .with_detail(format!("exit {exit_code}")),
        );

        if exit_code != 0 {
            let detail = match single_line(tail(stderr, 400)) {
                s if s.is_empty() => format!("exit {exit_code}"),
                s => format!("exit {exit_code}: {s}"),
            };
            out.failures
                .push(FailureNote::new(FailureKind::CommandFailed, display.clone(), detail).at(now));
            let count = self.failures.record_failure(command_text);
            if self.failures.is_stuck(count) {
                out.gutter(
                    FailureNote::new(
                        FailureKind::RepeatedFailure,
                        display,
                        format!("failed {count} times"),
                    )
                    .at(now),
                );
            }
            return;
        }

        match parse_tracker_action(command_text, &self.tracker_command) {
            Some(TrackerAction::Claim(id)) => {
                let subject = task_subject(&id, stdout);
                out.record(self.new_record(ActivityKind::TaskStart, subject, now));
            }
            Some(TrackerAction::Close(id)) => {
                let subject = task_subject(&id, stdout);
                out.record(self.new_record(ActivityKind::TaskFinish, subject, now));
            }
            None => {}
        }

        if let Some(subject) = commit_subject(command_text, stdout) {
            out.record(self.new_record(ActivityKind::GitCommit, subject, now));
        }
    }

    fn on_tool_failure(
        &mut self,
        kind: ActivityKind,
        path: &str,
        error: Option<&str>,
        now: DateTime<Utc>,
        out: &mut Classification,
    ) {
        let error = error.unwrap_or("failed");
        out.record(
            self.new_record(kind, path, now)
                .with_detail(truncate_with_ellipsis(&single_line(error), 60)),
        );
        let key = format!("{kind} {path}");
        out.failures
            .push(FailureNote::new(FailureKind::ToolFailed, key.clone(), error).at(now));
        let count = self.failures.record_failure(&key);
        if self.failures.is_stuck(count) {
            out.gutter(
                FailureNote::new(FailureKind::RepeatedFailure, key, format!("failed {count} times"))
                    .at(now),
            );
        }
    }

    fn track_write(&mut self, path: &str, now: DateTime<Utc>, out: &mut Classification) {
        let count = self.thrash.record_write(path, now);
        if self.thrash.is_thrashing(count) {
            out.gutter(
                FailureNote::new(
                    FailureKind::Thrashing,
                    path,
                    format!("{count} writes inside the thrash window"),
                )
                .at(now),
            );
        }
    }

    fn evaluate_thresholds(&mut self, out: &mut Classification) {
        let tokens = self.budget.estimate_tokens();
        if tokens >= self.thresholds.rotate {
            debug!(tokens, rotate = self.thresholds.rotate, "Rotate threshold reached");
            out.signals.push(ControlSignal::Rotate);
        } else if tokens >= self.thresholds.warn && !self.warned {
            debug!(tokens, warn = self.thresholds.warn, "Warn threshold reached");
            self.warned = true;
            out.signals.push(ControlSignal::Warn);
        }
    }
}

fn task_subject(id: &str, stdout: &str) -> String {
    match parse_item_title(stdout, id) {
        Some(title) => format!("{id}: {title}"),
        None => id.to_string(),
    }
}

/// Subject of a commit made by a successful shell command: the bracketed
/// commit line in its output, else the `-m` argument of a `git commit`.
fn commit_subject(command_text: &str, stdout: &str) -> Option<String> {
    if let Some(re) = COMMIT_LINE.as_ref()
        && let Some(caps) = re.captures(stdout)
        && let Some(subject) = caps.get(2)
    {
        return Some(subject.as_str().to_string());
    }

    command::split_commands(command_text)
        .into_iter()
        .filter(|words| is_git_commit(words))
        .find_map(|words| message_argument(&words))
}

fn message_argument(words: &[String]) -> Option<String> {
    let mut iter = words.iter();
    while let Some(word) = iter.next() {
        if let Some(message) = word.strip_prefix("--message=") {
            return Some(first_line(message));
        }
        let short_cluster = word.starts_with('-') && !word.starts_with("--");
        if word == "--message" || (short_cluster && word.ends_with('m')) {
            return iter.next().map(|m| first_line(m));
        }
        if short_cluster
            && let Some(idx) = word.find('m')
            && idx + 1 < word.len()
        {
            // `-m"subject"` arrives as `-msubject`
            return Some(first_line(&word[idx + 1..]));
        }
    }
    None
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().trim().to_string()
}
