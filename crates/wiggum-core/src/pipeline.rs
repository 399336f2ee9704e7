//! Parsing pipeline: agent stdout → classifier → {activity records, failure
//! log, signal channel}.

use crate::activity_log::FailureLog;
use crate::classifier::EventClassifier;
use crate::signal_channel::SignalSender;
use crate::stream_event::AgentEvent;
use crate::text::truncate_with_ellipsis;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wiggum_proto::{ActivityRecord, ControlSignal};

/// What one pipeline run observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Lines decoded as events.
    pub events: u64,
    /// Lines skipped because they were not JSON objects.
    pub malformed: u64,
    /// Token estimate when the pipeline stopped.
    pub estimated_tokens: u64,
    pub session_id: Option<String>,
    /// First terminal signal raised, if any. The pipeline stops right after it.
    pub terminal: Option<ControlSignal>,
}

/// Owns the classifier for one iteration.
pub struct StreamPipeline {
    classifier: EventClassifier,
    signals: SignalSender,
    records: mpsc::UnboundedSender<ActivityRecord>,
    failure_log: FailureLog,
}

impl StreamPipeline {
    pub fn new(
        classifier: EventClassifier,
        signals: SignalSender,
        records: mpsc::UnboundedSender<ActivityRecord>,
        failure_log: FailureLog,
    ) -> Self {
        Self {
            classifier,
            signals,
            records,
            failure_log,
        }
    }

    /// Reads NDJSON lines until EOF, an I/O error, or a terminal signal.
    ///
    /// Malformed lines are counted and skipped. Dropping the pipeline closes
    /// its signal sender and record sender.
    pub async fn run<R>(mut self, reader: R) -> PipelineReport
    where
        R: AsyncBufRead + Unpin,
    {
        let mut report = PipelineReport::default();
        let mut reader = reader;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Agent stream read failed: {}", e);
                    break;
                }
            }
            // Invalid UTF-8 is replaced, never fatal; the line then fails to parse.
            let line = String::from_utf8_lossy(&buf);
            if line.trim().is_empty() {
                continue;
            }

            let event = match AgentEvent::parse(&line) {
                Ok(event) => event,
                Err(e) => {
                    debug!(
                        "Skipping malformed stream line: {} (line: {})",
                        e,
                        truncate_with_ellipsis(&line, 100)
                    );
                    report.malformed += 1;
                    continue;
                }
            };
            report.events += 1;

            let classification = self.classifier.classify(&event);
            for record in classification.records {
                // The writer outlives the pipeline; a closed channel only means shutdown.
                let _ = self.records.send(record);
            }
            for note in &classification.failures {
                self.failure_log.append_or_warn(note);
            }
            for signal in classification.signals {
                if !self.signals.send(signal).await {
                    debug!(%signal, "Signal receiver gone");
                }
                if signal.is_terminal() {
                    report.terminal = Some(signal);
                    break;
                }
            }
            if report.terminal.is_some() {
                break;
            }
        }

        report.estimated_tokens = self.classifier.estimated_tokens();
        report.session_id = self.classifier.session_id().map(str::to_string);
        debug!(
            events = report.events,
            malformed = report.malformed,
            tokens = report.estimated_tokens,
            terminal = ?report.terminal,
            "Stream pipeline finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::Thresholds;
    use crate::classifier::ClassifierSettings;
    use crate::signal_channel::signal_channel;
    use tempfile::TempDir;

    fn settings() -> ClassifierSettings {
        ClassifierSettings {
            thresholds: Thresholds {
                warn: 1_000,
                rotate: 2_000,
            },
            prompt_bytes: 0,
            ..ClassifierSettings::default()
        }
    }

    fn read_line(path: &str, bytes: u64) -> String {
        format!(
            r#"{{"type":"tool_call","subtype":"completed","tool_call":{{"readToolCall":{{"args":{{"path":"{path}"}},"result":{{"success":{{"contentSize":{bytes}}}}}}}}}}}"#
        )
    }

    struct Harness {
        _temp: TempDir,
        failure_log: FailureLog,
    }

    impl Harness {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let failure_log = FailureLog::open(temp.path()).unwrap();
            Self {
                _temp: temp,
                failure_log,
            }
        }

        async fn run(
            &self,
            input: String,
        ) -> (PipelineReport, Vec<ActivityRecord>, Vec<ControlSignal>) {
            self.run_bytes(input.as_bytes()).await
        }

        async fn run_bytes(
            &self,
            input: &[u8],
        ) -> (PipelineReport, Vec<ActivityRecord>, Vec<ControlSignal>) {
            let (sig_tx, mut sig_rx) = signal_channel();
            let (rec_tx, mut rec_rx) = mpsc::unbounded_channel();
            let pipeline = StreamPipeline::new(
                EventClassifier::new(&settings()),
                sig_tx,
                rec_tx,
                self.failure_log.clone(),
            );
            let report = pipeline.run(input).await;

            let mut records = Vec::new();
            while let Some(r) = rec_rx.recv().await {
                records.push(r);
            }
            let mut signals = Vec::new();
            while let Some(s) = sig_rx.recv().await {
                signals.push(s);
            }
            (report, records, signals)
        }
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let harness = Harness::new();
        let input = format!(
            "not json\n\n{{\"truncated\":\n{}\n[1]\n",
            read_line("a.rs", 10)
        );
        let (report, records, signals) = harness.run(input).await;
        assert_eq!(report.events, 1);
        assert_eq!(report.malformed, 3);
        assert_eq!(records.len(), 1);
        assert!(signals.is_empty());
        assert!(report.terminal.is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_stop_stream() {
        let harness = Harness::new();
        let mut input = b"\xff\xfe garbage\n".to_vec();
        input.extend_from_slice(read_line("a.rs", 10).as_bytes());
        input.push(b'\n');

        let (report, records, _) = harness.run_bytes(&input).await;

        assert_eq!(report.malformed, 1);
        assert_eq!(report.events, 1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject, "a.rs");
    }

    #[tokio::test]
    async fn test_invalid_utf8_inside_text_still_sees_sentinel() {
        let harness = Harness::new();
        let mut input = br#"{"type":"assistant","message":{"content":[{"type":"text","text":"caf"#.to_vec();
        input.push(0xe9);
        input.extend_from_slice(br#" <wiggum>COMPLETE</wiggum>"}]}}"#);
        input.push(b'\n');
        input.extend_from_slice(read_line("late.rs", 10).as_bytes());

        let (report, _, signals) = harness.run_bytes(&input).await;

        assert_eq!(report.malformed, 0);
        assert_eq!(signals, vec![ControlSignal::Complete]);
        assert_eq!(report.terminal, Some(ControlSignal::Complete));
    }

    #[tokio::test]
    async fn test_stops_after_rotate() {
        let harness = Harness::new();
        let input = [
            read_line("a.rs", 4_000),
            read_line("b.rs", 4_000),
            read_line("c.rs", 4_000),
            read_line("d.rs", 4_000),
        ]
        .join("\n");
        let (report, records, signals) = harness.run(input).await;

        assert_eq!(signals, vec![ControlSignal::Warn, ControlSignal::Rotate]);
        assert_eq!(report.terminal, Some(ControlSignal::Rotate));
        assert_eq!(report.events, 2);
        let subjects: Vec<_> = records.iter().map(|r| r.subject.as_str()).collect();
        assert_eq!(subjects, vec!["a.rs", "b.rs"]);
    }

    #[tokio::test]
    async fn test_records_keep_source_order() {
        let harness = Harness::new();
        let input = (0..20)
            .map(|i| read_line(&format!("f{i}.rs"), 1))
            .collect::<Vec<_>>()
            .join("\n");
        let (_, records, _) = harness.run(input).await;
        let expected: Vec<_> = (0..20).map(|i| format!("f{i}.rs")).collect();
        let actual: Vec<_> = records.into_iter().map(|r| r.subject).collect();
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_failures_reach_failure_log() {
        let harness = Harness::new();
        let failing = r#"{"type":"tool_call","subtype":"completed","tool_call":{"shellToolCall":{"args":{"command":"make"},"result":{"failure":{"exitCode":2,"stdout":"","stderr":"no rule"}}}}}"#;
        let input = [failing, failing, failing, failing].join("\n");
        let (report, _, signals) = harness.run(input).await;

        assert_eq!(signals, vec![ControlSignal::Gutter]);
        assert_eq!(report.terminal, Some(ControlSignal::Gutter));
        assert_eq!(report.events, 3);

        let content = std::fs::read_to_string(harness.failure_log.path()).unwrap();
        assert_eq!(content.matches("COMMAND_FAILED make").count(), 3);
        assert_eq!(content.matches("REPEATED_FAILURE make").count(), 1);
    }

    #[tokio::test]
    async fn test_reports_session_id() {
        let harness = Harness::new();
        let input =
            r#"{"type":"system","subtype":"init","session_id":"sess-9","model":"x"}"#.to_string();
        let (report, _, _) = harness.run(input).await;
        assert_eq!(report.session_id.as_deref(), Some("sess-9"));
    }
}
