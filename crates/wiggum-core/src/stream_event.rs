//! Partial decoding of the agent's NDJSON event stream.
//!
//! Events are kept as raw JSON and read through accessors that return
//! `Option`, so schema drift in the agent CLI degrades to "field missing"
//! rather than a decode error. Only a line that is not JSON at all fails.
//!
//! Shapes understood (cursor-agent `--output-format stream-json`):
//! - `{"type":"system","subtype":"init","session_id":..,"model":..}`
//! - `{"type":"assistant","message":{"content":[{"type":"text","text":..}]}}`
//! - `{"type":"tool_call","subtype":"started"|"completed","call_id":..,"tool_call":{..}}`
//! - `{"type":"result","duration_ms":..,"is_error":..}`

use serde_json::Value;
use wiggum_proto::Error;

/// One decoded line of agent output.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentEvent(Value);

/// What an event means to the classifier.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEventKind {
    SessionStart {
        session_id: Option<String>,
        model: Option<String>,
    },
    SessionEnd {
        duration_ms: Option<u64>,
        is_error: bool,
    },
    AssistantText(String),
    ToolStarted {
        call_id: Option<String>,
        tool: String,
    },
    ToolCompleted(ToolCompletion),
    Unknown,
}

/// A finished tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCompletion {
    pub call_id: Option<String>,
    pub call: ToolCall,
    /// False when the result carried `failure`, `error`, or `rejected`.
    pub success: bool,
    /// Failure message, when the agent supplied one.
    pub error: Option<String>,
}

/// Tool-specific payload of a completion.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    Read {
        path: String,
        content_bytes: Option<u64>,
        lines: Option<u64>,
    },
    Write {
        path: String,
        bytes: Option<u64>,
        lines: Option<u64>,
    },
    Edit {
        path: String,
        old_bytes: u64,
        new_bytes: u64,
        lines_added: Option<u64>,
        lines_removed: Option<u64>,
    },
    Delete {
        path: String,
    },
    Shell {
        command: String,
        exit_code: i64,
        stdout: String,
        stderr: String,
    },
    Other {
        name: String,
    },
}

impl AgentEvent {
    /// Decodes one line. Fails only when the line is not a JSON object.
    pub fn parse(line: &str) -> Result<Self, Error> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| Error::EventParse(e.to_string()))?;
        if !value.is_object() {
            return Err(Error::EventParse("event is not a JSON object".to_string()));
        }
        Ok(Self(value))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    pub fn event_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn subtype(&self) -> Option<&str> {
        self.0.get("subtype").and_then(Value::as_str)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.0.get("session_id").and_then(Value::as_str)
    }

    pub fn call_id(&self) -> Option<&str> {
        self.0.get("call_id").and_then(Value::as_str)
    }

    /// Concatenated text blocks of an assistant message.
    pub fn assistant_text(&self) -> Option<String> {
        let message = self.0.get("message")?;
        if let Some(text) = message.as_str() {
            return Some(text.to_string());
        }
        let content = message.get("content")?;
        if let Some(text) = content.as_str() {
            return Some(text.to_string());
        }
        let text: String = content
            .as_array()?
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str).unwrap_or("text") == "text")
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect();
        Some(text)
    }

    /// The single `<name>ToolCall` entry under `tool_call`.
    fn tool_entry(&self) -> Option<(&str, &Value)> {
        let calls = self.0.get("tool_call")?.as_object()?;
        calls.iter().next().map(|(name, body)| (name.as_str(), body))
    }

    pub fn kind(&self) -> AgentEventKind {
        match (self.event_type(), self.subtype()) {
            (Some("system"), Some("init") | None) => AgentEventKind::SessionStart {
                session_id: self.session_id().map(str::to_string),
                model: self
                    .0
                    .get("model")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            (Some("result"), _) => AgentEventKind::SessionEnd {
                duration_ms: self.0.get("duration_ms").and_then(Value::as_u64),
                is_error: self
                    .0
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
            (Some("assistant"), _) => match self.assistant_text() {
                Some(text) => AgentEventKind::AssistantText(text),
                None => AgentEventKind::Unknown,
            },
            (Some("tool_call"), Some("started")) => match self.tool_entry() {
                Some((name, _)) => AgentEventKind::ToolStarted {
                    call_id: self.call_id().map(str::to_string),
                    tool: tool_short_name(name).to_string(),
                },
                None => AgentEventKind::Unknown,
            },
            (Some("tool_call"), Some("completed")) => match self.tool_entry() {
                Some((name, body)) => {
                    AgentEventKind::ToolCompleted(decode_completion(self.call_id(), name, body))
                }
                None => AgentEventKind::Unknown,
            },
            _ => AgentEventKind::Unknown,
        }
    }
}

fn tool_short_name(name: &str) -> &str {
    name.strip_suffix("ToolCall").unwrap_or(name)
}

fn str_at<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn u64_at(value: &Value, key: &str) -> Option<u64> {
    value.get(key).and_then(Value::as_u64)
}

fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| str_at(value, key))
}

fn first_u64(value: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| u64_at(value, key))
}

fn decode_completion(call_id: Option<&str>, name: &str, body: &Value) -> ToolCompletion {
    let null = Value::Null;
    let args = body.get("args").unwrap_or(&null);
    let result = body.get("result").unwrap_or(&null);

    // A result is `{"success": {..}}` or one of the failure shapes.
    let success_body = result.get("success");
    let failure_body = ["failure", "error", "rejected"]
        .iter()
        .find_map(|key| result.get(*key));
    let success = success_body.is_some() || (failure_body.is_none() && !result.is_null());
    let outcome = success_body.or(failure_body).unwrap_or(&null);

    let error = failure_body.map(|body| {
        body.as_str()
            .map(str::to_string)
            .or_else(|| first_str(body, &["message", "error", "reason"]).map(str::to_string))
            .unwrap_or_else(|| "tool call failed".to_string())
    });

    let path = first_str(args, &["path", "file_path", "filePath"])
        .unwrap_or_default()
        .to_string();

    let call = match tool_short_name(name) {
        "read" => ToolCall::Read {
            path,
            content_bytes: first_u64(outcome, &["contentSize", "totalChars", "fileSize"])
                .or_else(|| str_at(outcome, "content").map(|c| c.len() as u64)),
            lines: first_u64(outcome, &["totalLines", "lines"]),
        },
        "write" => ToolCall::Write {
            path,
            bytes: u64_at(outcome, "fileSize")
                .or_else(|| first_str(args, &["fileText", "contents", "content"]).map(|t| t.len() as u64)),
            lines: first_u64(outcome, &["linesCreated", "lines"]),
        },
        "edit" => {
            let replace = args.get("strReplace").unwrap_or(args);
            let old_bytes = first_str(replace, &["oldText", "old_string", "oldString"])
                .map_or(0, |t| t.len() as u64);
            let new_bytes = first_str(replace, &["newText", "new_string", "newString"])
                .map_or(0, |t| t.len() as u64);
            ToolCall::Edit {
                path,
                old_bytes,
                new_bytes,
                lines_added: u64_at(outcome, "linesAdded"),
                lines_removed: u64_at(outcome, "linesRemoved"),
            }
        }
        "delete" => ToolCall::Delete { path },
        "shell" => {
            let default_exit = if success { 0 } else { 1 };
            ToolCall::Shell {
                command: str_at(args, "command").unwrap_or_default().to_string(),
                exit_code: outcome
                    .get("exitCode")
                    .and_then(Value::as_i64)
                    .unwrap_or(default_exit),
                stdout: str_at(outcome, "stdout").unwrap_or_default().to_string(),
                stderr: str_at(outcome, "stderr").unwrap_or_default().to_string(),
            }
        }
        other => ToolCall::Other {
            name: other.to_string(),
        },
    };

    ToolCompletion {
        call_id: call_id.map(str::to_string),
        call,
        success,
        error,
    }
}
