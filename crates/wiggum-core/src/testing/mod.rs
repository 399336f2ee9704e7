//! Testing utilities for deterministic loop tests.
//!
//! Each double shares its state behind an `Arc<Mutex<_>>`, so a test keeps a
//! clone to inspect after the loop has taken ownership of the original.

pub mod mock_agent;
pub mod mock_process_table;
pub mod mock_tracker;
pub mod mock_vcs;

pub use mock_agent::{MockAgent, MockRun};
pub use mock_process_table::FixedProcessTable;
pub use mock_tracker::MockTracker;
pub use mock_vcs::MockVcs;

/// A stream-json line for a completed read of `bytes` bytes.
pub fn read_event(path: &str, bytes: u64) -> String {
    serde_json::json!({
        "type": "tool_call",
        "subtype": "completed",
        "tool_call": {
            "readToolCall": {
                "args": { "path": path },
                "result": { "success": { "contentSize": bytes } }
            }
        }
    })
    .to_string()
}

/// A stream-json line for a completed shell command.
pub fn shell_event(command: &str, exit_code: i64, stdout: &str) -> String {
    let outcome = if exit_code == 0 { "success" } else { "failure" };
    let mut result = serde_json::Map::new();
    result.insert(
        outcome.to_string(),
        serde_json::json!({ "exitCode": exit_code, "stdout": stdout, "stderr": "" }),
    );
    serde_json::json!({
        "type": "tool_call",
        "subtype": "completed",
        "tool_call": {
            "shellToolCall": {
                "args": { "command": command },
                "result": result
            }
        }
    })
    .to_string()
}

/// A stream-json line carrying assistant text.
pub fn assistant_event(text: &str) -> String {
    serde_json::json!({
        "type": "assistant",
        "message": { "content": [{ "type": "text", "text": text }] }
    })
    .to_string()
}

/// A stream-json session start line.
pub fn init_event(session_id: &str, model: &str) -> String {
    serde_json::json!({
        "type": "system",
        "subtype": "init",
        "session_id": session_id,
        "model": model
    })
    .to_string()
}
