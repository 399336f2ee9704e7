//! Prompt builder for agent iterations.
//!
//! Every iteration starts from a fresh context, so the prompt repeats the
//! whole contract: which iteration this is, the task, how to signal
//! completion or being stuck, and any guardrails learned in earlier runs.

use std::path::Path;
use tracing::{debug, warn};

/// Lessons file inside the state directory, appended to every prompt.
pub const GUARDRAILS_FILE: &str = "guardrails.md";

/// Builds the prompt for one iteration.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    base_prompt: String,
    complete_sentinel: String,
    gutter_sentinel: String,
    guardrails: Option<String>,
}

impl PromptBuilder {
    pub fn new(
        base_prompt: impl Into<String>,
        complete_sentinel: impl Into<String>,
        gutter_sentinel: impl Into<String>,
    ) -> Self {
        Self {
            base_prompt: base_prompt.into(),
            complete_sentinel: complete_sentinel.into(),
            gutter_sentinel: gutter_sentinel.into(),
            guardrails: None,
        }
    }

    pub fn with_guardrails(mut self, guardrails: Option<String>) -> Self {
        self.guardrails = guardrails.filter(|g| !g.trim().is_empty());
        self
    }

    /// Reads `<state_dir>/guardrails.md`. Missing or unreadable files yield `None`.
    pub fn load_guardrails(state_dir: &Path) -> Option<String> {
        let path = state_dir.join(GUARDRAILS_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No guardrails file");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), "Failed to read guardrails: {}", e);
                None
            }
        }
    }

    /// Builds the prompt. `rotated` adds a note that the previous context
    /// was discarded.
    pub fn build(&self, iteration: u32, rotated: bool) -> String {
        let mut prompt = format!(
            r"# Iteration {iteration}

You are one iteration of a supervised loop. Your context is discarded when it
fills up, and a fresh agent continues from the state of the repository.

## RULES

- Work in small steps and commit after each one. Uncommitted work may be lost.
- Run non-interactive commands only (`npm init -y`, `git commit -m ...`).
- Never start a bare interpreter or an editor; they are killed on sight.
- If the same command keeps failing, stop repeating it.

## SIGNALS

- When every task is done and verified, output exactly: {complete}
- If you are stuck and cannot make progress, output exactly: {gutter}
",
            iteration = iteration,
            complete = self.complete_sentinel,
            gutter = self.gutter_sentinel,
        );

        if rotated {
            prompt.push_str(
                "\nThe previous iteration ran out of context. Check `git log` and the task \
                 tracker to see what is already done before starting.\n",
            );
        }

        if let Some(guardrails) = &self.guardrails {
            prompt.push_str("\n## GUARDRAILS\n\n");
            prompt.push_str(guardrails.trim_end());
            prompt.push('\n');
        }

        prompt.push_str("\n---\n");
        prompt.push_str(&self.base_prompt);
        prompt
    }
}
