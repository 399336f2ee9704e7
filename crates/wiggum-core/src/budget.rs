//! Token budget model.
//!
//! The agent's context window is not observable directly, so Wiggum estimates
//! it from the bytes that flow through the event stream: file contents read,
//! text written or edited, shell output, and assistant text, plus a fixed
//! charge for the prompt itself. Dividing by a bytes-per-token ratio (4 by
//! default) yields a rough token count.
//!
//! The estimate is a backpressure heuristic for deciding when to rotate. It is
//! not a billing-accurate count and should never be presented as one.

use serde::{Deserialize, Serialize};
use wiggum_proto::Health;

/// Default bytes-per-token ratio.
pub const DEFAULT_BYTES_PER_TOKEN: u64 = 4;

/// Default charge for the prompt and system context at iteration start.
pub const DEFAULT_PROMPT_BYTES: u64 = 12_000;

/// Warn and rotate token counts for one model tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warn: u64,
    pub rotate: u64,
}

/// One explicit row in the threshold table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdTier {
    /// Display name for the tier.
    #[serde(default)]
    pub name: String,
    /// Case-insensitive substrings matched against the model identifier.
    pub patterns: Vec<String>,
    pub warn: u64,
    pub rotate: u64,
}

impl ThresholdTier {
    pub fn new(name: &str, patterns: &[&str], warn: u64, rotate: u64) -> Self {
        Self {
            name: name.to_string(),
            patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
            warn,
            rotate,
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            warn: self.warn,
            rotate: self.rotate,
        }
    }

    fn matches(&self, model_lower: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| !p.is_empty() && model_lower.contains(&p.to_lowercase()))
    }
}

/// Ordered model-tier table. The first matching tier wins; unmatched models
/// get the fallback, which is the most conservative built-in tier.
///
/// Configured tiers may go below the fallback, in which case an unknown
/// model gets a looser budget than a configured one.
#[derive(Debug, Clone)]
pub struct ThresholdTable {
    tiers: Vec<ThresholdTier>,
    fallback: ThresholdTier,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ThresholdTable {
    /// The built-in tiers.
    pub fn builtin() -> Self {
        Self {
            tiers: vec![
                ThresholdTier::new("gemini", &["gemini"], 700_000, 800_000),
                ThresholdTier::new("gpt-5", &["gpt-5", "codex"], 210_000, 240_000),
                ThresholdTier::new("claude", &["opus", "sonnet", "claude"], 140_000, 160_000),
            ],
            fallback: ThresholdTier::new("default", &[], 70_000, 80_000),
        }
    }

    /// Built-in tiers with `overrides` consulted first.
    pub fn with_overrides(overrides: &[ThresholdTier]) -> Self {
        let mut table = Self::builtin();
        let mut tiers = overrides.to_vec();
        tiers.append(&mut table.tiers);
        table.tiers = tiers;
        table
    }

    /// Resolves the tier for a model identifier. Never fails.
    pub fn resolve(&self, model: &str) -> &ThresholdTier {
        let model_lower = model.to_lowercase();
        self.tiers
            .iter()
            .find(|tier| tier.matches(&model_lower))
            .unwrap_or(&self.fallback)
    }

    pub fn lookup(&self, model: &str) -> Thresholds {
        self.resolve(model).thresholds()
    }

    pub fn fallback(&self) -> &ThresholdTier {
        &self.fallback
    }

    pub fn tiers(&self) -> impl Iterator<Item = &ThresholdTier> {
        self.tiers.iter().chain(std::iter::once(&self.fallback))
    }
}

/// Thresholds for a model from the built-in table.
pub fn thresholds(model: &str) -> Thresholds {
    ThresholdTable::builtin().lookup(model)
}

/// Per-iteration byte counters.
///
/// Counters only grow within an iteration, so the estimate is monotonically
/// non-decreasing. A new iteration gets a new budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBudget {
    bytes_per_token: u64,
    prompt_bytes: u64,
    read_bytes: u64,
    write_bytes: u64,
    shell_bytes: u64,
    assistant_bytes: u64,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT_BYTES, DEFAULT_BYTES_PER_TOKEN)
    }
}

impl TokenBudget {
    /// Creates a budget with the prompt already charged. A zero ratio is
    /// treated as 1.
    pub fn new(prompt_bytes: u64, bytes_per_token: u64) -> Self {
        Self {
            bytes_per_token: bytes_per_token.max(1),
            prompt_bytes,
            read_bytes: 0,
            write_bytes: 0,
            shell_bytes: 0,
            assistant_bytes: 0,
        }
    }

    pub fn add_read(&mut self, bytes: u64) {
        self.read_bytes = self.read_bytes.saturating_add(bytes);
    }

    pub fn add_write(&mut self, bytes: u64) {
        self.write_bytes = self.write_bytes.saturating_add(bytes);
    }

    pub fn add_shell(&mut self, bytes: u64) {
        self.shell_bytes = self.shell_bytes.saturating_add(bytes);
    }

    pub fn add_assistant(&mut self, bytes: u64) {
        self.assistant_bytes = self.assistant_bytes.saturating_add(bytes);
    }

    pub fn total_bytes(&self) -> u64 {
        self.prompt_bytes
            .saturating_add(self.read_bytes)
            .saturating_add(self.write_bytes)
            .saturating_add(self.shell_bytes)
            .saturating_add(self.assistant_bytes)
    }

    pub fn estimate_tokens(&self) -> u64 {
        self.total_bytes() / self.bytes_per_token
    }

    /// Estimated tokens as a percentage of `rotate`.
    pub fn percent_of(&self, rotate: u64) -> u64 {
        if rotate == 0 {
            return 100;
        }
        self.estimate_tokens().saturating_mul(100) / rotate
    }

    pub fn health(&self, thresholds: Thresholds) -> Health {
        Health::from_percent(self.percent_of(thresholds.rotate))
    }

    /// Returns a fresh budget with the same ratio and prompt charge.
    pub fn reset(&self) -> Self {
        Self::new(self.prompt_bytes, self.bytes_per_token)
    }
}
