//! Configuration loaded from `wiggum.yml`.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! working configuration. CLI flags are applied on top by the binary.

use crate::budget::{DEFAULT_BYTES_PER_TOKEN, DEFAULT_PROMPT_BYTES, ThresholdTable, ThresholdTier};
use crate::detector::{DEFAULT_FAILURE_LIMIT, DEFAULT_THRASH_WINDOW_SECS, DEFAULT_THRASH_WRITES};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("loop.max_iterations must be at least 1")]
    ZeroIterations,

    #[error("budget.bytes_per_token must be at least 1")]
    ZeroBytesPerToken,

    #[error("threshold tier '{name}': warn ({warn}) must be below rotate ({rotate})")]
    InvertedThresholds { name: String, warn: u64, rotate: u64 },

    #[error("sentinels.{0} must not be empty")]
    EmptySentinel(&'static str),

    #[error("sentinels.complete and sentinels.gutter must differ")]
    IdenticalSentinels,

    #[error("loop.prompt and loop.prompt_file are both unset")]
    MissingPrompt,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WiggumConfig {
    pub agent: AgentConfig,
    #[serde(rename = "loop")]
    pub loop_config: LoopConfig,
    pub budget: BudgetConfig,
    pub detector: DetectorConfig,
    pub watchdog: WatchdogConfig,
    pub tracker: TrackerConfig,
    pub vcs: VcsConfig,
    pub sentinels: SentinelConfig,
}

/// How the prompt reaches the agent CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    /// Final positional argument.
    #[default]
    Arg,
    /// Written to stdin, which is then closed.
    Stdin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent executable.
    pub command: String,
    /// Model identifier passed to the agent and used for threshold lookup.
    pub model: String,
    /// Extra arguments inserted before the prompt.
    pub extra_args: Vec<String>,
    pub prompt_mode: PromptMode,
    /// Resume the previous session on non-rotating iterations.
    pub resume: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "cursor-agent".to_string(),
            model: "opus-4.5-thinking".to_string(),
            extra_args: Vec::new(),
            prompt_mode: PromptMode::Arg,
            resume: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub max_iterations: u32,
    /// Inline task prompt. Takes precedence over `prompt_file`.
    pub prompt: Option<String>,
    pub prompt_file: Option<PathBuf>,
    /// Directory for logs and guardrails.
    pub state_dir: PathBuf,
    /// Open a pull request once the tracker reports no outstanding work.
    pub open_pr: bool,
    pub pr_title: Option<String>,
    /// Work branch created or checked out before the first iteration.
    pub branch: Option<String>,
    /// Mirror activity records to stderr.
    pub echo_activity: bool,
    /// Liveness heartbeat interval. 0 disables it.
    pub heartbeat_secs: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            prompt: None,
            prompt_file: Some(PathBuf::from("PROMPT.md")),
            state_dir: PathBuf::from(".wiggum"),
            open_pr: false,
            pr_title: None,
            branch: None,
            echo_activity: true,
            heartbeat_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub bytes_per_token: u64,
    /// Bytes charged for the prompt at the start of every iteration.
    pub prompt_bytes: u64,
    /// Extra tiers consulted before the built-in table.
    pub tiers: Vec<ThresholdTier>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            bytes_per_token: DEFAULT_BYTES_PER_TOKEN,
            prompt_bytes: DEFAULT_PROMPT_BYTES,
            tiers: Vec::new(),
        }
    }
}

impl BudgetConfig {
    pub fn threshold_table(&self) -> ThresholdTable {
        ThresholdTable::with_overrides(&self.tiers)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub failure_limit: u32,
    pub thrash_writes: usize,
    pub thrash_window_secs: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            failure_limit: DEFAULT_FAILURE_LIMIT,
            thrash_writes: DEFAULT_THRASH_WRITES,
            thrash_window_secs: DEFAULT_THRASH_WINDOW_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerKind {
    /// Trust the agent's COMPLETE sentinel.
    #[default]
    None,
    /// The `bd` issue tracker.
    Beads,
    /// Unchecked items in a markdown file.
    Checklist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub kind: TrackerKind,
    /// Tracker CLI, also used to recognize claim/close commands in agent output.
    pub command: String,
    pub label: Option<String>,
    pub task_file: PathBuf,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            kind: TrackerKind::None,
            command: "bd".to_string(),
            label: None,
            task_file: PathBuf::from("TASKS.md"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VcsConfig {
    /// Commit uncommitted work at iteration boundaries.
    pub checkpoint: bool,
    pub checkpoint_message: String,
    /// Push after each checkpoint.
    pub push: bool,
    pub remote: String,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            checkpoint: true,
            checkpoint_message: "wiggum: checkpoint".to_string(),
            push: false,
            remote: "origin".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub complete: String,
    pub gutter: String,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            complete: "<wiggum>COMPLETE</wiggum>".to_string(),
            gutter: "<wiggum>GUTTER</wiggum>".to_string(),
        }
    }
}

impl WiggumConfig {
    /// Reads and parses a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_yaml(&content)
    }

    /// Like [`WiggumConfig::from_file`], but a missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            warn!(path = %path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Checks invariants. Returns soft warnings when the config is usable.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        let mut warnings = Vec::new();

        if self.loop_config.max_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        if self.budget.bytes_per_token == 0 {
            return Err(ConfigError::ZeroBytesPerToken);
        }
        for tier in &self.budget.tiers {
            if tier.warn >= tier.rotate {
                return Err(ConfigError::InvertedThresholds {
                    name: tier.name.clone(),
                    warn: tier.warn,
                    rotate: tier.rotate,
                });
            }
            if tier.patterns.iter().all(String::is_empty) {
                warnings.push(format!("threshold tier '{}' has no patterns and never matches", tier.name));
            }
        }
        let fallback = ThresholdTable::builtin().fallback().thresholds();
        for tier in &self.budget.tiers {
            if tier.rotate < fallback.rotate {
                warnings.push(format!(
                    "threshold tier '{}' rotates at {} tokens, below the {} used for unmatched models",
                    tier.name, tier.rotate, fallback.rotate
                ));
            }
        }
        if self.sentinels.complete.is_empty() {
            return Err(ConfigError::EmptySentinel("complete"));
        }
        if self.sentinels.gutter.is_empty() {
            return Err(ConfigError::EmptySentinel("gutter"));
        }
        if self.sentinels.complete == self.sentinels.gutter {
            return Err(ConfigError::IdenticalSentinels);
        }
        if self.loop_config.prompt.is_none() && self.loop_config.prompt_file.is_none() {
            return Err(ConfigError::MissingPrompt);
        }

        if self.tracker.kind == TrackerKind::Beads && self.tracker.label.is_none() {
            warnings.push("tracker.label is unset; every open bd issue counts as outstanding".to_string());
        }
        if self.tracker.kind == TrackerKind::None {
            warnings.push("no task tracker configured; the agent's COMPLETE sentinel is trusted".to_string());
        }
        if self.loop_config.open_pr && !self.vcs.checkpoint {
            warnings.push("loop.open_pr is set but vcs.checkpoint is off; uncommitted work will not be in the PR".to_string());
        }
        if self.watchdog.enabled && self.watchdog.interval_ms < 250 {
            warnings.push(format!(
                "watchdog.interval_ms = {} scans the process table very often",
                self.watchdog.interval_ms
            ));
        }
        if self.detector.failure_limit == 0 || self.detector.thrash_writes == 0 {
            warnings.push("detector limits of 0 are treated as 1".to_string());
        }

        Ok(warnings)
    }

    /// Reads the base task prompt from `loop.prompt` or `loop.prompt_file`.
    pub fn base_prompt(&self, root: &Path) -> Result<String, ConfigError> {
        if let Some(prompt) = &self.loop_config.prompt {
            return Ok(prompt.clone());
        }
        let Some(file) = &self.loop_config.prompt_file else {
            return Err(ConfigError::MissingPrompt);
        };
        let path = root.join(file);
        std::fs::read_to_string(&path).map_err(|source| ConfigError::Io { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = WiggumConfig::default();
        let warnings = config.validate().unwrap();
        assert_eq!(config.agent.command, "cursor-agent");
        assert_eq!(config.loop_config.max_iterations, 20);
        assert_eq!(config.budget.bytes_per_token, 4);
        assert_eq!(config.detector.failure_limit, 3);
        assert_eq!(config.detector.thrash_writes, 5);
        assert_eq!(config.detector.thrash_window_secs, 600);
        assert!(warnings.iter().any(|w| w.contains("COMPLETE sentinel is trusted")));
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(WiggumConfig::parse_yaml("").unwrap(), WiggumConfig::default());
        assert_eq!(WiggumConfig::parse_yaml("  \n").unwrap(), WiggumConfig::default());
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let yaml = r#"
agent:
  model: gpt-5-codex
  prompt_mode: stdin
loop:
  max_iterations: 5
  prompt: "Build the parser"
tracker:
  kind: beads
  label: parser
budget:
  tiers:
    - name: tiny
      patterns: ["tiny"]
      warn: 10
      rotate: 20
"#;
        let config = WiggumConfig::parse_yaml(yaml).unwrap();
        assert_eq!(config.agent.model, "gpt-5-codex");
        assert_eq!(config.agent.prompt_mode, PromptMode::Stdin);
        assert_eq!(config.agent.command, "cursor-agent");
        assert_eq!(config.loop_config.max_iterations, 5);
        assert_eq!(config.loop_config.state_dir, PathBuf::from(".wiggum"));
        assert_eq!(config.tracker.kind, TrackerKind::Beads);
        assert_eq!(config.budget.threshold_table().lookup("tiny-1").rotate, 20);
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(warnings[0].contains("tier 'tiny' rotates at 20 tokens"));
    }

    #[test]
    fn test_tier_tighter_than_fallback_warns() {
        let mut config = WiggumConfig::default();
        config.budget.tiers.push(ThresholdTier::new("local", &["qwen"], 24_000, 28_000));
        config.budget.tiers.push(ThresholdTier::new("big", &["big"], 300_000, 400_000));

        let warnings = config.validate().unwrap();

        assert!(warnings.iter().any(|w| w.contains("'local' rotates at 28000 tokens, below the 80000")));
        assert!(!warnings.iter().any(|w| w.contains("'big'")));
        assert_eq!(config.budget.threshold_table().lookup("unknown-model").rotate, 80_000);
    }

    #[test]
    fn test_invalid_yaml_is_parse_error() {
        assert!(matches!(
            WiggumConfig::parse_yaml("loop: [unclosed"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validate_rejects_hard_errors() {
        let mut config = WiggumConfig::default();
        config.loop_config.max_iterations = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroIterations)));

        let mut config = WiggumConfig::default();
        config.budget.bytes_per_token = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroBytesPerToken)));

        let mut config = WiggumConfig::default();
        config.budget.tiers.push(ThresholdTier::new("bad", &["x"], 20, 20));
        assert!(matches!(config.validate(), Err(ConfigError::InvertedThresholds { .. })));

        let mut config = WiggumConfig::default();
        config.sentinels.gutter = config.sentinels.complete.clone();
        assert!(matches!(config.validate(), Err(ConfigError::IdenticalSentinels)));

        let mut config = WiggumConfig::default();
        config.loop_config.prompt_file = None;
        assert!(matches!(config.validate(), Err(ConfigError::MissingPrompt)));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = WiggumConfig::load(temp.path().join("wiggum.yml")).unwrap();
        assert_eq!(config, WiggumConfig::default());
    }

    #[test]
    fn test_from_file_missing_is_io_error() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            WiggumConfig::from_file(temp.path().join("nope.yml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_base_prompt_prefers_inline() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("PROMPT.md"), "from file").unwrap();

        let mut config = WiggumConfig::default();
        assert_eq!(config.base_prompt(temp.path()).unwrap(), "from file");

        config.loop_config.prompt = Some("inline".to_string());
        assert_eq!(config.base_prompt(temp.path()).unwrap(), "inline");
    }
}
