//! Blocking-process watchdog.
//!
//! An agent that runs `npm init` or a bare `python3` waits forever on a
//! terminal nobody is typing into. The watchdog periodically scans the agent's
//! descendants, matches each argv against [`BLOCKING_PATTERNS`], and on the
//! first hit kills that one process, writes a failure note, raises GUTTER,
//! and stops.

use crate::activity_log::{FailureKind, FailureLog, FailureNote};
use crate::command::{GIT_VALUE_FLAGS, program_name, subcommand_index};
use crate::process_tree::{ProcessTable, descendants};
use crate::signal_channel::SignalSender;
use crate::text::truncate_with_ellipsis;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wiggum_proto::ControlSignal;

/// Why a process shape blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingKind {
    InteractiveInit,
    CommitWithoutMessage,
    BareRepl,
}

impl fmt::Display for BlockingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BlockingKind::InteractiveInit => "interactive initializer",
            BlockingKind::CommitWithoutMessage => "commit without message",
            BlockingKind::BareRepl => "bare REPL",
        })
    }
}

/// How a pattern recognizes an argv.
#[derive(Debug, Clone, Copy)]
pub enum Matcher {
    /// `program subcommand` with none of the escape flags present.
    Subcommand {
        programs: &'static [&'static str],
        subcommand: &'static str,
        /// Options of the program taking a value before the subcommand.
        value_flags: &'static [&'static str],
        /// Long flags (matched exactly or as `--flag=value`).
        escape_long: &'static [&'static str],
        /// Short flags (matched standalone or inside a cluster like `-am`).
        escape_short: &'static [char],
    },
    /// An interpreter with no script, module, or inline code.
    Bare {
        /// Base names; versioned variants such as `python3.12` also match.
        programs: &'static [&'static str],
        /// Flags that supply code to run.
        code_flags: &'static [&'static str],
    },
}

/// One row of the blocking-shape table.
#[derive(Debug, Clone, Copy)]
pub struct BlockingPattern {
    pub kind: BlockingKind,
    pub matcher: Matcher,
    pub reason: &'static str,
}

/// Blocking shapes in priority order.
pub const BLOCKING_PATTERNS: &[BlockingPattern] = &[
    BlockingPattern {
        kind: BlockingKind::InteractiveInit,
        matcher: Matcher::Subcommand {
            programs: &["npm", "yarn"],
            subcommand: "init",
            value_flags: &[],
            escape_long: &["--yes"],
            escape_short: &['y'],
        },
        reason: "package initializer waiting for answers; pass -y/--yes",
    },
    BlockingPattern {
        kind: BlockingKind::InteractiveInit,
        matcher: Matcher::Subcommand {
            programs: &["poetry"],
            subcommand: "init",
            value_flags: &[],
            escape_long: &["--no-interaction"],
            escape_short: &['n'],
        },
        reason: "poetry init waiting for answers; pass -n/--no-interaction",
    },
    BlockingPattern {
        kind: BlockingKind::CommitWithoutMessage,
        matcher: Matcher::Subcommand {
            programs: &["git"],
            subcommand: "commit",
            value_flags: GIT_VALUE_FLAGS,
            escape_long: &["--message", "--file", "--reuse-message", "--no-edit", "--fixup"],
            escape_short: &['m', 'F', 'C'],
        },
        reason: "git commit opened an editor; pass -m with a message",
    },
    BlockingPattern {
        kind: BlockingKind::BareRepl,
        matcher: Matcher::Bare {
            programs: &["python", "node", "irb", "ipython", "ghci", "lua"],
            code_flags: &["-c", "-m", "-e", "--eval", "-p", "--print", "-r", "--require"],
        },
        reason: "interpreter started without a script and is waiting at a REPL prompt",
    },
];

/// Interpreters that may front a matched program, e.g. `node /usr/bin/npm init`.
const LAUNCHERS: &[&str] = &["node", "python", "python3", "sh", "bash"];

/// `npm-cli.js` → `npm`.
fn script_name(word: &str) -> &str {
    let name = program_name(word);
    let name = name.strip_suffix(".js").unwrap_or(name);
    name.strip_suffix("-cli").unwrap_or(name)
}

/// Strips a script launcher when it runs one of the table's programs.
fn effective_argv(argv: &[String]) -> &[String] {
    if argv.len() > 1 && LAUNCHERS.contains(&program_name(&argv[0])) {
        let script = script_name(&argv[1]);
        let fronted = BLOCKING_PATTERNS.iter().any(|p| match p.matcher {
            Matcher::Subcommand { programs, .. } => programs.contains(&script),
            Matcher::Bare { .. } => false,
        });
        if fronted {
            return &argv[1..];
        }
    }
    argv
}

/// `python3.12` → `python`, `lua5.4` → `lua`.
fn unversioned(name: &str) -> &str {
    name.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.')
}

fn has_escape(args: &[String], escape_long: &[&str], escape_short: &[char]) -> bool {
    args.iter().any(|arg| {
        if let Some(long) = arg.strip_prefix("--") {
            let name = long.split('=').next().unwrap_or(long);
            escape_long.iter().any(|e| e.trim_start_matches('-') == name)
        } else if let Some(cluster) = arg.strip_prefix('-') {
            cluster.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
                && cluster.chars().any(|c| escape_short.contains(&c))
        } else {
            false
        }
    })
}

impl Matcher {
    pub fn matches(&self, argv: &[String]) -> bool {
        let Some(first) = argv.first() else {
            return false;
        };
        match *self {
            Matcher::Subcommand {
                programs,
                subcommand,
                value_flags,
                escape_long,
                escape_short,
            } => {
                programs.contains(&script_name(first))
                    && subcommand_index(argv, value_flags)
                        .is_some_and(|i| argv[i] == subcommand && !has_escape(&argv[i + 1..], escape_long, escape_short))
            }
            Matcher::Bare {
                programs,
                code_flags,
            } => {
                // A lone `-` is a script read from stdin, not a flag.
                programs.contains(&unversioned(program_name(first)))
                    && argv[1..]
                        .iter()
                        .all(|arg| arg.starts_with('-') && arg != "-" && !code_flags.contains(&arg.as_str()))
            }
        }
    }
}

/// First pattern, in priority order, matching `argv`.
pub fn match_blocking(argv: &[String]) -> Option<&'static BlockingPattern> {
    let argv = effective_argv(argv);
    BLOCKING_PATTERNS.iter().find(|p| p.matcher.matches(argv))
}

/// A blocking process the watchdog acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockingHit {
    pub pid: u32,
    pub argv: Vec<String>,
    pub kind: BlockingKind,
    pub reason: &'static str,
}

/// Periodic scanner for one agent subprocess.
pub struct Watchdog {
    table: Arc<dyn ProcessTable>,
    root: u32,
    interval: Duration,
    signals: SignalSender,
    failure_log: FailureLog,
}

impl Watchdog {
    pub fn new(
        table: Arc<dyn ProcessTable>,
        root: u32,
        interval: Duration,
        signals: SignalSender,
        failure_log: FailureLog,
    ) -> Self {
        Self {
            table,
            root,
            interval,
            signals,
            failure_log,
        }
    }

    /// Scans descendants once and returns the first blocking one.
    pub fn scan(table: &dyn ProcessTable, root: u32) -> Option<BlockingHit> {
        descendants(&table.snapshot(), root)
            .into_iter()
            .find_map(|process| {
                match_blocking(&process.argv).map(|pattern| BlockingHit {
                    pid: process.pid,
                    argv: process.argv,
                    kind: pattern.kind,
                    reason: pattern.reason,
                })
            })
    }

    /// Scans every interval until a hit or cancellation. On a hit, kills that
    /// process, logs it, raises GUTTER, and returns it.
    pub async fn run(self, cancel: CancellationToken) -> Option<BlockingHit> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return None,
                _ = ticker.tick() => {}
            }

            let table = Arc::clone(&self.table);
            let root = self.root;
            let hit = match tokio::task::spawn_blocking(move || Self::scan(table.as_ref(), root)).await {
                Ok(hit) => hit,
                Err(e) => {
                    warn!("Watchdog scan panicked: {}", e);
                    continue;
                }
            };
            let Some(hit) = hit else {
                continue;
            };
            if cancel.is_cancelled() {
                return None;
            }

            let command_line = truncate_with_ellipsis(&hit.argv.join(" "), 200);
            warn!(pid = hit.pid, kind = %hit.kind, "Killing blocking process: {}", command_line);
            if !self.table.kill(hit.pid) {
                debug!(pid = hit.pid, "Blocking process was already gone");
            }
            self.failure_log.append_or_warn(&FailureNote::new(
                FailureKind::BlockingProcess,
                command_line,
                format!("{} (pid {}): {}", hit.kind, hit.pid, hit.reason),
            ));
            self.signals.send(ControlSignal::Gutter).await;
            return Some(hit);
        }
    }
}
