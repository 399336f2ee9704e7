//! Subprocess helpers for the tracker and version control CLIs, and a small
//! shell-text splitter for recognizing what the agent ran.

use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Captured result of a short-lived helper command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs `program args..` in `cwd` to completion, capturing both streams.
pub async fn capture(program: &str, args: &[&str], cwd: &Path) -> io::Result<CommandOutput> {
    debug!(program, ?args, cwd = %cwd.display(), "Running helper command");
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;
    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Splits shell text into simple commands on `;`, `&&`, `||`, `|` and
/// newlines, then each command into words.
///
/// Handles single and double quotes and backslash escapes. Anything fancier
/// (subshells, substitutions) is kept as literal word text.
pub fn split_commands(text: &str) -> Vec<Vec<String>> {
    let mut commands = Vec::new();
    let mut words: Vec<String> = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = text.chars().peekable();

    let end_word = |word: &mut String, in_word: &mut bool, words: &mut Vec<String>| {
        if *in_word {
            words.push(std::mem::take(word));
            *in_word = false;
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    word.push(q);
                }
            }
            '"' => {
                in_word = true;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                word.push(escaped);
                            }
                        }
                        _ => word.push(q),
                    }
                }
            }
            '\\' => {
                if let Some(escaped) = chars.next()
                    && escaped != '\n'
                {
                    in_word = true;
                    word.push(escaped);
                }
            }
            // Redirections such as `2>&1` and `&>` stay inside the word.
            '&' if word.ends_with('>') || chars.peek() == Some(&'>') => {
                in_word = true;
                word.push(c);
            }
            ';' | '|' | '&' | '\n' => {
                end_word(&mut word, &mut in_word, &mut words);
                if matches!(c, '|' | '&') && chars.peek() == Some(&c) {
                    chars.next();
                }
                if !words.is_empty() {
                    commands.push(std::mem::take(&mut words));
                }
            }
            c if c.is_whitespace() => end_word(&mut word, &mut in_word, &mut words),
            _ => {
                in_word = true;
                word.push(c);
            }
        }
    }
    end_word(&mut word, &mut in_word, &mut words);
    if !words.is_empty() {
        commands.push(words);
    }
    commands
}

/// Final path component of a program name.
pub fn program_name(word: &str) -> &str {
    word.rsplit('/').next().unwrap_or(word)
}

/// Index of the first positional word after the program, skipping flags and
/// the value following any flag listed in `value_flags` (e.g. git's `-C dir`).
pub fn subcommand_index(words: &[String], value_flags: &[&str]) -> Option<usize> {
    let mut i = 1;
    while i < words.len() {
        let word = words[i].as_str();
        if value_flags.contains(&word) {
            i += 2;
        } else if word.starts_with('-') {
            i += 1;
        } else {
            return Some(i);
        }
    }
    None
}

/// Global git options that consume the following word.
pub const GIT_VALUE_FLAGS: &[&str] = &["-C", "-c", "--git-dir", "--work-tree", "--namespace"];

/// True when `words` is a `git ... commit` invocation.
pub fn is_git_commit(words: &[String]) -> bool {
    words.first().is_some_and(|w| program_name(w) == "git")
        && subcommand_index(words, GIT_VALUE_FLAGS).is_some_and(|i| words[i] == "commit")
}
