//! Command construction for the agent CLI.

use wiggum_core::{AgentConfig, LaunchRequest, PromptMode};

/// Flags that make `cursor-agent` run headless and stream NDJSON events.
const CURSOR_HEADLESS_ARGS: &[&str] = &["-p", "--force", "--output-format", "stream-json"];

/// How to invoke the agent CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorBackend {
    pub command: String,
    /// Arguments placed right after the command.
    pub args: Vec<String>,
    /// Flag carrying the model id; `None` omits the model.
    pub model_flag: Option<String>,
    /// Flag carrying the session to resume; `None` never resumes.
    pub resume_flag: Option<String>,
    /// User-supplied arguments, placed before the prompt.
    pub extra_args: Vec<String>,
    pub prompt_mode: PromptMode,
}

impl CursorBackend {
    /// The `cursor-agent` backend, as configured.
    pub fn from_config(agent: &AgentConfig) -> Self {
        Self {
            command: agent.command.clone(),
            args: CURSOR_HEADLESS_ARGS.iter().map(|a| (*a).to_string()).collect(),
            model_flag: Some("--model".to_string()),
            resume_flag: Some("--resume".to_string()),
            extra_args: agent.extra_args.clone(),
            prompt_mode: agent.prompt_mode,
        }
    }

    /// An arbitrary command that receives only the prompt.
    pub fn custom(command: impl Into<String>, args: Vec<String>, prompt_mode: PromptMode) -> Self {
        Self {
            command: command.into(),
            args,
            model_flag: None,
            resume_flag: None,
            extra_args: Vec::new(),
            prompt_mode,
        }
    }

    /// Builds `(command, args, stdin_input)` for one launch.
    pub fn build_command(&self, request: &LaunchRequest) -> (String, Vec<String>, Option<String>) {
        let mut args = self.args.clone();
        if let Some(flag) = &self.model_flag
            && !request.model.is_empty()
        {
            args.push(flag.clone());
            args.push(request.model.clone());
        }
        if let (Some(flag), Some(session)) = (&self.resume_flag, &request.resume_session) {
            args.push(flag.clone());
            args.push(session.clone());
        }
        args.extend(self.extra_args.iter().cloned());

        let stdin_input = match self.prompt_mode {
            PromptMode::Arg => {
                args.push(request.prompt.clone());
                None
            }
            PromptMode::Stdin => Some(request.prompt.clone()),
        };
        (self.command.clone(), args, stdin_input)
    }

    /// The command line with the prompt elided, for `--dry-run` and logs.
    pub fn display_command(&self, request: &LaunchRequest) -> String {
        let (command, mut args, stdin_input) = self.build_command(request);
        let placeholder = format!("<prompt: {} bytes>", request.prompt.len());
        if stdin_input.is_some() {
            args.push(format!("< {placeholder}"));
        } else if let Some(last) = args.last_mut() {
            *last = placeholder;
        }
        std::iter::once(command).chain(args).collect::<Vec<_>>().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(resume: Option<&str>) -> LaunchRequest {
        LaunchRequest {
            prompt: "Fix the build".to_string(),
            model: "sonnet-4.5".to_string(),
            resume_session: resume.map(str::to_string),
            iteration: 1,
        }
    }

    #[test]
    fn test_cursor_agent_command() {
        let backend = CursorBackend::from_config(&AgentConfig::default());
        let (cmd, args, stdin) = backend.build_command(&request(None));

        assert_eq!(cmd, "cursor-agent");
        assert_eq!(
            args,
            vec!["-p", "--force", "--output-format", "stream-json", "--model", "sonnet-4.5", "Fix the build"]
        );
        assert!(stdin.is_none());
    }

    #[test]
    fn test_resume_and_extra_args_precede_prompt() {
        let config = AgentConfig {
            extra_args: vec!["--approve-mcps".to_string()],
            ..AgentConfig::default()
        };
        let backend = CursorBackend::from_config(&config);
        let (_, args, _) = backend.build_command(&request(Some("sess-7")));

        let tail: Vec<_> = args.iter().rev().take(4).rev().map(String::as_str).collect();
        assert_eq!(tail, vec!["--resume", "sess-7", "--approve-mcps", "Fix the build"]);
    }

    #[test]
    fn test_stdin_mode_keeps_prompt_out_of_argv() {
        let config = AgentConfig {
            prompt_mode: PromptMode::Stdin,
            ..AgentConfig::default()
        };
        let (_, args, stdin) = CursorBackend::from_config(&config).build_command(&request(None));
        assert!(!args.iter().any(|a| a == "Fix the build"));
        assert_eq!(stdin.as_deref(), Some("Fix the build"));
    }

    #[test]
    fn test_custom_backend_gets_only_prompt() {
        let backend = CursorBackend::custom("sh", vec!["-c".to_string()], PromptMode::Arg);
        let (cmd, args, _) = backend.build_command(&request(Some("sess-1")));
        assert_eq!(cmd, "sh");
        assert_eq!(args, vec!["-c", "Fix the build"]);
    }

    #[test]
    fn test_display_command_elides_prompt() {
        let backend = CursorBackend::from_config(&AgentConfig::default());
        let shown = backend.display_command(&request(None));
        assert!(shown.starts_with("cursor-agent -p --force"));
        assert!(shown.ends_with("--model sonnet-4.5 <prompt: 13 bytes>"));
    }
}
