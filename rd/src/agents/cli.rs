//! Command-line editing agents

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::process::run_process;
use super::{Agent, AgentErrorKind, AgentRun, classify_error};
use crate::config::AgentEntry;

/// How a known CLI takes its prompt and model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliKind {
    Claude,
    Codex,
    Aider,
    OpenCode,
    Gemini,
    /// Unknown tool: prompt as the only argument
    Generic,
}

impl CliKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "claude" => CliKind::Claude,
            "codex" => CliKind::Codex,
            "aider" => CliKind::Aider,
            "opencode" => CliKind::OpenCode,
            "gemini" => CliKind::Gemini,
            _ => CliKind::Generic,
        }
    }

    /// Argument vector for one non-interactive run
    pub fn args(&self, prompt: &str, model: Option<&str>) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));
        match self {
            CliKind::Claude => {
                push(&["-p", prompt, "--dangerously-skip-permissions"]);
                if let Some(m) = model {
                    push(&["--model", m]);
                }
            }
            CliKind::Codex => {
                push(&["exec", "--full-auto"]);
                if let Some(m) = model {
                    push(&["-m", m]);
                }
                push(&[prompt]);
            }
            CliKind::Aider => {
                push(&["--yes-always", "--no-auto-commits", "--message", prompt]);
                if let Some(m) = model {
                    push(&["--model", m]);
                }
            }
            CliKind::OpenCode => {
                push(&["run"]);
                if let Some(m) = model {
                    push(&["-m", m]);
                }
                push(&[prompt]);
            }
            CliKind::Gemini => {
                push(&["-p", prompt, "--yolo"]);
                if let Some(m) = model {
                    push(&["-m", m]);
                }
            }
            CliKind::Generic => push(&[prompt]),
        }
        args
    }
}

/// An editing agent driven through its command-line interface
pub struct CliAgent {
    name: String,
    program: String,
    kind: CliKind,
    models: Vec<String>,
    timeout: Duration,
}

impl CliAgent {
    pub fn from_entry(entry: &AgentEntry) -> Self {
        Self {
            name: entry.name.clone(),
            program: entry.name.clone(),
            kind: CliKind::from_name(&entry.name),
            models: entry.models.clone(),
            timeout: Duration::from_secs(entry.timeout_secs),
        }
    }

    /// Agent that runs an arbitrary program with the prompt as its argument
    pub fn generic(name: &str, program: &str, models: Vec<String>, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            kind: CliKind::Generic,
            models,
            timeout,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Agent for CliAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    async fn run(&self, workdir: &Path, prompt: &str, model: Option<&str>) -> AgentRun {
        debug!(agent = %self.name, ?model, prompt_len = prompt.len(), "CliAgent::run: called");
        info!(agent = %self.name, model = model.unwrap_or("default"), cwd = %workdir.display(), "Invoking editing agent");

        let args = self.kind.args(prompt, model);
        let output = match run_process(&self.program, &args, workdir, self.timeout).await {
            Ok(output) => output,
            Err(e) => {
                warn!(agent = %self.name, error = %e, "Agent failed to start");
                let message = format!("{:#}", e);
                let kind = match classify_error(&message) {
                    AgentErrorKind::Transient => AgentErrorKind::Environment,
                    other => other,
                };
                return AgentRun::failed(String::new(), message, kind);
            }
        };

        if output.timed_out {
            return AgentRun::failed(output.stdout.clone(), output.stderr.clone(), AgentErrorKind::Transient);
        }
        if output.success() {
            return AgentRun::succeeded(output.stdout);
        }

        let error = output.error_text();
        let kind = classify_error(&error);
        warn!(agent = %self.name, exit_code = output.exit_code, %kind, "Agent exited with error");
        AgentRun::failed(output.stdout, error, kind)
    }
}
