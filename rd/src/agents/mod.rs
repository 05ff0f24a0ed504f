//! Editing agent pool
//!
//! Agents are external code-editing tools. The loop only sees whether a run
//! succeeded and how it failed; whether anything changed is read from git.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AgentsConfig;

mod cli;
mod process;

pub use cli::{CliAgent, CliKind};
pub use process::{ProcessOutput, run_process};

/// How an agent run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorKind {
    Permission,
    Authentication,
    /// Missing binary, broken runtime, bad install
    Environment,
    Transient,
}

impl AgentErrorKind {
    /// Fatal kinds abort the run; retrying another model will not help
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AgentErrorKind::Transient)
    }
}

impl fmt::Display for AgentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentErrorKind::Permission => "permission",
            AgentErrorKind::Authentication => "authentication",
            AgentErrorKind::Environment => "environment",
            AgentErrorKind::Transient => "transient",
        };
        write!(f, "{}", s)
    }
}

const PERMISSION_PATTERNS: &[&str] = &[
    "permission denied",
    "operation not permitted",
    "eacces",
    "eperm",
    "not allowed to write",
    "read-only file system",
];

const AUTH_PATTERNS: &[&str] = &[
    "unauthorized",
    "invalid api key",
    "invalid x-api-key",
    "api key not found",
    "authentication failed",
    "authentication_error",
    "not logged in",
    "please log in",
    "please run /login",
    "status 401",
    "status code 401",
    "http 401",
    "401 unauthorized",
    "invalid credentials",
    "missing credentials",
    "no credentials found",
];

const ENVIRONMENT_PATTERNS: &[&str] = &[
    "command not found",
    "spawn enoent",
    "cannot find module",
    "modulenotfounderror",
    "unsupported engine",
    "requires node",
    "exec format error",
];

/// Map agent output to an error kind by text matching
pub fn classify_error(text: &str) -> AgentErrorKind {
    let lower = text.to_lowercase();
    let matches = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    if matches(AUTH_PATTERNS) {
        AgentErrorKind::Authentication
    } else if matches(PERMISSION_PATTERNS) {
        AgentErrorKind::Permission
    } else if matches(ENVIRONMENT_PATTERNS) {
        AgentErrorKind::Environment
    } else {
        AgentErrorKind::Transient
    }
}

/// Outcome of one agent invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentRun {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub error_kind: Option<AgentErrorKind>,
}

impl AgentRun {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(output: impl Into<String>, error: impl Into<String>, kind: AgentErrorKind) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
            error_kind: Some(kind),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.error_kind.is_some_and(|k| k.is_fatal())
    }

    /// What the agent said, if anything
    pub fn explanation(&self) -> Option<&str> {
        let text = self.output.trim();
        (!text.is_empty()).then_some(text)
    }
}

/// An interchangeable external editing tool
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Models the tool accepts, in preference order (may be empty)
    fn models(&self) -> &[String];

    async fn run(&self, workdir: &Path, prompt: &str, model: Option<&str>) -> AgentRun;
}

/// Available agents in rotation order
#[derive(Clone, Default)]
pub struct AgentPool {
    agents: Vec<Arc<dyn Agent>>,
}

impl AgentPool {
    pub fn new(agents: Vec<Arc<dyn Agent>>) -> Self {
        Self { agents }
    }

    /// Probe each configured tool with `--version` and keep the ones that answer
    pub async fn detect(config: &AgentsConfig) -> Self {
        debug!(count = config.tools.len(), "AgentPool::detect: called");
        let cwd = std::env::temp_dir();
        let mut agents: Vec<Arc<dyn Agent>> = Vec::new();

        for entry in &config.tools {
            let probe = run_process(&entry.name, &["--version".to_string()], &cwd, Duration::from_secs(10)).await;
            match probe {
                Ok(out) if out.success() => {
                    debug!(tool = %entry.name, version = %out.stdout.trim(), "AgentPool::detect: available");
                    agents.push(Arc::new(CliAgent::from_entry(entry)));
                }
                _ => debug!(tool = %entry.name, "AgentPool::detect: not available"),
            }
        }

        let mut pool = Self::new(agents);
        if let Some(preferred) = &config.preferred_tool {
            pool.prefer(preferred);
        }
        info!(agents = ?pool.names(), "Detected editing agents");
        pool
    }

    /// Move `name` to the front of the rotation
    pub fn prefer(&mut self, name: &str) {
        match self.agents.iter().position(|a| a.name() == name) {
            Some(idx) => {
                let agent = self.agents.remove(idx);
                self.agents.insert(0, agent);
            }
            None => warn!(tool = %name, "Preferred tool is not available"),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.iter().find(|a| a.name() == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Agent>> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
