//! CLI command definitions and subcommands

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::config::Config;
use crate::resolver::RunOptions;

/// Editing agent CLIs probed for the help text
const KNOWN_AGENTS: &[&str] = &["claude", "codex", "aider", "opencode", "gemini"];

/// resolvd - review-comment resolution loop
#[derive(Parser)]
#[command(
    name = "rd",
    about = "Resolve pull request review comments with editing agents and a verification oracle",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve review comments on a pull request
    Fix {
        /// Pull request: owner/repo#N, owner/repo/N or a GitHub URL
        pr: String,

        #[command(flatten)]
        args: FixArgs,
    },

    /// Show the stored session for a pull request
    Status {
        /// Pull request: owner/repo#N, owner/repo/N or a GitHub URL
        pr: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List detected editing agents and their models
    Agents,
}

/// Overrides for one `fix` run
#[derive(Debug, Clone, Default, Args)]
pub struct FixArgs {
    /// Push after every verified commit
    #[arg(long, overrides_with = "no_auto_push")]
    pub auto_push: bool,

    /// Commit locally without pushing
    #[arg(long, overrides_with = "auto_push")]
    pub no_auto_push: bool,

    /// Maximum fix attempts
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Rotation cycles without progress before bailing out
    #[arg(long)]
    pub max_stale_cycles: Option<u32>,

    /// Fetch and analyze, then print what would be fixed
    #[arg(long)]
    pub dry_run: bool,

    /// Leave verified changes uncommitted and stop
    #[arg(long)]
    pub no_commit: bool,

    /// Never push (same as --no-auto-push)
    #[arg(long)]
    pub no_push: bool,

    /// Re-check verified and dismissed issues at startup
    #[arg(long)]
    pub reverify: bool,

    /// Ask the oracle about one issue at a time
    #[arg(long)]
    pub sequential: bool,

    /// Editing agent to start with
    #[arg(long)]
    pub tool: Option<String>,

    /// Model to start with
    #[arg(long)]
    pub model: Option<String>,

    /// Use this checkout instead of one under workdir-root
    #[arg(long)]
    pub workdir: Option<PathBuf>,
}

impl FixArgs {
    /// Fold the flags into a loaded config
    pub fn apply(&self, config: &mut Config) {
        debug!(?self, "FixArgs::apply: called");
        if self.auto_push {
            config.resolver.auto_push = true;
        }
        if self.no_auto_push || self.no_push {
            config.resolver.auto_push = false;
        }
        if let Some(n) = self.max_iterations {
            config.resolver.max_fix_iterations = n;
        }
        if let Some(n) = self.max_stale_cycles {
            config.resolver.max_stale_cycles = n;
        }
        if self.sequential {
            config.resolver.batch_verify = false;
        }
        if let Some(tool) = &self.tool {
            config.agents.preferred_tool = Some(tool.clone());
        }
        if let Some(model) = &self.model {
            config.agents.preferred_model = Some(model.clone());
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            dry_run: self.dry_run,
            no_commit: self.no_commit,
            reverify: self.reverify,
        }
    }
}

/// Result of checking a required tool
pub struct ToolCheck {
    pub name: &'static str,
    pub available: bool,
    pub version: Option<String>,
}

impl ToolCheck {
    /// Check if a tool is available and get its version
    pub fn check(name: &'static str, version_args: &[&str]) -> Self {
        debug!(name, ?version_args, "ToolCheck::check: called");
        let result = std::process::Command::new(name).args(version_args).output();

        match result {
            Ok(output) if output.status.success() => {
                debug!(name, "ToolCheck::check: tool available");
                let version_str = String::from_utf8_lossy(&output.stdout);
                Self {
                    name,
                    available: true,
                    version: Some(parse_version(&version_str)),
                }
            }
            _ => {
                debug!(name, "ToolCheck::check: tool not available");
                Self {
                    name,
                    available: false,
                    version: None,
                }
            }
        }
    }
}

/// Parse version from command output (extracts first version-like string)
fn parse_version(output: &str) -> String {
    for word in output.split_whitespace() {
        let word = word.trim_start_matches('v');
        if word.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            let version: String = word.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
            if !version.is_empty() {
                return version;
            }
        }
    }
    "unknown".to_string()
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("resolvd")
        .join("logs")
        .join("resolvd.log")
}

fn push_checks(help: &mut String, title: &str, tools: &[ToolCheck]) {
    help.push_str(title);
    help.push_str(":\n");
    for tool in tools {
        let icon = if tool.available { "\u{2705}" } else { "\u{274C}" };
        let version = tool.version.as_deref().unwrap_or("not found");
        help.push_str(&format!("  {} {:<10} {}\n", icon, tool.name, version));
    }
}

/// Generate the after_help text with tool checks and the log location
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    let mut help = String::new();

    push_checks(&mut help, "Required Tools", &[ToolCheck::check("git", &["--version"])]);
    help.push('\n');

    let agents: Vec<ToolCheck> = KNOWN_AGENTS.iter().map(|name| ToolCheck::check(*name, &["--version"])).collect();
    push_checks(&mut help, "Editing Agents", &agents);

    help.push('\n');
    help.push_str(&format!("Logs are written to: {}\n", get_log_path().display()));
    help
}

/// Output format for the status command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
