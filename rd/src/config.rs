//! resolvd configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main resolvd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reasoning model used by the oracle
    pub llm: LlmConfig,

    /// Hosted repository access
    pub github: GithubConfig,

    /// Editing agents, in rotation order
    pub agents: AgentsConfig,

    /// Resolution loop limits and switches
    pub resolver: ResolverConfig,

    /// Conflict resolution
    pub conflicts: ConflictsConfig,

    /// Session storage
    pub storage: StorageConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Checks that required environment variables are set. Call this early in
    /// startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if std::env::var(&self.llm.api_key_env).is_err() {
            return Err(eyre::eyre!(
                "LLM API key not found. Set the {} environment variable.",
                self.llm.api_key_env
            ));
        }
        if self.github.token().is_none() {
            return Err(eyre::eyre!(
                "GitHub token not found. Set {} or GH_TOKEN.",
                self.github.token_env
            ));
        }
        if self.resolver.models_per_tool_round == 0 {
            return Err(eyre::eyre!("resolver.models-per-tool-round must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .resolvd.yml
        let local_config = PathBuf::from(".resolvd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/resolvd/resolvd.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("resolvd").join("resolvd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is set up
    ///
    /// Errors are swallowed; the full load reports them once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Reasoning model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name ("anthropic" or "openai")
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 16384,
            timeout_ms: 300_000,
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn get_api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env).context(format!("Environment variable {} not set", self.api_key_env))
    }
}

/// Hosted repository configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// Environment variable holding the API token (GH_TOKEN is tried after it)
    #[serde(rename = "token-env")]
    pub token_env: String,

    /// REST API base URL
    #[serde(rename = "api-url")]
    pub api_url: String,

    /// Comment authors whose comments are never treated as issues
    #[serde(rename = "ignore-authors")]
    pub ignore_authors: Vec<String>,

    /// Longest wait for bot reviews after a push
    #[serde(rename = "bot-wait-secs")]
    pub bot_wait_secs: u64,

    /// Poll interval while waiting for bot reviews
    #[serde(rename = "bot-poll-secs")]
    pub bot_poll_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token_env: "GITHUB_TOKEN".to_string(),
            api_url: "https://api.github.com".to_string(),
            ignore_authors: vec![],
            bot_wait_secs: 300,
            bot_poll_secs: 30,
        }
    }
}

impl GithubConfig {
    /// Resolve the API token
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .or_else(|| std::env::var("GH_TOKEN").ok())
            .filter(|t| !t.trim().is_empty())
    }
}

/// One editing agent entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEntry {
    /// CLI name (claude, codex, aider, opencode, gemini)
    pub name: String,

    /// Models to rotate through, in order; empty means the tool's default
    #[serde(default)]
    pub models: Vec<String>,

    /// Wall-clock limit for one run
    #[serde(rename = "timeout-secs", default = "default_agent_timeout")]
    pub timeout_secs: u64,
}

fn default_agent_timeout() -> u64 {
    900
}

impl AgentEntry {
    pub fn new(name: &str, models: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            models: models.iter().map(|m| m.to_string()).collect(),
            timeout_secs: default_agent_timeout(),
        }
    }
}

/// Editing agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Tools in rotation order
    pub tools: Vec<AgentEntry>,

    /// Tool to start with
    #[serde(rename = "preferred-tool")]
    pub preferred_tool: Option<String>,

    /// Model to start with on the preferred tool
    #[serde(rename = "preferred-model")]
    pub preferred_model: Option<String>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            tools: vec![
                AgentEntry::new("claude", &["sonnet", "opus"]),
                AgentEntry::new("codex", &[]),
                AgentEntry::new("aider", &[]),
                AgentEntry::new("opencode", &[]),
                AgentEntry::new("gemini", &["gemini-2.5-pro", "gemini-2.5-flash"]),
            ],
            preferred_tool: None,
            preferred_model: None,
        }
    }
}

/// Resolution loop limits and switches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Hard limit on fix iterations per run
    #[serde(rename = "max-fix-iterations")]
    pub max_fix_iterations: u32,

    /// Zero-progress rotation cycles before bail-out
    #[serde(rename = "max-stale-cycles")]
    pub max_stale_cycles: u32,

    /// Iterations after which a verified fix is re-examined
    #[serde(rename = "verification-expiry")]
    pub verification_expiry: u32,

    /// Models tried on one tool before moving to the next tool
    #[serde(rename = "models-per-tool-round")]
    pub models_per_tool_round: u32,

    /// Check and verify many issues per oracle call
    #[serde(rename = "batch-verify")]
    pub batch_verify: bool,

    /// Push after each successful commit
    #[serde(rename = "auto-push")]
    pub auto_push: bool,

    /// Ask the oracle for a model order before blind rotation
    #[serde(rename = "recommend-models")]
    pub recommend_models: bool,

    /// Try an oracle file rewrite before bailing out
    #[serde(rename = "direct-fix-on-bail-out")]
    pub direct_fix_on_bail_out: bool,

    /// Window of the rapid-failure circuit breaker
    #[serde(rename = "breaker-window-secs")]
    pub breaker_window_secs: u64,

    /// Agent failures inside the window that trip the breaker
    #[serde(rename = "breaker-max-failures")]
    pub breaker_max_failures: u32,

    /// Push attempts after a rejection
    #[serde(rename = "push-retries")]
    pub push_retries: u32,

    /// Post a summary comment on the PR when everything is fixed
    #[serde(rename = "post-summary")]
    pub post_summary: bool,

    /// Where checkouts live (one directory per PR)
    #[serde(rename = "workdir-root")]
    pub workdir_root: PathBuf,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_fix_iterations: 10,
            max_stale_cycles: 3,
            verification_expiry: 5,
            models_per_tool_round: 2,
            batch_verify: true,
            auto_push: true,
            recommend_models: true,
            direct_fix_on_bail_out: true,
            breaker_window_secs: 120,
            breaker_max_failures: 5,
            push_retries: 3,
            post_summary: false,
            workdir_root: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("resolvd")
                .join("checkouts"),
        }
    }
}

/// Conflict resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    /// Globs (matched against the file name and the full path) of machine-generated files
    #[serde(rename = "generated-patterns")]
    pub generated_patterns: Vec<String>,

    /// Wall-clock limit for one regeneration command
    #[serde(rename = "regen-timeout-secs")]
    pub regen_timeout_secs: u64,

    /// Time between SIGTERM and SIGKILL on timeout
    #[serde(rename = "grace-period-secs")]
    pub grace_period_secs: u64,

    /// Regeneration only runs in directories below this one (defaults to workdir-root)
    #[serde(rename = "base-dir")]
    pub base_dir: Option<PathBuf>,
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            generated_patterns: [
                "Cargo.lock",
                "package-lock.json",
                "yarn.lock",
                "pnpm-lock.yaml",
                "poetry.lock",
                "Gemfile.lock",
                "go.sum",
                "composer.lock",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            regen_timeout_secs: 300,
            grace_period_secs: 10,
            base_dir: None,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for session documents and lesson journals
    #[serde(rename = "session-dir")]
    pub session_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            session_dir: sessionstore::config::default_store_path(),
        }
    }
}
