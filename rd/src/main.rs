//! resolvd - review-comment resolution loop
//!
//! CLI entry point for fixing, inspecting and listing agents for pull requests.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use resolvd::agents::AgentPool;
use resolvd::cli::{Cli, Command, FixArgs, OutputFormat, generate_after_help};
use resolvd::config::Config;
use resolvd::domain::PrRef;
use resolvd::git::{GitCli, Vcs, authenticated_url};
use resolvd::github::{GithubClient, ReviewHost};
use resolvd::llm::create_client;
use resolvd::oracle::Oracle;
use resolvd::prompts::PromptLoader;
use resolvd::resolver::{Collaborators, Resolver, ShutdownSignal, render_status, render_summary};
use resolvd::session::Session;
use sessionstore::SessionStore;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("resolvd")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("resolvd.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Build command with dynamic after_help that shows tool checks
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Fix { pr, args } => {
            debug!(%pr, "main: matched Fix command");
            cmd_fix(config, &pr, &args).await
        }
        Command::Status { pr, format } => {
            debug!(%pr, %format, "main: matched Status command");
            cmd_status(&config, &pr, format)
        }
        Command::Agents => {
            debug!("main: matched Agents command");
            cmd_agents(&config).await
        }
    }
}

/// Trigger `shutdown` on SIGINT or SIGTERM
fn spawn_signal_handler(shutdown: ShutdownSignal) -> Result<()> {
    debug!("spawn_signal_handler: called");
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => debug!("spawn_signal_handler: SIGINT received"),
                _ = sigterm.recv() => debug!("spawn_signal_handler: SIGTERM received"),
            }
            shutdown.trigger();
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.trigger();
            }
        });
    }

    Ok(())
}

async fn cmd_fix(mut config: Config, pr_input: &str, args: &FixArgs) -> Result<()> {
    debug!(%pr_input, "cmd_fix: called");
    args.apply(&mut config);
    config.validate()?;

    let pr = PrRef::parse(pr_input)?;
    let run_id = Uuid::now_v7();
    let span = tracing::info_span!("fix", %run_id, %pr);

    async move {
        let github = GithubClient::from_config(&config.github)?;
        let pr_info = github.pr_info(&pr).await.context("Failed to fetch pull request")?;
        if pr_info.state != "open" {
            warn!(state = %pr_info.state, "Pull request is not open");
        }
        info!(title = %pr_info.title, head = %pr_info.head_ref, base = %pr_info.base_ref, "Fetched pull request");

        let checkout = args
            .workdir
            .clone()
            .unwrap_or_else(|| config.resolver.workdir_root.join(pr.session_key()));
        let vcs = GitCli::new(&checkout, &pr_info.head_ref);
        vcs.prepare(&authenticated_url(&pr_info.clone_url, Some(github.token())))
            .await
            .context("Failed to prepare checkout")?;
        println!("{} {}", "Checkout:".bold(), checkout.display());

        let llm = create_client(&config.llm)?;
        let oracle = Oracle::new(llm, PromptLoader::new(&checkout), config.llm.max_tokens);
        let agents = AgentPool::detect(&config.agents).await;

        let store = SessionStore::open(&config.storage.session_dir)?;
        let session = Session::open(store, &pr, &pr_info.head_ref, &pr_info.base_ref, &pr_info.head_sha)?;
        if session.resumed() {
            println!("{} resuming session at phase {}", "Session:".bold(), session.state().phase);
        }

        let shutdown = ShutdownSignal::new();
        spawn_signal_handler(shutdown.clone())?;

        let parts = Collaborators {
            host: Arc::new(github),
            vcs: Arc::new(vcs),
            oracle: Arc::new(oracle),
            agents,
        };
        let mut resolver = Resolver::new(pr.clone(), pr_info, config, session, parts)
            .with_options(args.run_options())
            .with_shutdown(shutdown);

        let summary = resolver.run().await?;
        print!("{}", render_summary(&summary));
        Ok(())
    }
    .instrument(span)
    .await
}

fn cmd_status(config: &Config, pr_input: &str, format: OutputFormat) -> Result<()> {
    debug!(%pr_input, %format, "cmd_status: called");
    let pr = PrRef::parse(pr_input)?;
    let store = SessionStore::open(&config.storage.session_dir)?;

    let Some(state) = Session::peek(&store, &pr)? else {
        debug!("cmd_status: no session");
        println!("No session for {}", pr);
        return Ok(());
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&state)?),
        OutputFormat::Text => print!("{}", render_status(&state)),
    }
    Ok(())
}

async fn cmd_agents(config: &Config) -> Result<()> {
    debug!("cmd_agents: called");
    let pool = AgentPool::detect(&config.agents).await;
    if pool.is_empty() {
        println!("{}", "No editing agents found on PATH".yellow());
        return Ok(());
    }

    for agent in pool.iter() {
        let models = if agent.models().is_empty() {
            "(default model)".dimmed().to_string()
        } else {
            agent.models().join(", ")
        };
        println!("{} {}", agent.name().green().bold(), models);
    }
    Ok(())
}
