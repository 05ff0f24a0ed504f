use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use sessionstore::SessionStore;
use sessionstore::cli::{Cli, Command};
use sessionstore::config::Config;

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn format_time(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let store_path = cli.store.clone().unwrap_or(config.store_path);

    info!("sessionstore starting at {}", store_path.display());
    let store = SessionStore::open(&store_path)?;

    match cli.command {
        Command::List => {
            let sessions = store.list()?;
            if sessions.is_empty() {
                println!("No sessions found");
            } else {
                for s in sessions {
                    println!(
                        "{}  {}  {} bytes  {} lessons",
                        s.key.cyan(),
                        format_time(s.updated_at).dimmed(),
                        s.size_bytes,
                        s.lesson_count
                    );
                }
            }
        }
        Command::Show { key } => match store.load::<serde_json::Value>(&key)? {
            Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
            None => eyre::bail!("No session found for {}", key),
        },
        Command::Lessons { key, markdown } => {
            if markdown {
                print!("{}", store.export_lessons_markdown(&key)?);
            } else {
                let lessons = store.read_lessons(&key)?;
                if lessons.is_empty() {
                    println!("No lessons for {}", key);
                }
                for lesson in lessons {
                    println!(
                        "{} [{}] {}",
                        format_time(lesson.created_at).dimmed(),
                        lesson.scope.to_string().yellow(),
                        lesson.text
                    );
                }
            }
        }
        Command::Delete { key } => {
            store.delete(&key)?;
            println!("{} Deleted session: {}", "✓".green(), key);
        }
    }

    Ok(())
}
