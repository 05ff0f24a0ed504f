//! CLI argument parsing for sessionstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ss")]
#[command(author, version, about = "Inspect resolvd session state", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the session directory
    #[arg(short, long)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List all sessions
    List,

    /// Print a session document
    Show {
        /// Session key (owner__repo__pr-N)
        #[arg(required = true)]
        key: String,
    },

    /// Print the lessons journaled for a session
    Lessons {
        /// Session key (owner__repo__pr-N)
        #[arg(required = true)]
        key: String,

        /// Render as Markdown instead of one line per lesson
        #[arg(short, long)]
        markdown: bool,
    },

    /// Delete a session and its lessons
    Delete {
        /// Session key (owner__repo__pr-N)
        #[arg(required = true)]
        key: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lessons_markdown() {
        let cli = Cli::try_parse_from(["ss", "lessons", "o__r__pr-1", "--markdown"]).unwrap();
        match cli.command {
            Command::Lessons { key, markdown } => {
                assert_eq!(key, "o__r__pr-1");
                assert!(markdown);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_show_requires_key() {
        assert!(Cli::try_parse_from(["ss", "show"]).is_err());
    }
}
