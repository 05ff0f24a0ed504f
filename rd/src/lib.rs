//! resolvd - review-comment resolution loop
//!
//! resolvd drives a pull request's review comments to resolution: it fetches
//! the comments, asks a reasoning model (the oracle) whether each issue still
//! exists, hands real issues to an editing agent, has the oracle verify every
//! change and then commits and pushes the verified fixes.
//!
//! # Modules
//!
//! - [`resolver`] - The resolution loop and its reports
//! - [`oracle`] - Verdicts, audits and commit messages from the reasoning model
//! - [`agents`] - Editing agent CLIs and their detection
//! - [`rotation`] - Tool and model rotation
//! - [`stalemate`] - Progress tracking and bail-out
//! - [`session`] - Persistent per-PR state and lessons
//! - [`conflicts`] - Merge conflict resolution
//! - [`github`] / [`git`] - Review host and version control seams
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod agents;
pub mod cli;
pub mod config;
pub mod conflicts;
pub mod domain;
pub mod git;
pub mod github;
pub mod llm;
pub mod oracle;
pub mod prompts;
pub mod resolver;
pub mod rotation;
pub mod session;
pub mod stalemate;

#[cfg(test)]
pub mod testing;

pub use config::Config;
pub use domain::{PrRef, ReviewIssue};
pub use resolver::{Resolver, RunOptions, RunSummary};
