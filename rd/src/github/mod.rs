//! Hosted-repository collaborator
//!
//! [`ReviewHost`] is what the loop needs from GitHub; [`GithubClient`]
//! implements it over the REST API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{PrRef, ReviewIssue};

mod client;
mod comments;

pub use client::GithubClient;
pub use comments::{ApiReviewComment, issues_from_comments};

/// Errors from the hosting API
#[derive(Debug, Error)]
pub enum HostError {
    #[error("GitHub API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("GitHub request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected GitHub response: {0}")]
    InvalidResponse(String),

    #[error("GitHub token missing: {0}")]
    Auth(String),
}

/// Pull request metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrInfo {
    pub title: String,
    pub head_ref: String,
    pub head_sha: String,
    pub base_ref: String,
    /// `None` while GitHub is still computing mergeability
    pub mergeable: Option<bool>,
    pub state: String,
    pub clone_url: String,
}

/// Aggregate CI check state for a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckStatus {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl CheckStatus {
    pub fn all_completed(&self) -> bool {
        self.completed >= self.total
    }
}

/// A top-level conversation comment on the PR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueComment {
    pub id: u64,
    pub author: String,
    pub body: String,
}

/// Queries against the hosting service
#[async_trait]
pub trait ReviewHost: Send + Sync {
    async fn pr_info(&self, pr: &PrRef) -> Result<PrInfo, HostError>;

    /// One issue per review thread root, ignored authors removed
    async fn review_comments(&self, pr: &PrRef) -> Result<Vec<ReviewIssue>, HostError>;

    async fn check_status(&self, pr: &PrRef, sha: &str) -> Result<CheckStatus, HostError>;

    async fn issue_comments(&self, pr: &PrRef) -> Result<Vec<IssueComment>, HostError>;

    async fn post_issue_comment(&self, pr: &PrRef, body: &str) -> Result<(), HostError>;

    /// File content at a ref, `None` when it does not exist there
    async fn file_at_ref(&self, pr: &PrRef, path: &str, git_ref: &str) -> Result<Option<String>, HostError>;
}
