//! ReviewIssue and its resolution records

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Which side of the diff a comment is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffSide {
    Left,
    #[default]
    Right,
}

impl DiffSide {
    /// Parse GitHub's `LEFT` / `RIGHT`
    pub fn from_github(s: Option<&str>) -> Self {
        match s {
            Some(s) if s.eq_ignore_ascii_case("left") => DiffSide::Left,
            _ => DiffSide::Right,
        }
    }
}

/// Resolution status of an issue, owned by the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Unresolved,
    /// Verified at the given fix iteration
    VerifiedFixed { at_iteration: u32 },
    Dismissed,
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueStatus::Unresolved => write!(f, "unresolved"),
            IssueStatus::VerifiedFixed { at_iteration } => write!(f, "verified-fixed@{}", at_iteration),
            IssueStatus::Dismissed => write!(f, "dismissed"),
        }
    }
}

/// One review comment that may need a code change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewIssue {
    /// Stable identifier (`c<comment id>`)
    pub id: String,
    pub comment_id: u64,
    pub path: String,
    pub line: Option<u32>,
    #[serde(default)]
    pub side: DiffSide,
    pub author: String,
    pub body: String,
    /// GitHub no longer anchors the comment to the current diff
    #[serde(default)]
    pub outdated: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: IssueStatus,
}

impl ReviewIssue {
    /// Issue id for a review comment id
    pub fn id_for(comment_id: u64) -> String {
        format!("c{}", comment_id)
    }

    pub fn new(comment_id: u64, path: impl Into<String>, line: Option<u32>, author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Self::id_for(comment_id),
            comment_id,
            path: path.into(),
            line,
            side: DiffSide::Right,
            author: author.into(),
            body: body.into(),
            outdated: false,
            url: None,
            status: IssueStatus::Unresolved,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.status == IssueStatus::Unresolved
    }

    pub fn is_verified(&self) -> bool {
        matches!(self.status, IssueStatus::VerifiedFixed { .. })
    }

    /// Iteration at which the issue was last verified, if it is verified
    pub fn verified_at(&self) -> Option<u32> {
        match self.status {
            IssueStatus::VerifiedFixed { at_iteration } => Some(at_iteration),
            _ => None,
        }
    }

    /// True when the verification is older than `expiry` iterations
    pub fn verification_expired(&self, current_iteration: u32, expiry: u32) -> bool {
        debug!(id = %self.id, current_iteration, expiry, "ReviewIssue::verification_expired: called");
        self.verified_at()
            .map(|at| current_iteration.saturating_sub(at) > expiry)
            .unwrap_or(false)
    }

    /// Take fresh text from a refetch while keeping the loop-owned status
    pub fn refresh_from(&mut self, fetched: &ReviewIssue) {
        self.path = fetched.path.clone();
        self.line = fetched.line;
        self.side = fetched.side;
        self.body = fetched.body.clone();
        self.outdated = fetched.outdated;
        self.url = fetched.url.clone();
    }
}

/// Outcome of one verification question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub issue_id: String,
    pub passed: bool,
    pub reason: String,
    pub iteration: u32,
}

/// Why an issue was dismissed without a fix from this run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissalCategory {
    /// The code already addresses the comment
    AlreadyFixed,
    /// Verified as fixed although its file was not touched
    FileUnchanged,
    /// The commented file no longer exists
    FileRemoved,
    /// The comment is anchored to code that has since changed
    Outdated,
}

impl fmt::Display for DismissalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DismissalCategory::AlreadyFixed => "already-fixed",
            DismissalCategory::FileUnchanged => "file-unchanged",
            DismissalCategory::FileRemoved => "file-removed",
            DismissalCategory::Outdated => "outdated",
        };
        write!(f, "{}", s)
    }
}

/// A dismissal with its justification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DismissalRecord {
    pub issue_id: String,
    pub reason: String,
    pub category: DismissalCategory,
    pub path: String,
    pub line: Option<u32>,
    pub original_body: String,
    pub iteration: u32,
}
