//! Version control collaborator
//!
//! The loop talks to the checkout only through [`Vcs`]; [`GitCli`] is the
//! production implementation over the `git` binary.

use std::path::Path;

use async_trait::async_trait;
use eyre::Result;

mod cli;

pub use cli::{GitCli, authenticated_url};

/// Result of merging another branch into the checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Merged (or already up to date) without conflicts
    Clean,
    /// Merge stopped with these conflicted paths
    Conflicts(Vec<String>),
}

/// Result of a push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The remote refused the push (usually non-fast-forward)
    Rejected(String),
}

/// Operations the loop needs from version control
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Root of the checkout
    fn workdir(&self) -> &Path;

    /// Clone, or fetch and check out the PR branch, keeping local edits
    async fn prepare(&self, clone_url: &str) -> Result<()>;

    async fn head_sha(&self) -> Result<String>;

    /// Paths with uncommitted changes, untracked files included
    async fn changed_files(&self) -> Result<Vec<String>>;

    /// Diff of one path against HEAD (new files diff against nothing)
    async fn diff_file(&self, path: &str) -> Result<String>;

    /// Diff of every changed path
    async fn diff_all(&self) -> Result<String>;

    /// File content, `None` when the file does not exist
    async fn read_file(&self, path: &str) -> Result<Option<String>>;

    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    /// Drop every uncommitted change, untracked files included
    async fn discard_changes(&self) -> Result<()>;

    /// Delete a file; missing files are not an error
    async fn remove_file(&self, path: &str) -> Result<()>;

    /// Stage the given paths (all changes when empty)
    async fn stage(&self, paths: &[String]) -> Result<()>;

    /// Commit what is staged, returning the new head
    async fn commit(&self, message: &str) -> Result<String>;

    async fn push(&self) -> Result<PushOutcome>;

    /// Rebase onto the remote branch; `false` when it conflicted (rebase is aborted)
    async fn pull_rebase(&self) -> Result<bool>;

    /// Fetch `branch` from origin and merge it
    async fn merge_branch(&self, branch: &str) -> Result<MergeOutcome>;

    async fn is_merging(&self) -> Result<bool>;

    async fn abort_merge(&self) -> Result<()>;

    /// Paths git still reports as unmerged
    async fn conflicted_paths(&self) -> Result<Vec<String>>;

    /// Hard reset to the remote PR branch
    async fn reset_to_remote(&self) -> Result<()>;

    /// Full messages of commits on HEAD that are not on `origin/<base>`
    async fn commit_messages_since(&self, base: &str) -> Result<Vec<String>>;
}

/// True when `text` still contains merge conflict markers
pub fn has_conflict_markers(text: &str) -> bool {
    text.lines().any(|line| {
        let is_marker = |m: &str| line == m || line.starts_with(&format!("{} ", m));
        is_marker("<<<<<<<") || is_marker(">>>>>>>") || is_marker("|||||||")
    })
}
