//! `git` command-line implementation of [`Vcs`]

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use eyre::{Context, Result, bail};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{MergeOutcome, PushOutcome, Vcs};

/// Captured output of one git invocation
struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Insert a token into an https clone URL
pub fn authenticated_url(url: &str, token: Option<&str>) -> String {
    match (token, url.strip_prefix("https://")) {
        (Some(token), Some(rest)) if !rest.contains('@') => format!("https://x-access-token:{}@{}", token, rest),
        _ => url.to_string(),
    }
}

/// Parse `git status --porcelain` output into paths
fn parse_porcelain(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|l| l.len() > 3)
        .map(|l| {
            let path = &l[3..];
            let path = path.rsplit_once(" -> ").map(|(_, new)| new).unwrap_or(path);
            path.trim_matches('"').to_string()
        })
        .collect()
}

/// Git checkout of one PR branch
pub struct GitCli {
    workdir: PathBuf,
    branch: String,
}

impl GitCli {
    pub fn new(workdir: impl Into<PathBuf>, branch: impl Into<String>) -> Self {
        Self {
            workdir: workdir.into(),
            branch: branch.into(),
        }
    }

    async fn run_in(&self, dir: &Path, args: &[&str]) -> Result<GitOutput> {
        debug!(?args, ?dir, "GitCli::run_in: called");
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .context(format!("Failed to run git {}", args.first().unwrap_or(&"")))?;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn run(&self, args: &[&str]) -> Result<GitOutput> {
        self.run_in(&self.workdir, args).await
    }

    /// Run and fail on a non-zero exit
    async fn run_ok(&self, args: &[&str]) -> Result<String> {
        let out = self.run(args).await?;
        if !out.success {
            bail!("git {} failed: {}", args.join(" "), out.stderr.trim());
        }
        Ok(out.stdout)
    }

    fn remote_branch(&self) -> String {
        format!("origin/{}", self.branch)
    }

    async fn is_clean(&self) -> Result<bool> {
        Ok(self.changed_files().await?.is_empty())
    }

    fn rebase_in_progress(&self) -> bool {
        let git_dir = self.workdir.join(".git");
        git_dir.join("rebase-merge").exists() || git_dir.join("rebase-apply").exists()
    }
}

#[async_trait]
impl Vcs for GitCli {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn prepare(&self, clone_url: &str) -> Result<()> {
        debug!(workdir = %self.workdir.display(), branch = %self.branch, "GitCli::prepare: called");
        if !self.workdir.join(".git").exists() {
            info!(branch = %self.branch, workdir = %self.workdir.display(), "Cloning pull request branch");
            let parent = self
                .workdir
                .parent()
                .ok_or_else(|| eyre::eyre!("Checkout path has no parent: {}", self.workdir.display()))?;
            tokio::fs::create_dir_all(parent).await?;
            let target = self.workdir.to_string_lossy().to_string();
            let out = self
                .run_in(parent, &["clone", "--branch", &self.branch, clone_url, &target])
                .await?;
            if !out.success {
                bail!("git clone failed: {}", out.stderr.trim());
            }
            return Ok(());
        }

        self.run_ok(&["fetch", "origin", &self.branch]).await?;
        self.run_ok(&["checkout", &self.branch]).await?;

        if self.is_clean().await? {
            let out = self.run(&["merge", "--ff-only", &self.remote_branch()]).await?;
            if !out.success {
                warn!(branch = %self.branch, "Local branch diverged from remote, keeping local commits");
            }
        } else {
            info!("Keeping uncommitted edits from a previous run");
        }
        Ok(())
    }

    async fn head_sha(&self) -> Result<String> {
        Ok(self.run_ok(&["rev-parse", "HEAD"]).await?.trim().to_string())
    }

    async fn changed_files(&self) -> Result<Vec<String>> {
        let out = self.run_ok(&["status", "--porcelain", "--untracked-files=all"]).await?;
        Ok(parse_porcelain(&out))
    }

    async fn diff_file(&self, path: &str) -> Result<String> {
        let tracked = self.run_ok(&["diff", "HEAD", "--", path]).await?;
        if !tracked.is_empty() {
            return Ok(tracked);
        }
        // Untracked files: `diff --no-index` exits 1 when the files differ
        if self.workdir.join(path).exists() {
            let out = self.run(&["diff", "--no-index", "--", "/dev/null", path]).await?;
            return Ok(out.stdout);
        }
        Ok(String::new())
    }

    async fn diff_all(&self) -> Result<String> {
        let mut all = String::new();
        for path in self.changed_files().await? {
            all.push_str(&self.diff_file(&path).await?);
        }
        Ok(all)
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.workdir.join(path)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(format!("Failed to read {}", path)),
        }
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let full = self.workdir.join(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content)
            .await
            .context(format!("Failed to write {}", path))
    }

    async fn discard_changes(&self) -> Result<()> {
        info!("Discarding uncommitted changes");
        self.run_ok(&["reset", "--hard", "HEAD"]).await?;
        self.run_ok(&["clean", "-fd"]).await?;
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        match tokio::fs::remove_file(self.workdir.join(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(format!("Failed to remove {}", path)),
        }
    }

    async fn stage(&self, paths: &[String]) -> Result<()> {
        let mut args = vec!["add", "-A"];
        if !paths.is_empty() {
            args.push("--");
            args.extend(paths.iter().map(|p| p.as_str()));
        }
        self.run_ok(&args).await?;
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<String> {
        info!(summary = %message.lines().next().unwrap_or(""), "Committing");
        self.run_ok(&["commit", "--no-verify", "-m", message]).await?;
        self.head_sha().await
    }

    async fn push(&self) -> Result<PushOutcome> {
        let refspec = format!("HEAD:{}", self.branch);
        let out = self.run(&["push", "origin", &refspec]).await?;
        if out.success {
            info!(branch = %self.branch, "Pushed");
            return Ok(PushOutcome::Pushed);
        }
        let stderr = out.stderr.to_lowercase();
        if stderr.contains("rejected") || stderr.contains("non-fast-forward") || stderr.contains("fetch first") {
            warn!(branch = %self.branch, "Push rejected");
            return Ok(PushOutcome::Rejected(out.stderr.trim().to_string()));
        }
        bail!("git push failed: {}", out.stderr.trim())
    }

    async fn pull_rebase(&self) -> Result<bool> {
        let out = self.run(&["pull", "--rebase", "origin", &self.branch]).await?;
        if out.success {
            return Ok(true);
        }
        if self.rebase_in_progress() {
            warn!("Rebase hit conflicts, aborting it");
            self.run_ok(&["rebase", "--abort"]).await?;
            return Ok(false);
        }
        bail!("git pull --rebase failed: {}", out.stderr.trim())
    }

    async fn merge_branch(&self, branch: &str) -> Result<MergeOutcome> {
        info!(%branch, "Merging into checkout");
        self.run_ok(&["fetch", "origin", branch]).await?;
        let target = format!("origin/{}", branch);
        let out = self.run(&["merge", "--no-edit", &target]).await?;
        if out.success {
            return Ok(MergeOutcome::Clean);
        }
        let conflicts = self.conflicted_paths().await?;
        if conflicts.is_empty() {
            bail!("git merge {} failed: {}", target, out.stderr.trim());
        }
        Ok(MergeOutcome::Conflicts(conflicts))
    }

    async fn is_merging(&self) -> Result<bool> {
        Ok(self.run(&["rev-parse", "-q", "--verify", "MERGE_HEAD"]).await?.success)
    }

    async fn abort_merge(&self) -> Result<()> {
        self.run_ok(&["merge", "--abort"]).await?;
        Ok(())
    }

    async fn conflicted_paths(&self) -> Result<Vec<String>> {
        let out = self.run_ok(&["diff", "--name-only", "--diff-filter=U"]).await?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(String::from).collect())
    }

    async fn reset_to_remote(&self) -> Result<()> {
        warn!(branch = %self.branch, "Resetting checkout to remote branch");
        self.run_ok(&["fetch", "origin", &self.branch]).await?;
        self.run_ok(&["reset", "--hard", &self.remote_branch()]).await?;
        Ok(())
    }

    async fn commit_messages_since(&self, base: &str) -> Result<Vec<String>> {
        let range = format!("origin/{}..HEAD", base);
        let out = self.run(&["log", "--format=%B%x00", &range]).await?;
        if !out.success {
            warn!(%range, "Could not read branch history");
            return Ok(vec![]);
        }
        Ok(out
            .stdout
            .split('\0')
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect())
    }
}
