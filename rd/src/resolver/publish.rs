//! Committing, pushing, base-branch sync and the bot-review wait

use std::time::Duration;

use eyre::Result;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::conflicts::{ConflictOutcome, ConflictResolver};
use crate::git::{MergeOutcome, PushOutcome};
use crate::oracle::IssueContext;
use crate::session::{Phase, review_trailer};

use super::Resolver;

/// Largest diff sent for commit message generation
const MAX_DIFF_CHARS: usize = 20_000;

const FALLBACK_SUBJECT: &str = "fix: address review comments";

impl Resolver {
    /// Commit the working tree for `fixed`, then push and wait for bots
    pub(super) async fn commit_and_push(&mut self, fixed: &[String]) -> Result<()> {
        self.set_phase(Phase::Committing)?;
        let message = self.commit_message(fixed).await?;
        self.vcs.stage(&[]).await?;
        let sha = self.vcs.commit(&message).await?;
        info!(%sha, fixed = fixed.len(), "Committed fixes");
        self.state_mut().set_head(&sha);
        self.save()?;

        if !self.config.resolver.auto_push {
            debug!("Resolver::commit_and_push: auto-push disabled");
            return Ok(());
        }
        if self.push_with_retry(fixed).await? {
            self.wait_for_bots().await?;
        }
        Ok(())
    }

    async fn commit_message(&self, fixed: &[String]) -> Result<String> {
        let issues: Vec<IssueContext> = fixed
            .iter()
            .filter_map(|id| self.state().issues.get(id))
            .map(IssueContext::new)
            .collect();
        let diff: String = self.vcs.diff_all().await?.chars().take(MAX_DIFF_CHARS).collect();
        let body = match self.oracle.generate_commit_message(&issues, &diff).await {
            Ok(Some(message)) => message,
            Ok(None) => fallback_message(fixed),
            Err(e) => {
                warn!(error = %e, "Commit message generation failed, using fallback");
                fallback_message(fixed)
            }
        };
        Ok(format!("{}\n\n{}\n", body.trim_end(), review_trailer(fixed)))
    }

    /// Push, integrating remote changes on rejection; true once pushed
    ///
    /// When the remote cannot be integrated the branch is reset to the
    /// remote and `fixed` is reopened, so fixing continues from a clean tree.
    pub(super) async fn push_with_retry(&mut self, fixed: &[String]) -> Result<bool> {
        let retries = self.config.resolver.push_retries.max(1);
        for attempt in 0..retries {
            match self.vcs.push().await? {
                PushOutcome::Pushed => {
                    info!(attempt, "Pushed");
                    return Ok(true);
                }
                PushOutcome::Rejected(reason) if attempt + 1 == retries => {
                    warn!(attempt, %reason, "Push rejected on the last attempt");
                }
                PushOutcome::Rejected(reason) => {
                    warn!(attempt, %reason, "Push rejected, integrating remote changes");
                    if !self.vcs.pull_rebase().await? && !self.merge_remote_branch().await? {
                        self.recover_clean_branch(fixed).await?;
                        return Ok(false);
                    }
                    let head = self.vcs.head_sha().await?;
                    self.state_mut().set_head(&head);
                    self.save()?;
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
            }
        }
        warn!(retries, "Giving up on push, changes stay committed locally");
        Ok(false)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let jitter = rand::rng().random_range(0..250u64);
        self.push_backoff * 2u32.saturating_pow(attempt) + Duration::from_millis(jitter)
    }

    /// Merge the remote PR branch after a failed rebase
    async fn merge_remote_branch(&mut self) -> Result<bool> {
        let branch = self.state().branch.clone();
        match self.vcs.merge_branch(&branch).await? {
            MergeOutcome::Clean => Ok(true),
            MergeOutcome::Conflicts(paths) => {
                let message = format!("Merge remote-tracking branch 'origin/{}'", branch);
                self.resolve_conflicts(&paths, &branch, &message).await
            }
        }
    }

    /// Abort any merge, reset to the remote branch and reopen `fixed`
    async fn recover_clean_branch(&mut self, fixed: &[String]) -> Result<()> {
        warn!("Could not integrate remote changes, resetting to the remote branch");
        if self.vcs.is_merging().await? {
            self.vcs.abort_merge().await?;
        }
        self.vcs.reset_to_remote().await?;
        let head = self.vcs.head_sha().await?;
        let state = self.state_mut();
        for id in fixed {
            state.reopen(id);
        }
        state.set_head(&head);
        self.save()
    }

    /// Hand conflicted paths to the conflict subsystem; true when committed
    async fn resolve_conflicts(&mut self, paths: &[String], merging: &str, message: &str) -> Result<bool> {
        self.set_phase(Phase::ResolvingConflicts)?;
        let outcome = {
            let mut resolver = ConflictResolver::new(
                self.vcs.as_ref(),
                &self.oracle,
                &self.sandbox,
                &self.config.conflicts.generated_patterns,
            );
            if let Some((agent, _, model)) = self.current_agent() {
                resolver = resolver.with_agent(agent, model);
            }
            resolver.resolve(paths, merging, message).await?
        };
        match outcome {
            ConflictOutcome::Resolved { commit } => {
                self.state_mut().set_head(&commit);
                self.save()?;
                Ok(true)
            }
            ConflictOutcome::Unresolved(left) => {
                warn!(?left, "Conflicts left unresolved");
                Ok(false)
            }
        }
    }

    /// Merge the base branch when the PR reports conflicts with it
    ///
    /// A failed resolution resets to the clean PR branch; fixing review
    /// comments continues either way.
    pub(super) async fn sync_with_base(&mut self) -> Result<()> {
        let base = self.state().base_branch.clone();
        let branch = self.state().branch.clone();
        info!(%base, "Pull request conflicts with its base, merging");
        match self.vcs.merge_branch(&base).await? {
            MergeOutcome::Clean => {}
            MergeOutcome::Conflicts(paths) => {
                let message = format!("Merge branch '{}' into {}", base, branch);
                if !self.resolve_conflicts(&paths, &base, &message).await? {
                    warn!(%base, "Base branch conflicts remain, continuing on the clean branch");
                    self.recover_clean_branch(&[]).await?;
                    return Ok(());
                }
            }
        }
        let head = self.vcs.head_sha().await?;
        self.state_mut().set_head(&head);
        self.save()?;
        if self.config.resolver.auto_push {
            self.push_with_retry(&[]).await?;
        }
        Ok(())
    }

    /// Give review bots time to react to a push
    ///
    /// Ends early on new review comments, completed checks or shutdown, and
    /// runs at most once per head commit.
    pub(super) async fn wait_for_bots(&mut self) -> Result<()> {
        let wait_secs = self.config.github.bot_wait_secs;
        if wait_secs == 0 || self.state().commit_cache.bot_wait_done {
            return Ok(());
        }
        self.set_phase(Phase::WaitingForBots)?;
        let poll = Duration::from_secs(self.config.github.bot_poll_secs.max(1));
        let deadline = Instant::now() + Duration::from_secs(wait_secs);
        let head = self.state().head_sha.clone();
        let shutdown = self.shutdown.clone();
        info!(wait_secs, "Waiting for bot reviews");

        loop {
            let now = Instant::now();
            if now >= deadline {
                info!("Bot wait finished");
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(poll.min(deadline - now)) => {}
                _ = shutdown.wait() => {
                    info!("Bot wait interrupted");
                    break;
                }
            }

            match self.host.review_comments(&self.pr).await {
                Ok(comments) if comments.iter().any(|c| !self.state().issues.contains_key(&c.id)) => {
                    info!("New review comments arrived");
                    break;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Polling review comments failed"),
            }
            match self.host.check_status(&self.pr, &head).await {
                Ok(status) if status.total > 0 && status.all_completed() => {
                    info!(failed = status.failed, "Checks completed");
                    break;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Polling check status failed"),
            }
        }

        self.state_mut().commit_cache.bot_wait_done = true;
        self.save()
    }
}

fn fallback_message(fixed: &[String]) -> String {
    format!("{}\n\nAddresses {}", FALLBACK_SUBJECT, fixed.join(", "))
}
