//! The resolution loop
//!
//! [`Resolver`] drives one pull request through fetch, analyze, fix, verify
//! and commit until every issue is resolved or a terminal condition is hit.
//! All mutable loop memory lives in the [`Session`]; it is saved after every
//! phase change and every verification batch.

use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use sessionstore::LessonScope;
use tracing::{debug, info, warn};

use crate::agents::{Agent, AgentPool};
use crate::config::Config;
use crate::conflicts::Sandbox;
use crate::domain::{PrRef, ReviewIssue};
use crate::git::Vcs;
use crate::github::{PrInfo, ReviewHost};
use crate::oracle::{IssueContext, Oracle, Parsed, Verdict, code_snippet};
use crate::session::{ExitReason, Phase, Session, SessionState};

mod analyze;
mod breaker;
mod fix;
mod publish;
pub mod report;
mod shutdown;

#[cfg(test)]
mod tests;

pub use breaker::FailureBreaker;
pub use fix::FocusMode;
pub use report::{RunSummary, render_dry_run, render_status, render_summary};
pub use shutdown::ShutdownSignal;

/// Switches that change what a run is allowed to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Fetch and analyze only
    pub dry_run: bool,
    /// Stop with verified changes left in the working tree
    pub no_commit: bool,
    /// Re-check verified and dismissed issues once at startup
    pub reverify: bool,
}

/// The outside world the loop talks to
pub struct Collaborators {
    pub host: Arc<dyn ReviewHost>,
    pub vcs: Arc<dyn Vcs>,
    pub oracle: Arc<Oracle>,
    pub agents: AgentPool,
}

/// Review-comment resolution loop for one pull request
///
/// The checkout behind `vcs` must already be prepared.
pub struct Resolver {
    pr: PrRef,
    pr_info: PrInfo,
    config: Config,
    options: RunOptions,
    host: Arc<dyn ReviewHost>,
    vcs: Arc<dyn Vcs>,
    oracle: Arc<Oracle>,
    agents: AgentPool,
    session: Session,
    sandbox: Sandbox,
    breaker: FailureBreaker,
    shutdown: ShutdownSignal,
    reverify_pending: bool,
    push_backoff: Duration,
}

impl Resolver {
    pub fn new(pr: PrRef, pr_info: PrInfo, config: Config, session: Session, parts: Collaborators) -> Self {
        debug!(%pr, "Resolver::new: called");
        let sandbox = Sandbox::new(
            config
                .conflicts
                .base_dir
                .clone()
                .unwrap_or_else(|| config.resolver.workdir_root.clone()),
            Duration::from_secs(config.conflicts.regen_timeout_secs),
            Duration::from_secs(config.conflicts.grace_period_secs),
        );
        let breaker = FailureBreaker::new(
            Duration::from_secs(config.resolver.breaker_window_secs),
            config.resolver.breaker_max_failures,
        );
        Self {
            pr,
            pr_info,
            config,
            options: RunOptions::default(),
            host: parts.host,
            vcs: parts.vcs,
            oracle: parts.oracle,
            agents: parts.agents,
            session,
            sandbox,
            breaker,
            shutdown: ShutdownSignal::new(),
            reverify_pending: false,
            push_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.reverify_pending = options.reverify;
        self.options = options;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Base delay between push retries
    pub fn with_push_backoff(mut self, backoff: Duration) -> Self {
        self.push_backoff = backoff;
        self
    }

    pub fn state(&self) -> &SessionState {
        self.session.state()
    }

    fn state_mut(&mut self) -> &mut SessionState {
        self.session.state_mut()
    }

    fn save(&self) -> Result<()> {
        self.session.save()
    }

    fn set_phase(&mut self, phase: Phase) -> Result<()> {
        if self.state().phase != phase {
            info!(%phase, "Entering phase");
        }
        self.state_mut().set_phase(phase);
        self.save()
    }

    /// Run until a terminal condition; the session is saved on every exit path
    pub async fn run(&mut self) -> Result<RunSummary> {
        info!(pr = %self.pr, resumed = self.session.resumed(), "Starting resolution loop");
        let reason = match self.run_loop().await {
            Ok(reason) => reason,
            Err(e) => {
                warn!(error = %e, "Resolution loop failed, saving session");
                if let Err(save_err) = self.save() {
                    warn!(error = %save_err, "Could not save session after failure");
                }
                return Err(e);
            }
        };
        self.finish(reason).await
    }

    async fn finish(&mut self, reason: ExitReason) -> Result<RunSummary> {
        self.state_mut().set_exit(reason);
        self.save()?;
        let summary = RunSummary::from_state(self.state(), reason);

        if reason == ExitReason::AllFixed && self.config.resolver.post_summary && !self.options.dry_run {
            let body = report::summary_comment(&summary, self.state());
            if let Err(e) = self.host.post_issue_comment(&self.pr, &body).await {
                warn!(error = %e, "Could not post summary comment");
            }
        }
        Ok(summary)
    }

    async fn run_loop(&mut self) -> Result<ExitReason> {
        self.set_phase(Phase::Init)?;
        let head = self.vcs.head_sha().await?;
        self.state_mut().set_head(&head);
        self.sync_rotation();
        self.save()?;

        if self.pr_info.mergeable == Some(false) && !self.options.dry_run && !self.options.no_commit {
            self.sync_with_base().await?;
        }

        let mut first_pass = true;
        loop {
            if self.shutdown.is_triggered() {
                return Ok(ExitReason::Interrupted);
            }

            self.fetch_comments().await?;
            if first_pass && !self.session.resumed() {
                self.recover_from_history().await?;
            }
            if self.state().issues.is_empty() {
                info!("No review comments to resolve");
                return Ok(ExitReason::NoComments);
            }

            // Leftover edits are judged before the existence check sees them
            if first_pass {
                first_pass = false;
                if let Some(reason) = self.verify_pending_changes().await? {
                    return Ok(reason);
                }
            }

            self.analyze().await?;

            if self.options.dry_run {
                println!("{}", render_dry_run(&self.state().unresolved()));
                return Ok(ExitReason::DryRun);
            }

            if self.state().unresolved().is_empty() {
                if self.audit().await? {
                    return Ok(ExitReason::AllFixed);
                }
                continue;
            }

            if self.shutdown.is_triggered() {
                return Ok(ExitReason::Interrupted);
            }
            if self.state().iteration >= self.config.resolver.max_fix_iterations {
                info!(iterations = self.state().iteration, "Reached the fix iteration limit");
                return Ok(ExitReason::MaxIterations);
            }
            if self.agents.is_empty() {
                warn!("No editing agents available");
                return Ok(ExitReason::NoAgents);
            }

            if let Some(reason) = self.fix_attempt().await? {
                return Ok(reason);
            }
        }
    }

    /// Fetch review comments and fold them into the session
    async fn fetch_comments(&mut self) -> Result<()> {
        self.set_phase(Phase::Fetching)?;
        let fetched = self.host.review_comments(&self.pr).await?;
        let count = fetched.len();
        let added = self.state_mut().merge_fetched(fetched);
        info!(fetched = count, new = added, "Fetched review comments");
        self.save()
    }

    /// Restore verified ids recorded in commit trailers into a fresh session
    ///
    /// A resumed session already knows which trailer ids were later reopened.
    async fn recover_from_history(&mut self) -> Result<()> {
        let base = self.state().base_branch.clone();
        let messages = match self.vcs.commit_messages_since(&base).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "Could not read branch history for recovery");
                return Ok(());
            }
        };
        let restored = crate::session::restore_from_history(self.state_mut(), &messages);
        if !restored.is_empty() {
            info!(?restored, "Restored verified issues from commit trailers");
            self.save()?;
        }
        Ok(())
    }

    /// Mirror detected agents into the rotation and apply the preferred model
    fn sync_rotation(&mut self) {
        let available: Vec<(String, Vec<String>)> = self
            .agents
            .iter()
            .map(|a| (a.name().to_string(), a.models().to_vec()))
            .collect();
        let preferred_tool = self.config.agents.preferred_tool.clone();
        let preferred_model = self.config.agents.preferred_model.clone();
        let resumed = self.session.resumed();

        let rotation = &mut self.state_mut().rotation;
        rotation.sync_tools(&available);
        if !resumed
            && let Some(tool) = preferred_tool
            && let Some(idx) = rotation.tools.iter().position(|t| t.name == tool)
        {
            rotation.current_tool = idx;
        }
        if let Some(model) = preferred_model
            && !rotation.select_model(&model)
        {
            warn!(%model, "Preferred model is not offered by the current tool");
        }
    }

    /// Current tool and model, with the agent behind it
    fn current_agent(&self) -> Option<(Arc<dyn Agent>, String, Option<String>)> {
        let (tool, model) = self.state().rotation.current()?;
        let agent = self.agents.get(tool)?;
        Some((agent, tool.to_string(), model.map(String::from)))
    }

    /// Issue context with the current code around the comment
    async fn issue_context(&self, issue: &ReviewIssue) -> Result<IssueContext> {
        let snippet = match self.vcs.read_file(&issue.path).await? {
            Some(content) => code_snippet(&content, issue.line),
            None => format!("(file {} does not exist)", issue.path),
        };
        Ok(IssueContext::new(issue).with_snippet(snippet))
    }

    fn issue(&self, id: &str) -> Option<ReviewIssue> {
        self.state().issues.get(id).cloned()
    }

    /// Append a lesson; journal failures only warn
    fn learn(&self, scope: LessonScope, text: &str, issue_id: Option<&str>) {
        if let Err(e) = self.session.add_lesson(scope, text, issue_id) {
            warn!(error = %e, "Could not record lesson");
        }
    }

    /// Verdicts for `items` from one batch call or one call per issue
    ///
    /// Oracle transport errors become unparsed answers so callers apply the
    /// fail-safe default.
    async fn ask_oracle(&self, items: &[IssueContext], verify: bool) -> std::collections::HashMap<String, Parsed<Verdict>> {
        debug!(count = items.len(), verify, "Resolver::ask_oracle: called");
        let mut results = std::collections::HashMap::new();
        if self.config.resolver.batch_verify {
            let reply = if verify {
                self.oracle.batch_verify_fixes(items).await
            } else {
                self.oracle.batch_check_issues(items).await
            };
            match reply {
                Ok(r) => results = r,
                Err(e) => warn!(error = %e, "Oracle call failed, treating answers as unparsed"),
            }
        } else {
            for item in items {
                let id = item.id.clone();
                let reply = if verify {
                    self.oracle.verify_fix(item.clone()).await
                } else {
                    self.oracle.check_issue_exists(item.clone()).await
                };
                match reply {
                    Ok(v) => {
                        results.insert(id, v);
                    }
                    Err(e) => warn!(%id, error = %e, "Oracle call failed, treating answer as unparsed"),
                }
            }
        }
        for item in items {
            results.entry(item.id.clone()).or_insert(Parsed::Unparsed);
        }
        results
    }
}
