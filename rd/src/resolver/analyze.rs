//! Existence checks, the final audit and recovery of leftover edits

use eyre::Result;
use tracing::{debug, info, warn};

use crate::domain::{DismissalCategory, IssueStatus, VerificationResult};
use crate::oracle::{IssueContext, Parsed, apply_audit_rule, is_valid_dismissal_reason};
use crate::session::{ExitReason, Phase};

use super::Resolver;

impl Resolver {
    /// Ask whether each unanalyzed, stale or (once) re-verified issue still exists
    pub(super) async fn analyze(&mut self) -> Result<()> {
        let state = self.state();
        let expiry = self.config.resolver.verification_expiry;
        let mut to_check: Vec<String> = state
            .issues
            .values()
            .filter(|i| i.is_unresolved() && !state.commit_cache.analyzed.contains(&i.id))
            .map(|i| i.id.clone())
            .collect();
        for id in state.stale_verified(expiry) {
            info!(%id, "Verification expired, re-checking");
            to_check.push(id);
        }
        if self.reverify_pending {
            for issue in state.issues.values().filter(|i| !i.is_unresolved()) {
                if !to_check.contains(&issue.id) {
                    to_check.push(issue.id.clone());
                }
            }
        }
        self.reverify_pending = false;

        if to_check.is_empty() {
            debug!("Resolver::analyze: nothing to check");
            return Ok(());
        }
        self.set_phase(Phase::Analyzing)?;
        info!(count = to_check.len(), "Checking which issues still exist");

        let mut contexts = Vec::new();
        for id in &to_check {
            let Some(issue) = self.issue(id) else {
                continue;
            };
            match self.vcs.read_file(&issue.path).await? {
                Some(content) => {
                    contexts.push(IssueContext::new(&issue).with_snippet(crate::oracle::code_snippet(&content, issue.line)))
                }
                None if issue.is_unresolved() => {
                    let reason = format!("The file {} no longer exists in the pull request branch", issue.path);
                    if let Err(e) = self.state_mut().add_dismissed(id, &reason, DismissalCategory::FileRemoved) {
                        warn!(%id, error = %e, "Could not dismiss issue on a removed file");
                    }
                    self.state_mut().commit_cache.analyzed.insert(id.clone());
                }
                None => debug!(%id, "Resolver::analyze: file gone, keeping resolved status"),
            }
        }

        let verdicts = self.ask_oracle(&contexts, false).await;
        for ctx in &contexts {
            let verdict = verdicts.get(&ctx.id).cloned().unwrap_or(Parsed::Unparsed);
            self.apply_existence(&ctx.id, verdict);
        }
        self.save()
    }

    /// Fold one existence verdict into the issue's status
    fn apply_existence(&mut self, id: &str, verdict: Parsed<crate::oracle::Verdict>) {
        let Some(issue) = self.issue(id) else {
            return;
        };
        let parsed = verdict.is_parsed();
        match (verdict, issue.status) {
            (Parsed::Parsed(v), _) if v.yes => {
                debug!(%id, "Issue still exists");
                self.state_mut().reopen(id);
            }
            (Parsed::Parsed(v), IssueStatus::Unresolved) => {
                let category = if issue.outdated {
                    DismissalCategory::Outdated
                } else {
                    DismissalCategory::AlreadyFixed
                };
                if let Err(e) = self.state_mut().add_dismissed(id, &v.explanation, category) {
                    warn!(%id, error = %e, "Oracle said the issue is gone but gave no usable reason, keeping it open");
                }
            }
            (Parsed::Parsed(v), IssueStatus::VerifiedFixed { .. }) => {
                if is_valid_dismissal_reason(&v.explanation) {
                    self.state_mut().mark_verified_fixed(id, &v.explanation);
                } else {
                    warn!(%id, "Stale verification confirmed without a usable reason, reopening");
                    self.state_mut().reopen(id);
                }
            }
            (Parsed::Parsed(_), IssueStatus::Dismissed) => debug!(%id, "Dismissal confirmed"),
            (Parsed::Unparsed, IssueStatus::Unresolved) => debug!(%id, "No answer, issue stays open"),
            (Parsed::Unparsed, _) => {
                warn!(%id, "No answer on re-check, reopening");
                self.state_mut().reopen(id);
            }
        }
        if parsed {
            self.state_mut().commit_cache.analyzed.insert(id.to_string());
        }
    }

    /// Adversarial re-check of every reported issue; true when all pass
    pub(super) async fn audit(&mut self) -> Result<bool> {
        self.set_phase(Phase::Auditing)?;
        let issues: Vec<_> = self.state().issues.values().cloned().collect();
        let mut contexts = Vec::with_capacity(issues.len());
        for issue in &issues {
            contexts.push(self.issue_context(issue).await?);
        }

        let report = self.oracle.audit(&contexts).await?;
        let state = self.state();
        let decisions = apply_audit_rule(&report, |id| state.issues.get(id).is_some_and(|i| !i.is_unresolved()));
        let mut failed: Vec<String> = decisions
            .into_iter()
            .filter(|(_, passed)| !passed)
            .map(|(id, _)| id)
            .collect();
        failed.sort();

        if failed.is_empty() {
            info!(count = contexts.len(), "Final audit passed");
            return Ok(true);
        }

        warn!(?failed, parse_rate = report.parse_rate, "Final audit rejected issues");
        let iteration = self.state().iteration;
        for id in &failed {
            let reason = match report.results.get(id) {
                Some(Parsed::Parsed(v)) => v.explanation.clone(),
                _ => "audit gave no answer".to_string(),
            };
            let state = self.state_mut();
            state.reopen(id);
            state.commit_cache.analyzed.insert(id.clone());
            state.record_verification(VerificationResult {
                issue_id: id.clone(),
                passed: false,
                reason,
                iteration,
            });
        }
        self.save()?;
        Ok(false)
    }

    /// Verify edits left in the working tree by an interrupted run
    ///
    /// Changes that fix something are landed; anything else is discarded so
    /// the next attempt starts clean.
    pub(super) async fn verify_pending_changes(&mut self) -> Result<Option<ExitReason>> {
        if self.options.dry_run {
            return Ok(None);
        }
        if self.vcs.is_merging().await? {
            warn!("Found an unfinished merge, aborting it");
            self.vcs.abort_merge().await?;
            return Ok(None);
        }
        let changed = self.vcs.changed_files().await?;
        if changed.is_empty() {
            return Ok(None);
        }

        info!(files = changed.len(), "Found uncommitted changes from an earlier run, verifying them");
        let targets: Vec<String> = self
            .state()
            .unresolved()
            .into_iter()
            .filter(|i| changed.contains(&i.path))
            .map(|i| i.id.clone())
            .collect();
        let resolved = if targets.is_empty() {
            vec![]
        } else {
            self.set_phase(Phase::Verifying)?;
            self.verify_targets(&targets, &changed).await?
        };

        if resolved.is_empty() {
            info!("Leftover changes fix nothing, discarding them");
            self.vcs.discard_changes().await?;
            return Ok(None);
        }
        self.state_mut().counters.record_fix(resolved.len() as u32);
        self.save()?;
        self.land_fixes(&resolved).await
    }
}
