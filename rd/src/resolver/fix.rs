//! Fix attempts, verification of their edits, and the failure path

use std::collections::BTreeMap;

use eyre::Result;
use sessionstore::LessonScope;
use tracing::{debug, error, info, warn};

use crate::domain::{DismissalCategory, VerificationResult, excerpt, now_ms};
use crate::oracle::{IssueContext, ModelHistory, Parsed};
use crate::session::{AttemptOutcome, ExitReason, Phase};
use crate::stalemate::BailOutRecord;

use super::Resolver;
use super::report::remaining_issues;

/// How many issues one attempt targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMode {
    /// Every unresolved issue
    Batch,
    /// Only the first unresolved issue
    Single,
}

impl FocusMode {
    /// After an odd number of consecutive failures with several issues open,
    /// the same tool and model retries on a single issue
    pub fn for_attempt(consecutive_failures: u32, unresolved: usize) -> Self {
        if consecutive_failures % 2 == 1 && unresolved > 1 {
            FocusMode::Single
        } else {
            FocusMode::Batch
        }
    }
}

impl Resolver {
    /// One agent run plus verification; `Some` ends the loop
    pub(super) async fn fix_attempt(&mut self) -> Result<Option<ExitReason>> {
        self.state_mut().iteration += 1;
        self.set_phase(Phase::Fixing)?;

        let Some((agent, tool, model)) = self.current_agent() else {
            warn!("Rotation points at no available agent");
            return Ok(Some(ExitReason::NoAgents));
        };

        let unresolved = self.state().unresolved_ids();
        let focus = FocusMode::for_attempt(self.state().counters.consecutive_failures, unresolved.len());
        let targets: Vec<String> = match focus {
            FocusMode::Single => unresolved.into_iter().take(1).collect(),
            FocusMode::Batch => unresolved,
        };

        let prompt = self.fix_prompt(&targets, focus).await?;
        info!(
            iteration = self.state().iteration,
            %tool,
            model = model.as_deref().unwrap_or("default"),
            ?focus,
            targets = targets.len(),
            "Running fix attempt"
        );
        let run = agent.run(self.vcs.workdir(), &prompt, model.as_deref()).await;

        if run.is_fatal() {
            error!(
                %tool,
                kind = ?run.error_kind,
                error = run.error.as_deref().unwrap_or(""),
                "Editing agent failed fatally"
            );
            self.state_mut().record_attempt(&tool, model.as_deref(), AttemptOutcome::Error);
            self.save()?;
            return Ok(Some(ExitReason::FatalToolError));
        }

        let changed = self.vcs.changed_files().await?;
        if changed.is_empty() {
            if run.success {
                info!(%tool, "Agent made no changes");
                self.state_mut().record_attempt(&tool, model.as_deref(), AttemptOutcome::NoChange);
                if let Some(explanation) = run.explanation() {
                    let text = format!("{} made no change and said: {}", tool, excerpt(explanation, 300));
                    for id in &targets {
                        if let Some(issue) = self.issue(id) {
                            self.learn(LessonScope::File(issue.path.clone()), &text, Some(id));
                        }
                    }
                }
            } else {
                warn!(%tool, error = run.error.as_deref().unwrap_or(""), "Agent run failed");
                self.state_mut().record_attempt(&tool, model.as_deref(), AttemptOutcome::Error);
            }
            return self.after_failure().await;
        }

        self.set_phase(Phase::Verifying)?;
        let resolved = self.verify_targets(&targets, &changed).await?;
        if resolved.is_empty() {
            info!(%tool, "No fix was verified, discarding changes");
            self.state_mut().record_attempt(&tool, model.as_deref(), AttemptOutcome::Failed);
            self.vcs.discard_changes().await?;
            return self.after_failure().await;
        }

        let fixed = resolved.len() as u32;
        info!(%tool, fixed, remaining = self.state().unresolved().len(), "Fix attempt verified");
        self.state_mut()
            .record_attempt(&tool, model.as_deref(), AttemptOutcome::Fixed(fixed));
        self.state_mut().counters.record_fix(fixed);
        self.breaker.reset();
        self.save()?;
        self.land_fixes(&resolved).await
    }

    async fn fix_prompt(&self, targets: &[String], focus: FocusMode) -> Result<String> {
        let mut issues = Vec::with_capacity(targets.len());
        let mut paths = Vec::new();
        for id in targets {
            if let Some(issue) = self.issue(id) {
                if !paths.contains(&issue.path) {
                    paths.push(issue.path.clone());
                }
                issues.push(self.issue_context(&issue).await?);
            }
        }
        let lessons = self.session.lessons_for(&paths);
        self.oracle.prompts().render(
            "fix-issues",
            &serde_json::json!({
                "pr_title": self.pr_info.title,
                "branch": self.state().branch,
                "single": focus == FocusMode::Single,
                "issues": issues,
                "lessons": lessons,
            }),
        )
    }

    /// Ask the oracle whether the working-tree edits fixed each target
    ///
    /// Returns the ids that left the unresolved set.
    pub(super) async fn verify_targets(&mut self, targets: &[String], changed: &[String]) -> Result<Vec<String>> {
        debug!(targets = targets.len(), changed = changed.len(), "Resolver::verify_targets: called");
        let mut contexts = Vec::with_capacity(targets.len());
        for id in targets {
            let Some(issue) = self.issue(id) else {
                continue;
            };
            let diff = if changed.contains(&issue.path) {
                self.vcs.diff_file(&issue.path).await?
            } else {
                String::new()
            };
            contexts.push(self.issue_context(&issue).await?.with_diff(diff));
        }

        let verdicts = self.ask_oracle(&contexts, true).await;
        let iteration = self.state().iteration;
        let mut resolved = Vec::new();

        for ctx in &contexts {
            match verdicts.get(&ctx.id).cloned().unwrap_or(Parsed::Unparsed) {
                Parsed::Parsed(v) if v.yes => {
                    if changed.contains(&ctx.path) {
                        self.state_mut().mark_verified_fixed(&ctx.id, &v.explanation);
                        resolved.push(ctx.id.clone());
                    } else {
                        match self
                            .state_mut()
                            .add_dismissed(&ctx.id, &v.explanation, DismissalCategory::FileUnchanged)
                        {
                            Ok(()) => resolved.push(ctx.id.clone()),
                            Err(e) => warn!(id = %ctx.id, error = %e, "Fixed without touching its file but no usable reason"),
                        }
                    }
                }
                Parsed::Parsed(v) => {
                    info!(id = %ctx.id, "Fix not verified");
                    self.state_mut().record_verification(VerificationResult {
                        issue_id: ctx.id.clone(),
                        passed: false,
                        reason: v.explanation.clone(),
                        iteration,
                    });
                    if !v.explanation.trim().is_empty() {
                        let text = format!(
                            "A change to {} did not resolve {}: {}",
                            ctx.path,
                            ctx.id,
                            excerpt(&v.explanation, 300)
                        );
                        self.learn(LessonScope::File(ctx.path.clone()), &text, Some(&ctx.id));
                    }
                }
                Parsed::Unparsed => debug!(id = %ctx.id, "No verification answer, issue stays open"),
            }
        }
        self.save()?;
        Ok(resolved)
    }

    /// Count the failure, then retry, rotate or bail out
    async fn after_failure(&mut self) -> Result<Option<ExitReason>> {
        self.state_mut().counters.record_failure();
        if self.breaker.record_failure() {
            error!("Too many failures in a short window, stopping");
            self.save()?;
            return Ok(Some(ExitReason::RapidFailure));
        }

        let consecutive = self.state().counters.consecutive_failures;
        let unresolved = self.state().unresolved().len();
        if FocusMode::for_attempt(consecutive, unresolved) == FocusMode::Single {
            info!(consecutive, "Retrying the same model on a single issue");
            self.save()?;
            return Ok(None);
        }

        if self.config.resolver.recommend_models && self.state().rotation.wants_recommendation() {
            self.ask_recommendations().await?;
        }

        let cap = self.config.resolver.models_per_tool_round;
        let step = self.state_mut().rotation.advance(cap);
        debug!(%step, "Resolver::after_failure: rotated");
        self.save()?;

        if step == crate::rotation::RotationStep::Exhausted {
            return Ok(Some(ExitReason::NoAgents));
        }

        let max_stale = self.config.resolver.max_stale_cycles;
        if step.completes_round() && self.state_mut().counters.complete_cycle(max_stale) {
            if self.config.resolver.direct_fix_on_bail_out
                && let Some(resolved) = self.direct_fix().await?
            {
                return self.land_fixes(&resolved).await;
            }
            return self.bail_out();
        }
        self.save()?;
        Ok(None)
    }

    async fn ask_recommendations(&mut self) -> Result<()> {
        let candidates = self.state().rotation.candidates();
        if candidates.len() < 2 {
            return Ok(());
        }
        let issues: Vec<IssueContext> = self.state().unresolved().into_iter().map(IssueContext::new).collect();
        let history: Vec<ModelHistory> = self
            .state()
            .performance
            .iter()
            .map(|(key, stats)| {
                let (tool, model) = key.split_once(':').unwrap_or((key.as_str(), "default"));
                ModelHistory {
                    tool: tool.to_string(),
                    model: model.to_string(),
                    attempts: stats.attempts,
                    fixes: stats.fixes,
                    failures: stats.failures + stats.no_changes + stats.errors,
                }
            })
            .collect();

        let ranked = match self.oracle.recommend_models(&issues, &history, &candidates).await {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!(error = %e, "Model recommendation failed, rotating blindly");
                vec![]
            }
        };
        info!(?ranked, "Model recommendation");
        self.state_mut().rotation.set_recommendations(ranked);
        Ok(())
    }

    /// Last resort before bail-out: the oracle rewrites each file itself
    ///
    /// Returns the resolved ids, or `None` when nothing was fixed.
    async fn direct_fix(&mut self) -> Result<Option<Vec<String>>> {
        info!("Trying a direct oracle fix before bailing out");
        let mut by_path: BTreeMap<String, Vec<IssueContext>> = BTreeMap::new();
        for issue in self.state().unresolved() {
            by_path
                .entry(issue.path.clone())
                .or_default()
                .push(IssueContext::new(issue));
        }

        let mut targets = Vec::new();
        for (path, issues) in &by_path {
            let Some(content) = self.vcs.read_file(path).await? else {
                continue;
            };
            match self.oracle.direct_fix(path, &content, issues).await {
                Ok(Some(rewritten)) => {
                    self.vcs.write_file(path, &rewritten).await?;
                    targets.extend(issues.iter().map(|i| i.id.clone()));
                }
                Ok(None) => debug!(%path, "Resolver::direct_fix: no usable rewrite"),
                Err(e) => warn!(%path, error = %e, "Direct fix failed"),
            }
        }

        let changed = self.vcs.changed_files().await?;
        if targets.is_empty() || changed.is_empty() {
            return Ok(None);
        }

        self.set_phase(Phase::Verifying)?;
        let resolved = self.verify_targets(&targets, &changed).await?;
        if resolved.is_empty() {
            self.state_mut().record_attempt("oracle", Some("direct"), AttemptOutcome::Failed);
            self.vcs.discard_changes().await?;
            return Ok(None);
        }

        let fixed = resolved.len() as u32;
        info!(fixed, "Direct fix verified");
        self.state_mut()
            .record_attempt("oracle", Some("direct"), AttemptOutcome::Fixed(fixed));
        self.state_mut().counters.record_fix(fixed);
        self.breaker.reset();
        self.save()?;
        Ok(Some(resolved))
    }

    fn bail_out(&mut self) -> Result<Option<ExitReason>> {
        let state = self.state();
        let record = BailOutRecord {
            cycles_completed: state.counters.no_progress_cycles,
            fixed_count: state.verified_count(),
            remaining: remaining_issues(state),
            exhausted: state.performance.keys().cloned().collect(),
            iteration: state.iteration,
            at: now_ms(),
        };
        warn!(
            cycles = record.cycles_completed,
            remaining = record.remaining.len(),
            "Bailing out, no progress across rotation cycles"
        );
        self.state_mut().record_bail_out(record);
        self.save()?;
        Ok(Some(ExitReason::BailOut))
    }

    /// Commit verified work, or stop here in no-commit mode
    pub(super) async fn land_fixes(&mut self, resolved: &[String]) -> Result<Option<ExitReason>> {
        if self.options.no_commit {
            info!(fixed = resolved.len(), "Leaving verified changes uncommitted");
            return Ok(Some(ExitReason::ChangesUncommitted));
        }
        self.commit_and_push(resolved).await?;
        Ok(None)
    }
}
