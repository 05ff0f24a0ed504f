//! The session aggregate

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

use crate::domain::{
    DismissalCategory, DismissalRecord, IssueStatus, PrRef, ReviewIssue, VerificationResult, now_ms,
};
use crate::oracle::dismissal::{DismissalError, validate_dismissal_reason};
use crate::rotation::RotationState;
use crate::stalemate::{BailOutRecord, CycleCounters};

/// Where the loop is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Init,
    Fetching,
    Analyzing,
    Fixing,
    Verifying,
    Committing,
    WaitingForBots,
    ResolvingConflicts,
    Auditing,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Init => "init",
            Phase::Fetching => "fetching",
            Phase::Analyzing => "analyzing",
            Phase::Fixing => "fixing",
            Phase::Verifying => "verifying",
            Phase::Committing => "committing",
            Phase::WaitingForBots => "waiting_for_bots",
            Phase::ResolvingConflicts => "resolving_conflicts",
            Phase::Auditing => "auditing",
            Phase::Done => "done",
        };
        write!(f, "{}", s)
    }
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    AllFixed,
    BailOut,
    MaxIterations,
    NoComments,
    DryRun,
    Interrupted,
    FatalToolError,
    RapidFailure,
    NoAgents,
    /// Verified changes left in the working tree without committing
    ChangesUncommitted,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::AllFixed => "all_fixed",
            ExitReason::BailOut => "bail_out",
            ExitReason::MaxIterations => "max_iterations",
            ExitReason::NoComments => "no_comments",
            ExitReason::DryRun => "dry_run",
            ExitReason::Interrupted => "interrupted",
            ExitReason::FatalToolError => "fatal_tool_error",
            ExitReason::RapidFailure => "rapid_failure",
            ExitReason::NoAgents => "no_agents",
            ExitReason::ChangesUncommitted => "changes_uncommitted",
        };
        write!(f, "{}", s)
    }
}

/// How one fix attempt ended, for performance stats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Fixed(u32),
    Failed,
    NoChange,
    Error,
}

/// Per `tool:model` attempt statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttemptStats {
    pub attempts: u32,
    pub fixes: u32,
    pub failures: u32,
    pub no_changes: u32,
    pub errors: u32,
}

/// Caches that only hold for one head commit
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommitCache {
    pub head_sha: String,
    pub bot_wait_done: bool,
    /// Issues already analyzed against this head
    pub analyzed: BTreeSet<String>,
}

/// Durable state of one resolution target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub branch: String,
    pub base_branch: String,
    pub head_sha: String,
    pub phase: Phase,
    /// Fix attempts made so far
    pub iteration: u32,
    pub issues: BTreeMap<String, ReviewIssue>,
    pub verification_log: Vec<VerificationResult>,
    pub dismissed: BTreeMap<String, DismissalRecord>,
    pub rotation: RotationState,
    pub counters: CycleCounters,
    pub bail_out: Option<BailOutRecord>,
    pub exit_reason: Option<ExitReason>,
    #[serde(default)]
    pub commit_cache: CommitCache,
    /// Keyed `tool:model`
    #[serde(default)]
    pub performance: BTreeMap<String, AttemptStats>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SessionState {
    pub fn new(pr: &PrRef, branch: &str, base_branch: &str, head_sha: &str) -> Self {
        let now = now_ms();
        Self {
            owner: pr.owner.clone(),
            repo: pr.repo.clone(),
            number: pr.number,
            branch: branch.to_string(),
            base_branch: base_branch.to_string(),
            head_sha: head_sha.to_string(),
            phase: Phase::Init,
            iteration: 0,
            issues: BTreeMap::new(),
            verification_log: vec![],
            dismissed: BTreeMap::new(),
            rotation: RotationState::default(),
            counters: CycleCounters::default(),
            bail_out: None,
            exit_reason: None,
            commit_cache: CommitCache {
                head_sha: head_sha.to_string(),
                ..Default::default()
            },
            performance: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn pr(&self) -> PrRef {
        PrRef::new(&self.owner, &self.repo, self.number)
    }

    pub fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "SessionState::set_phase: called");
            self.phase = phase;
        }
    }

    /// Track a new head commit; commit-scoped caches are dropped when it changes
    pub fn set_head(&mut self, sha: &str) {
        if self.head_sha != sha {
            debug!(old = %self.head_sha, new = %sha, "SessionState::set_head: head changed");
            self.head_sha = sha.to_string();
        }
        if self.commit_cache.head_sha != sha {
            self.commit_cache = CommitCache {
                head_sha: sha.to_string(),
                ..Default::default()
            };
        }
    }

    /// Merge a fresh fetch, returning how many issues are new
    pub fn merge_fetched(&mut self, fetched: Vec<ReviewIssue>) -> usize {
        let mut added = 0;
        for issue in fetched {
            match self.issues.get_mut(&issue.id) {
                Some(existing) => {
                    if existing.body != issue.body {
                        self.commit_cache.analyzed.remove(&issue.id);
                    }
                    existing.refresh_from(&issue);
                }
                None => {
                    added += 1;
                    self.issues.insert(issue.id.clone(), issue);
                }
            }
        }
        debug!(added, total = self.issues.len(), "SessionState::merge_fetched: called");
        added
    }

    pub fn unresolved(&self) -> Vec<&ReviewIssue> {
        self.issues.values().filter(|i| i.is_unresolved()).collect()
    }

    pub fn unresolved_ids(&self) -> Vec<String> {
        self.unresolved().into_iter().map(|i| i.id.clone()).collect()
    }

    pub fn verified_count(&self) -> usize {
        self.issues.values().filter(|i| i.is_verified()).count()
    }

    /// Verified issues whose verification is older than `expiry` iterations
    pub fn stale_verified(&self, expiry: u32) -> Vec<String> {
        self.issues
            .values()
            .filter(|i| i.verification_expired(self.iteration, expiry))
            .map(|i| i.id.clone())
            .collect()
    }

    pub fn record_verification(&mut self, result: VerificationResult) {
        self.verification_log.push(result);
    }

    /// Latest verification entry for an issue
    pub fn latest_verification(&self, id: &str) -> Option<&VerificationResult> {
        self.verification_log.iter().rev().find(|v| v.issue_id == id)
    }

    pub fn mark_verified_fixed(&mut self, id: &str, reason: &str) {
        let iteration = self.iteration;
        if let Some(issue) = self.issues.get_mut(id) {
            info!(%id, iteration, "Issue verified fixed");
            issue.status = IssueStatus::VerifiedFixed { at_iteration: iteration };
            self.dismissed.remove(id);
            self.verification_log.push(VerificationResult {
                issue_id: id.to_string(),
                passed: true,
                reason: reason.to_string(),
                iteration,
            });
        }
    }

    /// Dismiss an issue; refused unless the reason is specific enough
    pub fn add_dismissed(&mut self, id: &str, reason: &str, category: DismissalCategory) -> Result<(), DismissalError> {
        let reason = validate_dismissal_reason(reason)?.to_string();
        let iteration = self.iteration;
        let Some(issue) = self.issues.get_mut(id) else {
            return Ok(());
        };
        info!(%id, %category, "Issue dismissed");
        issue.status = IssueStatus::Dismissed;
        self.dismissed.insert(
            id.to_string(),
            DismissalRecord {
                issue_id: id.to_string(),
                reason,
                category,
                path: issue.path.clone(),
                line: issue.line,
                original_body: issue.body.clone(),
                iteration,
            },
        );
        Ok(())
    }

    /// Put an issue back into the unresolved set
    pub fn reopen(&mut self, id: &str) {
        if let Some(issue) = self.issues.get_mut(id)
            && !issue.is_unresolved()
        {
            info!(%id, "Issue reopened");
            issue.status = IssueStatus::Unresolved;
            self.dismissed.remove(id);
        }
    }

    pub fn set_runner_index(&mut self, idx: usize) {
        if idx < self.rotation.tools.len() {
            self.rotation.current_tool = idx;
        }
    }

    pub fn set_model_index(&mut self, idx: usize) {
        if let Some(tool) = self.rotation.current_tool_mut()
            && idx < tool.models.len().max(1)
        {
            tool.current_model_index = idx;
        }
    }

    pub fn increment_no_progress_cycles(&mut self) {
        self.counters.no_progress_cycles += 1;
    }

    pub fn reset_no_progress_cycles(&mut self) {
        self.counters.no_progress_cycles = 0;
    }

    /// Record one fix attempt against the tool and `tool:model` stats
    pub fn record_attempt(&mut self, tool: &str, model: Option<&str>, outcome: AttemptOutcome) {
        debug!(%tool, ?model, ?outcome, "SessionState::record_attempt: called");
        let key = format!("{}:{}", tool, model.unwrap_or("default"));
        let stats = self.performance.entry(key).or_default();
        stats.attempts += 1;
        let tool_state = self.rotation.tools.iter_mut().find(|t| t.name == tool);
        match outcome {
            AttemptOutcome::Fixed(n) => {
                stats.fixes += n;
                if let Some(t) = tool_state {
                    t.fixes += n;
                }
            }
            AttemptOutcome::Failed => {
                stats.failures += 1;
                if let Some(t) = tool_state {
                    t.failures += 1;
                }
            }
            AttemptOutcome::NoChange => {
                stats.no_changes += 1;
                if let Some(t) = tool_state {
                    t.no_changes += 1;
                }
            }
            AttemptOutcome::Error => {
                stats.errors += 1;
                if let Some(t) = tool_state {
                    t.errors += 1;
                }
            }
        }
    }

    pub fn record_bail_out(&mut self, record: BailOutRecord) {
        info!(cycles = record.cycles_completed, remaining = record.remaining.len(), "Recording bail-out");
        self.bail_out = Some(record);
    }

    pub fn set_exit(&mut self, reason: ExitReason) {
        info!(%reason, "Run finished");
        self.exit_reason = Some(reason);
        self.phase = Phase::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(ids: &[u64]) -> SessionState {
        let mut state = SessionState::new(&PrRef::new("o", "r", 1), "feat", "main", "sha1");
        state.merge_fetched(
            ids.iter()
                .map(|id| ReviewIssue::new(*id, "src/lib.rs", Some(1), "rev", format!("issue {}", id)))
                .collect(),
        );
        state
    }

    #[test]
    fn test_merge_fetched_counts_new_only() {
        let mut state = state_with(&[1, 2]);
        state.mark_verified_fixed("c1", "renamed");
        let added = state.merge_fetched(vec![
            ReviewIssue::new(1, "src/lib.rs", Some(1), "rev", "issue 1"),
            ReviewIssue::new(3, "src/lib.rs", Some(1), "rev", "issue 3"),
        ]);
        assert_eq!(added, 1);
        assert!(state.issues["c1"].is_verified());
        assert_eq!(state.unresolved_ids(), vec!["c2", "c3"]);
    }

    #[test]
    fn test_vague_dismissal_keeps_issue_unresolved() {
        let mut state = state_with(&[1]);
        assert!(state.add_dismissed("c1", "fixed", DismissalCategory::AlreadyFixed).is_err());
        assert!(state.add_dismissed("c1", "short one", DismissalCategory::AlreadyFixed).is_err());
        assert!(state.issues["c1"].is_unresolved());
        assert!(state.dismissed.is_empty());

        state
            .add_dismissed("c1", "The null check was added in parse_config on line 40", DismissalCategory::AlreadyFixed)
            .unwrap();
        assert_eq!(state.issues["c1"].status, IssueStatus::Dismissed);
        assert_eq!(state.dismissed["c1"].original_body, "issue 1");
    }

    #[test]
    fn test_stale_verification_rechecked() {
        let mut state = state_with(&[1]);
        state.iteration = 1;
        state.mark_verified_fixed("c1", "done properly");
        state.iteration = 6;
        assert!(state.stale_verified(5).is_empty());
        state.iteration = 7;
        assert_eq!(state.stale_verified(5), vec!["c1"]);
    }

    #[test]
    fn test_reopen_clears_dismissal() {
        let mut state = state_with(&[1]);
        state
            .add_dismissed("c1", "The function was removed from the module entirely", DismissalCategory::FileUnchanged)
            .unwrap();
        state.reopen("c1");
        assert!(state.issues["c1"].is_unresolved());
        assert!(state.dismissed.is_empty());
    }

    #[test]
    fn test_head_change_drops_commit_cache() {
        let mut state = state_with(&[1]);
        state.commit_cache.analyzed.insert("c1".to_string());
        state.commit_cache.bot_wait_done = true;
        state.set_head("sha1");
        assert!(state.commit_cache.bot_wait_done);
        state.set_head("sha2");
        assert!(!state.commit_cache.bot_wait_done);
        assert!(state.commit_cache.analyzed.is_empty());
        assert_eq!(state.head_sha, "sha2");
    }

    #[test]
    fn test_record_attempt_updates_both_views() {
        let mut state = state_with(&[1]);
        state.rotation = RotationState::new(vec![crate::rotation::ToolModelState::new("claude", vec!["opus".to_string()])]);
        state.record_attempt("claude", Some("opus"), AttemptOutcome::Fixed(2));
        state.record_attempt("claude", Some("opus"), AttemptOutcome::NoChange);
        let stats = state.performance["claude:opus"];
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.fixes, 2);
        assert_eq!(stats.no_changes, 1);
        assert_eq!(state.rotation.tools[0].fixes, 2);
    }

    #[test]
    fn test_exit_reason_names() {
        assert_eq!(ExitReason::NoComments.to_string(), "no_comments");
        assert_eq!(serde_json::to_string(&ExitReason::BailOut).unwrap(), "\"bail_out\"");
    }
}
