use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use sessionstore::SessionStore;
use tempfile::TempDir;

use super::*;
use crate::agents::{AgentErrorKind, AgentRun};
use crate::domain::{DismissalCategory, IssueStatus};
use crate::git::{MergeOutcome, PushOutcome};
use crate::llm::client::mock::MockLlmClient;
use crate::prompts::PromptLoader;
use crate::testing::{AgentStep, PromptKind, ScriptedAgent, ScriptedHost, ScriptedVcs, issue, prompt_ids, prompt_kind};

fn answer(ids: &[String], yes: impl Fn(&str) -> bool, reason: &str) -> String {
    ids.iter()
        .map(|id| format!("{}: {}: {}", id, if yes(id) { "YES" } else { "NO" }, reason))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Oracle that says every issue exists, every fix works and the audit passes
fn agreeable_oracle() -> MockLlmClient {
    MockLlmClient::with_handler(|req| {
        let prompt = req.user_text();
        let ids = prompt_ids(&prompt);
        Ok(match prompt_kind(&prompt) {
            PromptKind::Check => answer(&ids, |_| true, "the reported problem is still in the code"),
            PromptKind::Verify => answer(&ids, |_| true, "the diff replaces the unwrap with error propagation"),
            PromptKind::Audit => answer(&ids, |_| true, "the code now propagates the error with ?"),
            PromptKind::CommitMessage => "fix: address review feedback".to_string(),
            _ => String::new(),
        })
    })
}

struct Harness {
    dir: TempDir,
    pr: PrRef,
    config: Config,
    vcs: Arc<ScriptedVcs>,
    host: Arc<ScriptedHost>,
    llm: Arc<MockLlmClient>,
    pr_info: PrInfo,
}

impl Harness {
    fn new(host: ScriptedHost, llm: MockLlmClient) -> Self {
        let dir = TempDir::new().unwrap();
        let vcs = Arc::new(ScriptedVcs::new(&dir.path().join("checkout")));
        let mut config = Config::default();
        config.github.bot_wait_secs = 0;
        config.resolver.breaker_max_failures = 0;
        config.resolver.recommend_models = false;
        config.resolver.direct_fix_on_bail_out = false;
        config.resolver.workdir_root = dir.path().to_path_buf();
        let pr_info = host.info();
        Self {
            dir,
            pr: PrRef::new("octo", "widgets", 7),
            config,
            vcs,
            host: Arc::new(host),
            llm: Arc::new(llm),
            pr_info,
        }
    }

    fn store(&self) -> SessionStore {
        SessionStore::open(self.dir.path().join("sessions")).unwrap()
    }

    fn resolver(&self, agents: Vec<Arc<ScriptedAgent>>) -> Resolver {
        let session = Session::open(self.store(), &self.pr, "feature", "main", "sha0").unwrap();
        let oracle = Oracle::new(self.llm.clone(), PromptLoader::embedded_only(), 16384);
        let pool = AgentPool::new(agents.into_iter().map(|a| a as Arc<dyn Agent>).collect());
        Resolver::new(
            self.pr.clone(),
            self.pr_info.clone(),
            self.config.clone(),
            session,
            Collaborators {
                host: self.host.clone(),
                vcs: self.vcs.clone(),
                oracle: Arc::new(oracle),
                agents: pool,
            },
        )
        .with_push_backoff(Duration::ZERO)
    }
}

fn three_issue_host() -> ScriptedHost {
    ScriptedHost::new(vec![
        issue(1, "src/a.rs", "Avoid unwrap when loading the config"),
        issue(2, "src/b.rs", "Rename tmp to something descriptive"),
        issue(3, "src/c.rs", "Add a test for the empty input case"),
    ])
}

fn seed(vcs: &ScriptedVcs, paths: &[&str]) {
    for path in paths {
        vcs.seed_file(path, "fn original() {}\n");
    }
}

#[tokio::test]
async fn test_partial_fix_retries_only_remaining_issue() {
    let llm = MockLlmClient::with_handler(|req| {
        let prompt = req.user_text();
        let ids = prompt_ids(&prompt);
        Ok(match prompt_kind(&prompt) {
            PromptKind::Check => answer(&ids, |_| true, "still present"),
            PromptKind::Verify => answer(&ids, |id| id != "c3", "the test for empty input is still missing"),
            PromptKind::CommitMessage => "fix: address review feedback".to_string(),
            _ => String::new(),
        })
    });
    let mut h = Harness::new(three_issue_host(), llm);
    h.config.resolver.max_fix_iterations = 2;
    seed(&h.vcs, &["src/a.rs", "src/b.rs", "src/c.rs"]);
    let agent = Arc::new(
        ScriptedAgent::new("claude", &["sonnet"])
            .on(h.vcs.clone())
            .then(AgentStep::edits(&[("src/a.rs", "fn loaded() -> Result<()> {}\n"), ("src/b.rs", "let config_path = 1;\n")])),
    );

    let mut resolver = h.resolver(vec![agent.clone()]);
    let summary = resolver.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::MaxIterations);
    let calls = agent.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(prompt_ids(&calls[0].prompt), vec!["c1", "c2", "c3"]);
    assert_eq!(prompt_ids(&calls[1].prompt), vec!["c3"]);
    assert!(calls[1].prompt.contains("did not resolve c3"));

    let state = resolver.state();
    assert!(state.issues["c1"].is_verified());
    assert!(state.issues["c2"].is_verified());
    assert!(state.issues["c3"].is_unresolved());
    let commits = h.vcs.commits();
    assert_eq!(commits.len(), 1);
    assert!(commits[0].contains("Review-Issues: c1, c2"));
    assert_eq!(h.vcs.pushes(), 1);
}

#[tokio::test]
async fn test_silent_agent_rotates_without_lesson() {
    let llm = MockLlmClient::with_handler(|req| {
        let prompt = req.user_text();
        let ids = prompt_ids(&prompt);
        Ok(match prompt_kind(&prompt) {
            PromptKind::Check => answer(&ids, |_| true, "still present"),
            _ => String::new(),
        })
    });
    let mut h = Harness::new(ScriptedHost::new(vec![issue(1, "src/a.rs", "Avoid unwrap")]), llm);
    h.config.resolver.max_fix_iterations = 1;
    h.config.resolver.recommend_models = true;
    seed(&h.vcs, &["src/a.rs"]);
    let agent = Arc::new(ScriptedAgent::new("claude", &["a", "b"]).on(h.vcs.clone()));

    let mut resolver = h.resolver(vec![agent.clone()]);
    let summary = resolver.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::MaxIterations);
    assert_eq!(agent.calls().len(), 1);
    assert_eq!(agent.calls()[0].model.as_deref(), Some("a"));

    let state = resolver.state();
    assert_eq!(state.rotation.current(), Some(("claude", Some("b"))));
    assert_eq!(state.counters.consecutive_failures, 1);
    assert_eq!(state.counters.no_progress_cycles, 0);
    assert!(state.bail_out.is_none());
    assert_eq!(state.performance["claude:a"].no_changes, 1);
    assert!(h.store().read_lessons(&h.pr.session_key()).unwrap().is_empty());
    assert!(h.vcs.commits().is_empty());
}

#[tokio::test]
async fn test_no_comments_exits_without_agent() {
    let h = Harness::new(ScriptedHost::new(vec![]), agreeable_oracle());
    let agent = Arc::new(ScriptedAgent::new("claude", &[]).on(h.vcs.clone()));

    let mut resolver = h.resolver(vec![agent.clone()]);
    let summary = resolver.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::NoComments);
    assert!(agent.calls().is_empty());
    assert_eq!(h.llm.call_count(), 0);
    assert_eq!(resolver.state().exit_reason, Some(ExitReason::NoComments));
}

#[tokio::test]
async fn test_resume_keeps_rotation_and_counters() {
    let llm = MockLlmClient::with_handler(|req| {
        let prompt = req.user_text();
        Ok(match prompt_kind(&prompt) {
            PromptKind::Check => answer(&prompt_ids(&prompt), |_| true, "still present"),
            _ => String::new(),
        })
    });
    let mut h = Harness::new(ScriptedHost::new(vec![issue(1, "src/a.rs", "Avoid unwrap")]), llm);
    h.config.resolver.max_fix_iterations = 1;
    seed(&h.vcs, &["src/a.rs"]);
    let agent = Arc::new(ScriptedAgent::new("claude", &["a", "b"]).on(h.vcs.clone()));

    let (rotation, counters, verified) = {
        let mut resolver = h.resolver(vec![agent.clone()]);
        resolver.run().await.unwrap();
        let state = resolver.state();
        let verified: HashSet<String> = state.issues.values().filter(|i| i.is_verified()).map(|i| i.id.clone()).collect();
        (state.rotation.clone(), state.counters, verified)
    };

    let mut resumed = h.resolver(vec![agent.clone()]);
    let summary = resumed.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::MaxIterations);
    assert_eq!(agent.calls().len(), 1);
    let state = resumed.state();
    assert_eq!(state.rotation, rotation);
    assert_eq!(state.counters, counters);
    let again: HashSet<String> = state.issues.values().filter(|i| i.is_verified()).map(|i| i.id.clone()).collect();
    assert_eq!(again, verified);
}

#[tokio::test]
async fn test_dry_run_applies_dismissal_rules() {
    let llm = MockLlmClient::with_handler(|req| {
        let prompt = req.user_text();
        Ok(match prompt_kind(&prompt) {
            PromptKind::Check => {
                "c1: NO: fixed\nc2: NO: The null check was added in parse_config on line 40".to_string()
            }
            _ => String::new(),
        })
    });
    let mut h = Harness::new(
        ScriptedHost::new(vec![issue(1, "src/a.rs", "Handle null"), issue(2, "src/b.rs", "Check for null")]),
        llm,
    );
    seed(&h.vcs, &["src/a.rs", "src/b.rs"]);
    h.config.resolver.max_fix_iterations = 5;
    let agent = Arc::new(ScriptedAgent::new("claude", &[]).on(h.vcs.clone()));

    let mut resolver = h.resolver(vec![agent.clone()]).with_options(RunOptions {
        dry_run: true,
        ..Default::default()
    });
    let summary = resolver.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::DryRun);
    assert!(agent.calls().is_empty());
    let state = resolver.state();
    assert!(state.issues["c1"].is_unresolved());
    assert_eq!(state.issues["c2"].status, IssueStatus::Dismissed);
    assert_eq!(state.dismissed["c2"].category, DismissalCategory::AlreadyFixed);
}

#[tokio::test]
async fn test_full_fix_passes_audit_and_posts_summary() {
    let mut h = Harness::new(ScriptedHost::new(vec![issue(1, "src/a.rs", "Avoid unwrap")]), agreeable_oracle());
    h.config.resolver.post_summary = true;
    seed(&h.vcs, &["src/a.rs"]);
    let agent = Arc::new(ScriptedAgent::new("claude", &[]).with_edit(h.vcs.clone(), "src/a.rs", "fn load() -> Result<()> {}\n"));

    let mut resolver = h.resolver(vec![agent.clone()]);
    let summary = resolver.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::AllFixed);
    assert_eq!(summary.fixed, 1);
    assert_eq!(h.vcs.commits().len(), 1);
    assert!(h.vcs.commits()[0].starts_with("fix: address review feedback"));
    let posted = h.host.posted();
    assert_eq!(posted.len(), 1);
    assert!(posted[0].contains("`src/a.rs:1` fixed"));
}

#[tokio::test]
async fn test_fatal_agent_error_stops_run() {
    let mut h = Harness::new(ScriptedHost::new(vec![issue(1, "src/a.rs", "Avoid unwrap")]), agreeable_oracle());
    h.config.resolver.max_fix_iterations = 5;
    seed(&h.vcs, &["src/a.rs"]);
    let agent = Arc::new(ScriptedAgent::new("codex", &[]).on(h.vcs.clone()).then(AgentStep::result(AgentRun::failed(
        "",
        "Error: permission denied",
        AgentErrorKind::Permission,
    ))));

    let mut resolver = h.resolver(vec![agent.clone()]);
    let summary = resolver.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::FatalToolError);
    assert_eq!(agent.calls().len(), 1);
    assert_eq!(resolver.state().performance["codex:default"].errors, 1);
}

#[tokio::test]
async fn test_no_commit_leaves_verified_changes() {
    let h = Harness::new(ScriptedHost::new(vec![issue(1, "src/a.rs", "Avoid unwrap")]), agreeable_oracle());
    seed(&h.vcs, &["src/a.rs"]);
    let agent = Arc::new(ScriptedAgent::new("claude", &[]).with_edit(h.vcs.clone(), "src/a.rs", "fn fixed() {}\n"));

    let mut resolver = h.resolver(vec![agent]).with_options(RunOptions {
        no_commit: true,
        ..Default::default()
    });
    let summary = resolver.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::ChangesUncommitted);
    assert!(h.vcs.commits().is_empty());
    assert_eq!(h.vcs.file("src/a.rs").as_deref(), Some("fn fixed() {}\n"));
    assert!(resolver.state().issues["c1"].is_verified());
}

#[tokio::test]
async fn test_leftover_changes_verified_on_startup() {
    let h = Harness::new(ScriptedHost::new(vec![issue(1, "src/a.rs", "Avoid unwrap")]), agreeable_oracle());
    seed(&h.vcs, &["src/a.rs"]);
    h.vcs.set_file("src/a.rs", "fn load() -> Result<()> {}\n");
    let agent = Arc::new(ScriptedAgent::new("claude", &[]).on(h.vcs.clone()));

    let mut resolver = h.resolver(vec![agent.clone()]);
    let summary = resolver.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::AllFixed);
    assert!(agent.calls().is_empty());
    assert_eq!(h.vcs.commits().len(), 1);
}

#[tokio::test]
async fn test_leftover_fix_verified_before_existence_check() {
    let llm = MockLlmClient::with_handler(|req| {
        let prompt = req.user_text();
        let ids = prompt_ids(&prompt);
        Ok(match prompt_kind(&prompt) {
            PromptKind::Check => answer(&ids, |_| false, "load now returns a Result so the unwrap is gone"),
            PromptKind::Verify | PromptKind::Audit => answer(&ids, |_| true, "load now returns a Result"),
            PromptKind::CommitMessage => "fix: propagate load errors".to_string(),
            _ => String::new(),
        })
    });
    let h = Harness::new(ScriptedHost::new(vec![issue(1, "src/a.rs", "Avoid unwrap")]), llm);
    seed(&h.vcs, &["src/a.rs"]);
    h.vcs.set_file("src/a.rs", "fn load() -> Result<()> {}\n");
    let agent = Arc::new(ScriptedAgent::new("claude", &[]).on(h.vcs.clone()));

    let mut resolver = h.resolver(vec![agent.clone()]);
    let summary = resolver.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::AllFixed);
    assert!(agent.calls().is_empty());
    assert_eq!(h.vcs.file("src/a.rs").as_deref(), Some("fn load() -> Result<()> {}\n"));
    let commits = h.vcs.commits();
    assert_eq!(commits.len(), 1);
    assert!(commits[0].contains("Review-Issues: c1"));
    let state = resolver.state();
    assert!(state.issues["c1"].is_verified());
    assert!(!state.dismissed.contains_key("c1"));
    assert!(
        h.llm
            .requests()
            .iter()
            .all(|r| prompt_kind(&r.user_text()) != PromptKind::Check)
    );
}

#[tokio::test]
async fn test_resumed_session_keeps_audit_reopened_issue_open() {
    let llm = MockLlmClient::with_handler(|req| {
        let prompt = req.user_text();
        let ids = prompt_ids(&prompt);
        Ok(match prompt_kind(&prompt) {
            PromptKind::Check => answer(&ids, |_| true, "still present"),
            PromptKind::Verify => answer(&ids, |_| true, "the diff replaces the unwrap"),
            PromptKind::Audit => answer(&ids, |_| false, "the unwrap is still called on line 1"),
            PromptKind::CommitMessage => "fix: propagate load errors".to_string(),
            _ => String::new(),
        })
    });
    let mut h = Harness::new(ScriptedHost::new(vec![issue(1, "src/a.rs", "Avoid unwrap")]), llm);
    h.config.resolver.max_fix_iterations = 1;
    seed(&h.vcs, &["src/a.rs"]);
    let agent = Arc::new(ScriptedAgent::new("claude", &[]).with_edit(h.vcs.clone(), "src/a.rs", "fn fixed() {}\n"));

    {
        let mut resolver = h.resolver(vec![agent.clone()]);
        let summary = resolver.run().await.unwrap();
        assert_eq!(summary.exit_reason, ExitReason::MaxIterations);
        assert!(resolver.state().issues["c1"].is_unresolved());
    }
    assert!(h.vcs.commits()[0].contains("Review-Issues: c1"));

    let mut resumed = h.resolver(vec![agent]).with_options(RunOptions {
        dry_run: true,
        ..Default::default()
    });
    let summary = resumed.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::DryRun);
    let state = resumed.state();
    assert!(state.issues["c1"].is_unresolved());
    assert!(!state.verification_log.iter().any(|v| v.reason == "restored from fix commit trailer"));
}

#[tokio::test]
async fn test_fresh_session_restores_verified_issue_from_trailer() {
    let h = Harness::new(ScriptedHost::new(vec![issue(1, "src/a.rs", "Avoid unwrap")]), agreeable_oracle());
    seed(&h.vcs, &["src/a.rs"]);
    h.vcs.seed_commit("fix: propagate load errors\n\nReview-Issues: c1\n");

    let mut resolver = h.resolver(vec![]).with_options(RunOptions {
        dry_run: true,
        ..Default::default()
    });
    let summary = resolver.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::DryRun);
    let state = resolver.state();
    assert!(state.issues["c1"].is_verified());
    assert_eq!(
        state.latest_verification("c1").map(|v| v.reason.as_str()),
        Some("restored from fix commit trailer")
    );
}

#[tokio::test]
async fn test_expired_verifications_are_rechecked() {
    let llm = MockLlmClient::with_handler(|req| {
        let prompt = req.user_text();
        let ids = prompt_ids(&prompt);
        Ok(match prompt_kind(&prompt) {
            PromptKind::Check => answer(
                &ids,
                |id| id == "c1",
                "The unwrap in load was replaced by the ? operator on line 3.",
            ),
            _ => String::new(),
        })
    });
    let h = Harness::new(three_issue_host(), llm);
    seed(&h.vcs, &["src/a.rs", "src/b.rs", "src/c.rs"]);

    let mut resolver = h.resolver(vec![]).with_options(RunOptions {
        dry_run: true,
        ..Default::default()
    });
    {
        let state = resolver.state_mut();
        state.merge_fetched(vec![
            issue(1, "src/a.rs", "Avoid unwrap when loading the config"),
            issue(2, "src/b.rs", "Rename tmp to something descriptive"),
            issue(3, "src/c.rs", "Add a test for the empty input case"),
        ]);
        state.iteration = 1;
        state.mark_verified_fixed("c1", "load returns a Result now");
        state.mark_verified_fixed("c2", "tmp was renamed to config_path");
        state.iteration = 3;
        state.mark_verified_fixed("c3", "empty input test added in parse_test");
        state.iteration = 7;
    }
    let summary = resolver.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::DryRun);
    let mut checked: Vec<String> = h
        .llm
        .requests()
        .iter()
        .map(|r| r.user_text())
        .filter(|p| prompt_kind(p) == PromptKind::Check)
        .flat_map(|p| prompt_ids(&p))
        .collect();
    checked.sort();
    assert_eq!(checked, vec!["c1", "c2"]);

    let state = resolver.state();
    assert!(state.issues["c1"].is_unresolved());
    assert_eq!(state.issues["c2"].status, IssueStatus::VerifiedFixed { at_iteration: 7 });
    assert_eq!(state.issues["c3"].status, IssueStatus::VerifiedFixed { at_iteration: 3 });
}

#[tokio::test]
async fn test_stalemate_bails_out_with_report() {
    let mut h = Harness::new(ScriptedHost::new(vec![issue(1, "src/a.rs", "Avoid unwrap")]), agreeable_oracle());
    h.config.resolver.max_stale_cycles = 1;
    seed(&h.vcs, &["src/a.rs"]);
    let agent = Arc::new(ScriptedAgent::new("aider", &[]).on(h.vcs.clone()));

    let mut resolver = h.resolver(vec![agent.clone()]);
    let summary = resolver.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::BailOut);
    assert_eq!(agent.calls().len(), 1);
    let record = resolver.state().bail_out.clone().unwrap();
    assert_eq!(record.cycles_completed, 1);
    assert_eq!(record.remaining.len(), 1);
    assert_eq!(record.remaining[0].id, "c1");
    assert_eq!(record.exhausted, vec!["aider:default".to_string()]);
}

#[tokio::test]
async fn test_direct_fix_rescues_stalemate() {
    let llm = MockLlmClient::with_handler(|req| {
        let prompt = req.user_text();
        let ids = prompt_ids(&prompt);
        Ok(match prompt_kind(&prompt) {
            PromptKind::Check => answer(&ids, |_| true, "still present"),
            PromptKind::Verify | PromptKind::Audit => answer(&ids, |_| true, "load now returns a Result"),
            PromptKind::DirectFix => "fn load() -> Result<()> { Ok(()) }\n".to_string(),
            _ => String::new(),
        })
    });
    let mut h = Harness::new(ScriptedHost::new(vec![issue(1, "src/a.rs", "Avoid unwrap")]), llm);
    h.config.resolver.max_stale_cycles = 1;
    h.config.resolver.direct_fix_on_bail_out = true;
    seed(&h.vcs, &["src/a.rs"]);
    let agent = Arc::new(ScriptedAgent::new("aider", &[]).on(h.vcs.clone()));

    let mut resolver = h.resolver(vec![agent]);
    let summary = resolver.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::AllFixed);
    assert_eq!(h.vcs.file("src/a.rs").as_deref(), Some("fn load() -> Result<()> { Ok(()) }\n"));
    assert_eq!(h.vcs.commits().len(), 1);
    let state = resolver.state();
    assert_eq!(state.performance["oracle:direct"].fixes, 1);
    assert_eq!(state.counters.no_progress_cycles, 0);
    assert!(state.bail_out.is_none());
}

#[tokio::test]
async fn test_rejected_push_is_retried() {
    let h = Harness::new(ScriptedHost::new(vec![issue(1, "src/a.rs", "Avoid unwrap")]), agreeable_oracle());
    seed(&h.vcs, &["src/a.rs"]);
    h.vcs.queue_push(PushOutcome::Rejected("non-fast-forward".to_string()));
    let agent = Arc::new(ScriptedAgent::new("claude", &[]).with_edit(h.vcs.clone(), "src/a.rs", "fn fixed() {}\n"));

    let mut resolver = h.resolver(vec![agent]);
    let summary = resolver.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::AllFixed);
    assert_eq!(h.vcs.pushes(), 2);
    assert_eq!(h.vcs.pulls(), 1);
}

#[tokio::test]
async fn test_last_push_rejection_skips_integration() {
    let mut h = Harness::new(ScriptedHost::new(vec![issue(1, "src/a.rs", "Avoid unwrap")]), agreeable_oracle());
    h.config.resolver.push_retries = 1;
    seed(&h.vcs, &["src/a.rs"]);
    h.vcs.queue_push(PushOutcome::Rejected("non-fast-forward".to_string()));
    let agent = Arc::new(ScriptedAgent::new("claude", &[]).with_edit(h.vcs.clone(), "src/a.rs", "fn fixed() {}\n"));

    let mut resolver = h.resolver(vec![agent]);
    let summary = resolver.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::AllFixed);
    assert_eq!(h.vcs.pushes(), 1);
    assert_eq!(h.vcs.pulls(), 0);
    assert_eq!(h.vcs.commits().len(), 1);
    assert!(resolver.state().issues["c1"].is_verified());
}

#[tokio::test]
async fn test_base_conflicts_resolved_before_fixing() {
    let mut h = Harness::new(ScriptedHost::new(vec![]), agreeable_oracle());
    h.pr_info.mergeable = Some(false);
    h.vcs.seed_file("src/lib.rs", "a\n");
    h.vcs.set_file("src/lib.rs", "<<<<<<< HEAD\na\n=======\nb\n>>>>>>> main\n");
    h.vcs.set_merge_outcome(MergeOutcome::Conflicts(vec!["src/lib.rs".to_string()]));
    let agent = Arc::new(ScriptedAgent::new("claude", &[]).with_edit(h.vcs.clone(), "src/lib.rs", "a\nb\n"));

    let mut resolver = h.resolver(vec![agent.clone()]);
    let summary = resolver.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::NoComments);
    let commits = h.vcs.commits();
    assert_eq!(commits.len(), 1);
    assert!(commits[0].starts_with("Merge branch 'main' into feature"));
    assert_eq!(h.vcs.file("src/lib.rs").as_deref(), Some("a\nb\n"));
    assert!(agent.calls()[0].prompt.contains("merge conflicts"));
    assert_eq!(h.vcs.pushes(), 1);
}

#[tokio::test]
async fn test_shutdown_before_start_is_interrupted() {
    let h = Harness::new(ScriptedHost::new(vec![issue(1, "src/a.rs", "Avoid unwrap")]), agreeable_oracle());
    let shutdown = ShutdownSignal::new();
    shutdown.trigger();

    let mut resolver = h.resolver(vec![]).with_shutdown(shutdown);
    let summary = resolver.run().await.unwrap();

    assert_eq!(summary.exit_reason, ExitReason::Interrupted);
    assert_eq!(h.host.fetch_count(), 0);
}
