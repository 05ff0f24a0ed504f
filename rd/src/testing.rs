//! Scripted in-memory collaborators for loop tests

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eyre::Result;

use crate::agents::{Agent, AgentRun};
use crate::domain::{PrRef, ReviewIssue};
use crate::git::{MergeOutcome, PushOutcome, Vcs};
use crate::github::{CheckStatus, HostError, IssueComment, PrInfo, ReviewHost};

#[derive(Default)]
struct VcsInner {
    committed: BTreeMap<String, String>,
    files: BTreeMap<String, String>,
    commits: Vec<String>,
    conflicts: Vec<String>,
    merging: bool,
    push_outcomes: VecDeque<PushOutcome>,
    pushes: usize,
    pulls: usize,
    merge_outcome: Option<MergeOutcome>,
}

/// Working tree kept in memory; HEAD is the last committed snapshot
pub struct ScriptedVcs {
    workdir: PathBuf,
    inner: Mutex<VcsInner>,
}

impl ScriptedVcs {
    pub fn new(workdir: &Path) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            inner: Mutex::new(VcsInner::default()),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut VcsInner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner)
    }

    /// Committed file (also present in the working tree)
    pub fn seed_file(&self, path: &str, content: &str) {
        self.with(|i| {
            i.committed.insert(path.to_string(), content.to_string());
            i.files.insert(path.to_string(), content.to_string());
        })
    }

    /// Working tree edit
    pub fn set_file(&self, path: &str, content: &str) {
        self.with(|i| {
            i.files.insert(path.to_string(), content.to_string());
        })
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.with(|i| i.files.get(path).cloned())
    }

    pub fn set_conflicts(&self, paths: &[&str]) {
        self.with(|i| {
            i.conflicts = paths.iter().map(|s| s.to_string()).collect();
            i.merging = !paths.is_empty();
        })
    }

    pub fn set_merge_outcome(&self, outcome: MergeOutcome) {
        self.with(|i| i.merge_outcome = Some(outcome))
    }

    pub fn queue_push(&self, outcome: PushOutcome) {
        self.with(|i| i.push_outcomes.push_back(outcome))
    }

    pub fn commits(&self) -> Vec<String> {
        self.with(|i| i.commits.clone())
    }

    pub fn pushes(&self) -> usize {
        self.with(|i| i.pushes)
    }

    pub fn pulls(&self) -> usize {
        self.with(|i| i.pulls)
    }

    /// Branch history entry that changes no files
    pub fn seed_commit(&self, message: &str) {
        self.with(|i| i.commits.push(message.to_string()))
    }
}

#[async_trait]
impl Vcs for ScriptedVcs {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn prepare(&self, _clone_url: &str) -> Result<()> {
        Ok(())
    }

    async fn head_sha(&self) -> Result<String> {
        Ok(self.with(|i| format!("sha{}", i.commits.len())))
    }

    async fn changed_files(&self) -> Result<Vec<String>> {
        Ok(self.with(|i| {
            let mut paths: Vec<String> = i
                .files
                .iter()
                .filter(|(p, c)| i.committed.get(*p) != Some(*c))
                .map(|(p, _)| p.clone())
                .collect();
            paths.extend(i.committed.keys().filter(|p| !i.files.contains_key(*p)).cloned());
            paths.sort();
            paths
        }))
    }

    async fn diff_file(&self, path: &str) -> Result<String> {
        Ok(self.with(|i| {
            let old = i.committed.get(path).cloned().unwrap_or_default();
            let new = i.files.get(path).cloned().unwrap_or_default();
            if old == new {
                return String::new();
            }
            let mut out = format!("--- a/{}\n+++ b/{}\n", path, path);
            out.extend(old.lines().map(|l| format!("-{}\n", l)));
            out.extend(new.lines().map(|l| format!("+{}\n", l)));
            out
        }))
    }

    async fn diff_all(&self) -> Result<String> {
        let mut all = String::new();
        for path in self.changed_files().await? {
            all.push_str(&self.diff_file(&path).await?);
        }
        Ok(all)
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        Ok(self.file(path))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.set_file(path, content);
        Ok(())
    }

    async fn discard_changes(&self) -> Result<()> {
        self.with(|i| i.files = i.committed.clone());
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        self.with(|i| {
            i.files.remove(path);
        });
        Ok(())
    }

    async fn stage(&self, paths: &[String]) -> Result<()> {
        self.with(|i| {
            if paths.is_empty() {
                i.conflicts.clear();
            } else {
                i.conflicts.retain(|c| !paths.contains(c));
            }
        });
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<String> {
        Ok(self.with(|i| {
            i.committed = i.files.clone();
            i.commits.push(message.to_string());
            i.merging = false;
            format!("sha{}", i.commits.len())
        }))
    }

    async fn push(&self) -> Result<PushOutcome> {
        Ok(self.with(|i| {
            i.pushes += 1;
            i.push_outcomes.pop_front().unwrap_or(PushOutcome::Pushed)
        }))
    }

    async fn pull_rebase(&self) -> Result<bool> {
        self.with(|i| i.pulls += 1);
        Ok(true)
    }

    async fn merge_branch(&self, _branch: &str) -> Result<MergeOutcome> {
        Ok(self.with(|i| {
            let outcome = i.merge_outcome.take().unwrap_or(MergeOutcome::Clean);
            if let MergeOutcome::Conflicts(paths) = &outcome {
                i.conflicts = paths.clone();
                i.merging = true;
            }
            outcome
        }))
    }

    async fn is_merging(&self) -> Result<bool> {
        Ok(self.with(|i| i.merging))
    }

    async fn abort_merge(&self) -> Result<()> {
        self.with(|i| {
            i.conflicts.clear();
            i.merging = false;
            i.files = i.committed.clone();
        });
        Ok(())
    }

    async fn conflicted_paths(&self) -> Result<Vec<String>> {
        Ok(self.with(|i| i.conflicts.clone()))
    }

    async fn reset_to_remote(&self) -> Result<()> {
        self.with(|i| i.files = i.committed.clone());
        Ok(())
    }

    async fn commit_messages_since(&self, _base: &str) -> Result<Vec<String>> {
        Ok(self.commits())
    }
}

/// One scripted agent invocation: edits to apply, then the result
#[derive(Clone, Default)]
pub struct AgentStep {
    pub edits: Vec<(String, String)>,
    pub run: AgentRun,
}

impl AgentStep {
    pub fn edit(path: &str, content: &str) -> Self {
        Self {
            edits: vec![(path.to_string(), content.to_string())],
            run: AgentRun::succeeded("applied the requested change"),
        }
    }

    pub fn edits(edits: &[(&str, &str)]) -> Self {
        Self {
            edits: edits.iter().map(|(p, c)| (p.to_string(), c.to_string())).collect(),
            run: AgentRun::succeeded("applied the requested changes"),
        }
    }

    /// Success with no edits and nothing to say
    pub fn silent() -> Self {
        Self {
            edits: vec![],
            run: AgentRun::succeeded(""),
        }
    }

    pub fn result(run: AgentRun) -> Self {
        Self { edits: vec![], run }
    }
}

/// A recorded agent call
#[derive(Debug, Clone)]
pub struct AgentCall {
    pub model: Option<String>,
    pub prompt: String,
}

/// Agent replaying scripted steps; silent success once the script runs out
pub struct ScriptedAgent {
    name: String,
    models: Vec<String>,
    vcs: Option<Arc<ScriptedVcs>>,
    steps: Mutex<VecDeque<AgentStep>>,
    calls: Mutex<Vec<AgentCall>>,
}

impl ScriptedAgent {
    pub fn new(name: &str, models: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            models: models.iter().map(|m| m.to_string()).collect(),
            vcs: None,
            steps: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Apply step edits to this working tree
    pub fn on(mut self, vcs: Arc<ScriptedVcs>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    pub fn then(self, step: AgentStep) -> Self {
        self.steps.lock().unwrap().push_back(step);
        self
    }

    pub fn with_edit(self, vcs: Arc<ScriptedVcs>, path: &str, content: &str) -> Self {
        self.on(vcs).then(AgentStep::edit(path, content))
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    async fn run(&self, _workdir: &Path, prompt: &str, model: Option<&str>) -> AgentRun {
        self.calls.lock().unwrap().push(AgentCall {
            model: model.map(String::from),
            prompt: prompt.to_string(),
        });
        let step = self.steps.lock().unwrap().pop_front().unwrap_or_else(AgentStep::silent);
        if let Some(vcs) = &self.vcs {
            for (path, content) in &step.edits {
                vcs.set_file(path, content);
            }
        }
        step.run
    }
}

/// Host serving scripted comment fetches
pub struct ScriptedHost {
    info: PrInfo,
    fetches: Mutex<VecDeque<Vec<ReviewIssue>>>,
    last: Mutex<Vec<ReviewIssue>>,
    fetch_count: Mutex<usize>,
    posted: Mutex<Vec<String>>,
}

impl ScriptedHost {
    pub fn new(comments: Vec<ReviewIssue>) -> Self {
        Self {
            info: PrInfo {
                title: "Add widget support".to_string(),
                head_ref: "feature".to_string(),
                head_sha: "sha0".to_string(),
                base_ref: "main".to_string(),
                mergeable: Some(true),
                state: "open".to_string(),
                clone_url: "https://github.com/octo/widgets.git".to_string(),
            },
            fetches: Mutex::new(VecDeque::new()),
            last: Mutex::new(comments),
            fetch_count: Mutex::new(0),
            posted: Mutex::new(Vec::new()),
        }
    }

    pub fn info(&self) -> PrInfo {
        self.info.clone()
    }

    /// Comments returned by the next fetch (later fetches repeat the latest)
    pub fn then_fetch(self, comments: Vec<ReviewIssue>) -> Self {
        self.fetches.lock().unwrap().push_back(comments);
        self
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetch_count.lock().unwrap()
    }

    pub fn posted(&self) -> Vec<String> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReviewHost for ScriptedHost {
    async fn pr_info(&self, _pr: &PrRef) -> Result<PrInfo, HostError> {
        Ok(self.info.clone())
    }

    async fn review_comments(&self, _pr: &PrRef) -> Result<Vec<ReviewIssue>, HostError> {
        *self.fetch_count.lock().unwrap() += 1;
        let mut last = self.last.lock().unwrap();
        let is_first = *self.fetch_count.lock().unwrap() == 1;
        if !is_first && let Some(next) = self.fetches.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(last.clone())
    }

    async fn check_status(&self, _pr: &PrRef, _sha: &str) -> Result<CheckStatus, HostError> {
        Ok(CheckStatus::default())
    }

    async fn issue_comments(&self, _pr: &PrRef) -> Result<Vec<IssueComment>, HostError> {
        Ok(vec![])
    }

    async fn post_issue_comment(&self, _pr: &PrRef, body: &str) -> Result<(), HostError> {
        self.posted.lock().unwrap().push(body.to_string());
        Ok(())
    }

    async fn file_at_ref(&self, _pr: &PrRef, _path: &str, _git_ref: &str) -> Result<Option<String>, HostError> {
        Ok(None)
    }
}

/// Which oracle template produced a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Check,
    Verify,
    Audit,
    Recommend,
    CommitMessage,
    DirectFix,
    ResolveConflict,
    Other,
}

pub fn prompt_kind(prompt: &str) -> PromptKind {
    if prompt.contains("STILL EXISTS") {
        PromptKind::Check
    } else if prompt.contains("is now FIXED") {
        PromptKind::Verify
    } else if prompt.contains("final auditor") {
        PromptKind::Audit
    } else if prompt.contains("Recommend the order") {
        PromptKind::Recommend
    } else if prompt.contains("Write a git commit message") {
        PromptKind::CommitMessage
    } else if prompt.contains("Apply the review feedback") {
        PromptKind::DirectFix
    } else if prompt.contains("unresolved git merge conflicts") {
        PromptKind::ResolveConflict
    } else {
        PromptKind::Other
    }
}

/// Issue ids named in a rendered prompt (`=== id ===` headers)
pub fn prompt_ids(prompt: &str) -> Vec<String> {
    prompt
        .lines()
        .filter_map(|l| l.trim().strip_prefix("=== ")?.strip_suffix(" ===").map(|s| s.to_string()))
        .collect()
}

pub fn issue(id: u64, path: &str, body: &str) -> ReviewIssue {
    ReviewIssue::new(id, path, Some(1), "reviewer", body)
}
