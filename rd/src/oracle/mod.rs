//! Verification oracle
//!
//! Every structured question the loop asks a reasoning model goes through
//! here: does an issue still exist, did a diff fix it, is the PR really done,
//! which model to try next, plus the text-producing helpers (commit message,
//! conflict resolution, direct file rewrite).
//!
//! Replies are parsed into [`Parsed`] values. The oracle never decides what an
//! unparsed answer means, with one exception: the audit parse-rate rule in
//! [`apply_audit_rule`].

use std::collections::HashMap;
use std::sync::Arc;

use eyre::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{ReviewIssue, excerpt};
use crate::git::has_conflict_markers;
use crate::llm::{CompletionRequest, LlmClient};
use crate::prompts::PromptLoader;

pub mod dismissal;
pub mod parse;

pub use dismissal::{DismissalError, MIN_REASON_LEN, is_valid_dismissal_reason, validate_dismissal_reason};
pub use parse::{Parsed, Verdict, parse_rate, parse_verdicts, strip_code_fence};

const SYSTEM_PROMPT: &str = "You are a meticulous senior code reviewer. Follow the requested output format exactly.";

/// Token budget for YES/NO style answers
const VERDICT_MAX_TOKENS: u32 = 4096;

/// Lines of context on each side of a commented line
const SNIPPET_RADIUS: usize = 15;

/// Largest file sent whole when a comment has no line
const SNIPPET_MAX_LINES: usize = 200;

/// One issue rendered into an oracle prompt
#[derive(Debug, Clone, Serialize)]
pub struct IssueContext {
    pub id: String,
    pub path: String,
    pub line: Option<u32>,
    pub author: String,
    pub body: String,
    pub excerpt: String,
    /// Current code around the comment
    pub snippet: String,
    /// Diff of the commented file
    pub diff: String,
}

impl IssueContext {
    pub fn new(issue: &ReviewIssue) -> Self {
        Self {
            id: issue.id.clone(),
            path: issue.path.clone(),
            line: issue.line,
            author: issue.author.clone(),
            body: issue.body.clone(),
            excerpt: excerpt(&issue.body, 120),
            snippet: String::new(),
            diff: String::new(),
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_diff(mut self, diff: impl Into<String>) -> Self {
        self.diff = diff.into();
        self
    }
}

/// Per tool/model track record fed to the recommendation prompt
#[derive(Debug, Clone, Serialize)]
pub struct ModelHistory {
    pub tool: String,
    pub model: String,
    pub attempts: u32,
    pub fixes: u32,
    pub failures: u32,
}

/// Audit answers plus how many came back parseable
#[derive(Debug, Clone)]
pub struct AuditReport {
    pub results: HashMap<String, Parsed<Verdict>>,
    pub parse_rate: f64,
}

/// Decide which audited issues pass
///
/// A parsed answer decides on its own. Unparsed answers become failures when
/// fewer than half of the answers parsed; otherwise they keep the issue's
/// current standing (`currently_resolved`).
pub fn apply_audit_rule<F>(report: &AuditReport, currently_resolved: F) -> HashMap<String, bool>
where
    F: Fn(&str) -> bool,
{
    debug!(parse_rate = report.parse_rate, "apply_audit_rule: called");
    let trust_unparsed = report.parse_rate >= 0.5;
    report
        .results
        .iter()
        .map(|(id, parsed)| {
            let passed = match parsed {
                Parsed::Parsed(v) => v.yes,
                Parsed::Unparsed if trust_unparsed => currently_resolved(id),
                Parsed::Unparsed => false,
            };
            (id.clone(), passed)
        })
        .collect()
}

/// Numbered excerpt of `content` around `line` (1-based)
pub fn code_snippet(content: &str, line: Option<u32>) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let (start, end) = match line {
        Some(l) if l > 0 => {
            let idx = (l as usize).saturating_sub(1).min(lines.len().saturating_sub(1));
            (idx.saturating_sub(SNIPPET_RADIUS), (idx + SNIPPET_RADIUS + 1).min(lines.len()))
        }
        _ => (0, lines.len().min(SNIPPET_MAX_LINES)),
    };
    lines[start..end]
        .iter()
        .enumerate()
        .map(|(i, l)| format!("{:>5} | {}", start + i + 1, l))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reasoning-model backed oracle
pub struct Oracle {
    llm: Arc<dyn LlmClient>,
    prompts: PromptLoader,
    max_tokens: u32,
}

impl Oracle {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: PromptLoader, max_tokens: u32) -> Self {
        Self {
            llm,
            prompts,
            max_tokens,
        }
    }

    /// Prompt loader shared with agent prompts
    pub fn prompts(&self) -> &PromptLoader {
        &self.prompts
    }

    async fn ask(&self, template: &str, context: &impl Serialize, max_tokens: u32) -> Result<String> {
        debug!(%template, "Oracle::ask: called");
        let prompt = self.prompts.render(template, context)?;
        let response = self
            .llm
            .complete(CompletionRequest::single(SYSTEM_PROMPT, prompt, max_tokens))
            .await?;
        Ok(response.content.unwrap_or_default())
    }

    async fn ask_verdicts(&self, template: &str, items: &[IssueContext]) -> Result<HashMap<String, Parsed<Verdict>>> {
        if items.is_empty() {
            return Ok(HashMap::new());
        }
        let reply = self
            .ask(template, &serde_json::json!({ "issues": items }), VERDICT_MAX_TOKENS.min(self.max_tokens))
            .await?;
        let expected: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let results = parse_verdicts(&reply, &expected);
        let rate = parse_rate(&results);
        if rate < 1.0 {
            warn!(%template, parse_rate = rate, "Oracle reply missing answers");
        }
        Ok(results)
    }

    /// Does each issue still exist? `yes` means it does
    pub async fn batch_check_issues(&self, items: &[IssueContext]) -> Result<HashMap<String, Parsed<Verdict>>> {
        debug!(count = items.len(), "Oracle::batch_check_issues: called");
        self.ask_verdicts("check-issues", items).await
    }

    /// Single-issue existence check
    pub async fn check_issue_exists(&self, item: IssueContext) -> Result<Parsed<Verdict>> {
        let id = item.id.clone();
        let mut results = self.batch_check_issues(&[item]).await?;
        Ok(results.remove(&id).unwrap_or(Parsed::Unparsed))
    }

    /// Did the diff fix each issue? `yes` means fixed
    pub async fn batch_verify_fixes(&self, items: &[IssueContext]) -> Result<HashMap<String, Parsed<Verdict>>> {
        debug!(count = items.len(), "Oracle::batch_verify_fixes: called");
        self.ask_verdicts("verify-fixes", items).await
    }

    /// Single-issue fix verification
    pub async fn verify_fix(&self, item: IssueContext) -> Result<Parsed<Verdict>> {
        let id = item.id.clone();
        let mut results = self.batch_verify_fixes(&[item]).await?;
        Ok(results.remove(&id).unwrap_or(Parsed::Unparsed))
    }

    /// Adversarial final audit over every originally reported issue
    pub async fn audit(&self, items: &[IssueContext]) -> Result<AuditReport> {
        info!(count = items.len(), "Running final audit");
        let results = self.ask_verdicts("audit", items).await?;
        let parse_rate = parse_rate(&results);
        Ok(AuditReport { results, parse_rate })
    }

    /// Ordered `tool:model` recommendations, restricted to `candidates`
    pub async fn recommend_models(
        &self,
        issues: &[IssueContext],
        history: &[ModelHistory],
        candidates: &[String],
    ) -> Result<Vec<String>> {
        debug!(candidates = candidates.len(), "Oracle::recommend_models: called");
        let reply = self
            .ask(
                "recommend-models",
                &serde_json::json!({
                    "issues": issues,
                    "history": history,
                    "candidates": candidates,
                }),
                VERDICT_MAX_TOKENS.min(self.max_tokens),
            )
            .await?;

        let mut picked = Vec::new();
        for line in reply.lines() {
            let cleaned = line
                .trim()
                .trim_start_matches(|c: char| c == '-' || c == '*' || c == '.' || c.is_ascii_digit())
                .trim()
                .trim_matches('`');
            if let Some(c) = candidates.iter().find(|c| c.eq_ignore_ascii_case(cleaned))
                && !picked.contains(c)
            {
                picked.push(c.clone());
            }
        }
        debug!(?picked, "Oracle::recommend_models: parsed");
        Ok(picked)
    }

    /// Commit message for a fix, `None` if the model gave nothing usable
    pub async fn generate_commit_message(&self, issues: &[IssueContext], diff: &str) -> Result<Option<String>> {
        debug!(count = issues.len(), diff_len = diff.len(), "Oracle::generate_commit_message: called");
        let reply = self
            .ask(
                "commit-message",
                &serde_json::json!({ "issues": issues, "diff": diff }),
                1024.min(self.max_tokens),
            )
            .await?;
        let message = strip_code_fence(&reply).trim().to_string();
        if message.is_empty() || message.lines().next().map(|l| l.trim().is_empty()).unwrap_or(true) {
            return Ok(None);
        }
        Ok(Some(message))
    }

    /// Conflict-free content for `path`, `None` if markers remain
    pub async fn resolve_conflict(&self, path: &str, content: &str) -> Result<Option<String>> {
        info!(%path, "Asking oracle to resolve conflict");
        let reply = self
            .ask(
                "resolve-conflict",
                &serde_json::json!({ "path": path, "content": content }),
                self.max_tokens,
            )
            .await?;
        let resolved = strip_code_fence(&reply);
        if resolved.trim().is_empty() || has_conflict_markers(&resolved) {
            warn!(%path, "Oracle conflict resolution still has markers");
            return Ok(None);
        }
        Ok(Some(resolved))
    }

    /// Rewrite `path` to address `issues` directly, `None` if unusable
    pub async fn direct_fix(&self, path: &str, content: &str, issues: &[IssueContext]) -> Result<Option<String>> {
        info!(%path, count = issues.len(), "Attempting direct fix");
        let reply = self
            .ask(
                "direct-fix",
                &serde_json::json!({ "path": path, "content": content, "issues": issues }),
                self.max_tokens,
            )
            .await?;
        let rewritten = strip_code_fence(&reply);
        if rewritten.trim().is_empty() || rewritten == content {
            return Ok(None);
        }
        Ok(Some(rewritten))
    }
}
