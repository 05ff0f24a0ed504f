//! Operator-facing summaries

use colored::*;
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::domain::{PrRef, ReviewIssue, excerpt};
use crate::session::{AttemptStats, ExitReason, SessionState};
use crate::stalemate::{BailOutRecord, RemainingIssue};

/// What a run achieved
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub pr: PrRef,
    pub exit_reason: ExitReason,
    pub iterations: u32,
    pub total: usize,
    pub fixed: usize,
    pub dismissed: usize,
    pub remaining: Vec<RemainingIssue>,
    pub bail_out: Option<BailOutRecord>,
    pub performance: BTreeMap<String, AttemptStats>,
}

impl RunSummary {
    pub fn from_state(state: &SessionState, exit_reason: ExitReason) -> Self {
        Self {
            pr: state.pr(),
            exit_reason,
            iterations: state.iteration,
            total: state.issues.len(),
            fixed: state.verified_count(),
            dismissed: state.dismissed.len(),
            remaining: remaining_issues(state),
            bail_out: state.bail_out.clone(),
            performance: state.performance.clone(),
        }
    }
}

pub fn remaining_issues(state: &SessionState) -> Vec<RemainingIssue> {
    state
        .unresolved()
        .into_iter()
        .map(|i| RemainingIssue {
            id: i.id.clone(),
            path: i.path.clone(),
            line: i.line,
            excerpt: excerpt(&i.body, 80),
        })
        .collect()
}

fn location(path: &str, line: Option<u32>) -> String {
    match line {
        Some(l) => format!("{}:{}", path, l),
        None => path.to_string(),
    }
}

fn colored_reason(reason: ExitReason) -> ColoredString {
    match reason {
        ExitReason::AllFixed | ExitReason::NoComments => reason.to_string().green(),
        ExitReason::DryRun | ExitReason::Interrupted | ExitReason::MaxIterations => reason.to_string().yellow(),
        _ => reason.to_string().red(),
    }
}

/// Per tool:model table
pub fn render_performance(performance: &BTreeMap<String, AttemptStats>) -> String {
    let mut out = String::new();
    if performance.is_empty() {
        return out;
    }
    let _ = writeln!(out, "{}", "Tool performance".bold());
    for (key, s) in performance {
        let _ = writeln!(
            out,
            "  {:32} attempts={} fixes={} failures={} no-change={} errors={}",
            key.cyan(),
            s.attempts,
            s.fixes,
            s.failures,
            s.no_changes,
            s.errors
        );
    }
    out
}

pub fn render_bail_out(record: &BailOutRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} after {} stale cycles ({} fixed, {} remaining)",
        "Bailed out".red().bold(),
        record.cycles_completed,
        record.fixed_count,
        record.remaining.len()
    );
    if !record.exhausted.is_empty() {
        let _ = writeln!(out, "  Tried: {}", record.exhausted.join(", "));
    }
    out
}

pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", "Pull request".bold(), summary.pr.to_string().cyan());
    let _ = writeln!(
        out,
        "  exit: {}  iterations: {}  fixed: {}  dismissed: {}  remaining: {} of {}",
        colored_reason(summary.exit_reason),
        summary.iterations,
        summary.fixed.to_string().green(),
        summary.dismissed,
        summary.remaining.len().to_string().yellow(),
        summary.total
    );
    if let Some(record) = &summary.bail_out
        && summary.exit_reason == ExitReason::BailOut
    {
        out.push_str(&render_bail_out(record));
    }
    for r in &summary.remaining {
        let _ = writeln!(out, "  {} {} {}", r.id.yellow(), location(&r.path, r.line).dimmed(), r.excerpt);
    }
    out.push_str(&render_performance(&summary.performance));
    out
}

/// Issues a dry run would hand to an agent
pub fn render_dry_run(unresolved: &[&ReviewIssue]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {} unresolved issue(s)", "Dry run:".yellow().bold(), unresolved.len());
    for issue in unresolved {
        let _ = writeln!(
            out,
            "  {} {} [{}] {}",
            issue.id.yellow(),
            location(&issue.path, issue.line).dimmed(),
            issue.author,
            excerpt(&issue.body, 100)
        );
    }
    out
}

/// `rd status` view of a stored session
pub fn render_status(state: &SessionState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {} ({})", "Session".bold(), state.pr().to_string().cyan(), state.branch);
    let _ = writeln!(out, "  phase: {}  iteration: {}  head: {}", state.phase, state.iteration, state.head_sha);
    if let Some(reason) = state.exit_reason {
        let _ = writeln!(out, "  last exit: {}", colored_reason(reason));
    }
    let _ = writeln!(
        out,
        "  issues: {} total, {} verified, {} dismissed, {} unresolved",
        state.issues.len(),
        state.verified_count(),
        state.dismissed.len(),
        state.unresolved().len()
    );
    let c = &state.counters;
    let _ = writeln!(
        out,
        "  counters: consecutive-failures={} cycle-failures={} no-progress-cycles={}",
        c.consecutive_failures, c.model_failures_in_cycle, c.no_progress_cycles
    );
    if let Some((tool, model)) = state.rotation.current() {
        let _ = writeln!(out, "  rotation: {}:{}", tool, model.unwrap_or("default"));
    }
    if let Some(record) = &state.bail_out {
        out.push_str(&render_bail_out(record));
    }
    out.push_str(&render_performance(&state.performance));
    out
}

/// Markdown comment posted to the PR when everything is fixed
pub fn summary_comment(summary: &RunSummary, state: &SessionState) -> String {
    let mut out = format!(
        "All {} review comment(s) addressed in {} fix iteration(s).\n\n",
        summary.total, summary.iterations
    );
    for issue in state.issues.values() {
        let mark = if issue.is_verified() { "fixed" } else { "dismissed" };
        let _ = writeln!(out, "- `{}` {}: {}", location(&issue.path, issue.line), mark, excerpt(&issue.body, 80));
        if let Some(d) = state.dismissed.get(&issue.id) {
            let _ = writeln!(out, "  - {}", d.reason);
        }
    }
    out
}
