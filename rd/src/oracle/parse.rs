//! Parsing of oracle replies
//!
//! The oracle answers one line per issue: `ID: YES|NO: explanation`.
//! Parsing never decides what a missing answer means; callers apply their own
//! fail-safe default to `Parsed::Unparsed`.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

static VERDICT_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:[-*]\s*)?(?:\*\*)?\[?([A-Za-z0-9_.-]+)\]?(?:\*\*)?\s*:\s*(?:\*\*)?(YES|NO)\b(?:\*\*)?\s*[:\-]?\s*(.*)$").ok()
});

/// Result of parsing one expected answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<T> {
    Parsed(T),
    Unparsed,
}

impl<T> Parsed<T> {
    pub fn is_parsed(&self) -> bool {
        matches!(self, Parsed::Parsed(_))
    }

    /// The parsed value, or `default` when the line was missing
    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Parsed::Parsed(v) => v,
            Parsed::Unparsed => default,
        }
    }
}

/// One oracle answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub yes: bool,
    pub explanation: String,
}

/// Parse a reply and look up an answer for every expected id
///
/// The first answer for an id wins. Ids in the reply that were not asked
/// about are ignored.
pub fn parse_verdicts(reply: &str, expected: &[String]) -> HashMap<String, Parsed<Verdict>> {
    debug!(reply_len = reply.len(), expected = expected.len(), "parse_verdicts: called");
    let mut found: HashMap<String, Verdict> = HashMap::new();

    for line in reply.lines() {
        let Some(caps) = VERDICT_LINE.as_ref().and_then(|re| re.captures(line)) else {
            continue;
        };
        let id = caps[1].to_string();
        let Some(expected_id) = expected.iter().find(|e| e.eq_ignore_ascii_case(&id)) else {
            debug!(%id, "parse_verdicts: ignoring unexpected id");
            continue;
        };
        found.entry(expected_id.clone()).or_insert_with(|| Verdict {
            yes: caps[2].eq_ignore_ascii_case("yes"),
            explanation: caps[3].trim().to_string(),
        });
    }

    expected
        .iter()
        .map(|id| {
            let parsed = match found.remove(id) {
                Some(v) => Parsed::Parsed(v),
                None => Parsed::Unparsed,
            };
            (id.clone(), parsed)
        })
        .collect()
}

/// Fraction of expected ids that got an answer (1.0 when nothing was expected)
pub fn parse_rate(results: &HashMap<String, Parsed<Verdict>>) -> f64 {
    if results.is_empty() {
        return 1.0;
    }
    let parsed = results.values().filter(|p| p.is_parsed()).count();
    parsed as f64 / results.len() as f64
}

/// Strip a surrounding Markdown code fence if the model added one
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim_matches('\n');
    let mut lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() >= 2
        && lines.first().is_some_and(|l| l.trim_start().starts_with("```"))
        && lines.last().is_some_and(|l| l.trim() == "```")
    {
        lines.remove(0);
        lines.pop();
        let mut out = lines.join("\n");
        out.push('\n');
        return out;
    }
    text.to_string()
}
