//! Review comment payloads and their mapping to issues

use serde::Deserialize;
use tracing::debug;

use crate::domain::{DiffSide, ReviewIssue};

#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    pub login: String,
}

/// Subset of a `pulls/{n}/comments` entry
#[derive(Debug, Clone, Deserialize)]
pub struct ApiReviewComment {
    pub id: u64,
    pub path: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub original_line: Option<u32>,
    #[serde(default)]
    pub side: Option<String>,
    /// Null once the comment no longer maps onto the current diff
    #[serde(default)]
    pub position: Option<u64>,
    #[serde(default)]
    pub in_reply_to_id: Option<u64>,
    pub user: Option<ApiUser>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// Bot comments are often HTML; agents and the oracle read Markdown better
fn normalize_body(body: &str) -> String {
    let looks_html = body.contains("<details") || body.contains("<p>") || body.contains("<br") || body.contains("<div");
    if looks_html {
        html2md::rewrite_html(body, false).trim().to_string()
    } else {
        body.trim().to_string()
    }
}

/// Fold review comments into one issue per thread root
pub fn issues_from_comments(comments: Vec<ApiReviewComment>, ignore_authors: &[String]) -> Vec<ReviewIssue> {
    debug!(count = comments.len(), "issues_from_comments: called");
    comments
        .into_iter()
        .filter(|c| c.in_reply_to_id.is_none())
        .filter_map(|c| {
            let author = c.user.as_ref().map(|u| u.login.clone()).unwrap_or_else(|| "ghost".to_string());
            if ignore_authors.iter().any(|a| a.eq_ignore_ascii_case(&author)) {
                debug!(%author, id = c.id, "issues_from_comments: ignoring author");
                return None;
            }
            let body = normalize_body(&c.body);
            if body.is_empty() {
                return None;
            }
            let mut issue = ReviewIssue::new(c.id, c.path, c.line.or(c.original_line), author, body);
            issue.side = DiffSide::from_github(c.side.as_deref());
            issue.outdated = c.position.is_none() && c.line.is_none();
            issue.url = c.html_url;
            Some(issue)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comments() -> Vec<ApiReviewComment> {
        serde_json::from_str(
            r#"[
            {"id": 1, "path": "src/a.rs", "line": 10, "side": "RIGHT", "position": 4,
             "user": {"login": "alice"}, "body": "Handle the error here", "html_url": "https://x/1"},
            {"id": 2, "path": "src/a.rs", "line": 10, "position": 4, "in_reply_to_id": 1,
             "user": {"login": "bob"}, "body": "agreed"},
            {"id": 3, "path": "src/b.rs", "line": null, "original_line": 7, "position": null,
             "user": {"login": "coderabbit"}, "body": "<p>Use <code>?</code> instead</p>"},
            {"id": 4, "path": "src/c.rs", "line": 1, "position": 1,
             "user": {"login": "dependabot[bot]"}, "body": "bump"}
        ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_replies_and_ignored_authors_dropped() {
        let issues = issues_from_comments(comments(), &["Dependabot[bot]".to_string()]);
        let ids: Vec<&str> = issues.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c3"]);
    }

    #[test]
    fn test_fields_mapped() {
        let issues = issues_from_comments(comments(), &[]);
        let first = &issues[0];
        assert_eq!(first.author, "alice");
        assert_eq!(first.line, Some(10));
        assert_eq!(first.side, DiffSide::Right);
        assert!(!first.outdated);
        assert_eq!(first.url.as_deref(), Some("https://x/1"));

        let outdated = &issues[1];
        assert!(outdated.outdated);
        assert_eq!(outdated.line, Some(7));
    }

    #[test]
    fn test_html_bodies_become_markdown() {
        let issues = issues_from_comments(comments(), &[]);
        let body = &issues[1].body;
        assert!(!body.contains("<p>"), "body was {}", body);
        assert!(body.contains("instead"));
    }
}
