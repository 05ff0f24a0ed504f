//! Domain types for resolvd
//!
//! Review issues, their verification and dismissal records, and pull
//! request references. Everything here is serialized into the session
//! document.

mod issue;
mod pr;

pub use issue::{DiffSide, DismissalCategory, DismissalRecord, IssueStatus, ReviewIssue, VerificationResult};
pub use pr::PrRef;

/// Current time in unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// First `max` characters of `text` on one line, with an ellipsis if cut
pub fn excerpt(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}
