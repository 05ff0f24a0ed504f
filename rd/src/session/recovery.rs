//! Resume reconciliation from git history
//!
//! Fix commits carry a `Review-Issues:` trailer naming the issues they fixed.
//! A crash between commit and session save leaves those issues unresolved in
//! the session; reading the trailers back restores them.

use tracing::{debug, info};

use super::SessionState;

/// Trailer key on fix commits
pub const TRAILER_KEY: &str = "Review-Issues";

/// Trailer line naming `ids`
pub fn review_trailer(ids: &[String]) -> String {
    format!("{}: {}", TRAILER_KEY, ids.join(", "))
}

/// Issue ids named in `Review-Issues:` trailers of a commit message
pub fn parse_review_trailers(message: &str) -> Vec<String> {
    let prefix = format!("{}:", TRAILER_KEY);
    message
        .lines()
        .filter_map(|line| line.trim().strip_prefix(prefix.as_str()))
        .flat_map(|ids| ids.split(','))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

/// Mark issues named in commit trailers as verified when the session lost them
///
/// Issues whose latest verification failed stay open. Returns the restored ids.
pub fn restore_from_history(state: &mut SessionState, messages: &[String]) -> Vec<String> {
    debug!(commits = messages.len(), "restore_from_history: called");
    let mut restored = Vec::new();
    for id in messages.iter().flat_map(|m| parse_review_trailers(m)) {
        let unresolved = state.issues.get(&id).map(|i| i.is_unresolved()).unwrap_or(false);
        let rejected = state.latest_verification(&id).is_some_and(|v| !v.passed);
        if unresolved && !rejected && !restored.contains(&id) {
            state.mark_verified_fixed(&id, "restored from fix commit trailer");
            restored.push(id);
        }
    }
    if !restored.is_empty() {
        info!(count = restored.len(), "Restored verified issues from commit history");
    }
    restored
}
