//! Dismissal reason validation
//!
//! An issue can only leave the unresolved set without a verified code change
//! when the oracle gives a concrete reason. Anything short or vague keeps the
//! issue open.

use thiserror::Error;
use tracing::debug;

/// Minimum length of an acceptable dismissal reason
pub const MIN_REASON_LEN: usize = 20;

/// Reasons that say nothing about the code
pub const VAGUE_PHRASES: &[&str] = &["fixed", "done", "looks good", "ok", "resolved", "already handled"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DismissalError {
    #[error("dismissal reason is empty")]
    Empty,
    #[error("dismissal reason is too short ({0} chars, need {MIN_REASON_LEN})")]
    TooShort(usize),
    #[error("dismissal reason is too vague: {0:?}")]
    Vague(String),
}

/// Check a dismissal reason, returning the trimmed reason when acceptable
pub fn validate_dismissal_reason(reason: &str) -> Result<&str, DismissalError> {
    debug!(reason_len = reason.len(), "validate_dismissal_reason: called");
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(DismissalError::Empty);
    }

    let normalized = trimmed.trim_end_matches('.').trim().to_lowercase();
    if VAGUE_PHRASES.contains(&normalized.as_str()) {
        debug!(%normalized, "validate_dismissal_reason: vague phrase");
        return Err(DismissalError::Vague(trimmed.to_string()));
    }

    let len = trimmed.chars().count();
    if len < MIN_REASON_LEN {
        return Err(DismissalError::TooShort(len));
    }

    Ok(trimmed)
}

/// Convenience predicate
pub fn is_valid_dismissal_reason(reason: &str) -> bool {
    validate_dismissal_reason(reason).is_ok()
}
