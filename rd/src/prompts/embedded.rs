//! Embedded prompts
//!
//! These are compiled into the binary from .pmt files at build time.

use tracing::debug;

pub const CHECK_ISSUES: &str = include_str!("../../prompts/check-issues.pmt");
pub const VERIFY_FIXES: &str = include_str!("../../prompts/verify-fixes.pmt");
pub const AUDIT: &str = include_str!("../../prompts/audit.pmt");
pub const RECOMMEND_MODELS: &str = include_str!("../../prompts/recommend-models.pmt");
pub const COMMIT_MESSAGE: &str = include_str!("../../prompts/commit-message.pmt");
pub const RESOLVE_CONFLICT: &str = include_str!("../../prompts/resolve-conflict.pmt");
pub const DIRECT_FIX: &str = include_str!("../../prompts/direct-fix.pmt");
pub const FIX_ISSUES: &str = include_str!("../../prompts/fix-issues.pmt");
pub const CONFLICT_AGENT: &str = include_str!("../../prompts/conflict-agent.pmt");

/// Names of every embedded template
pub const NAMES: &[&str] = &[
    "check-issues",
    "verify-fixes",
    "audit",
    "recommend-models",
    "commit-message",
    "resolve-conflict",
    "direct-fix",
    "fix-issues",
    "conflict-agent",
];

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    let found = match name {
        "check-issues" => Some(CHECK_ISSUES),
        "verify-fixes" => Some(VERIFY_FIXES),
        "audit" => Some(AUDIT),
        "recommend-models" => Some(RECOMMEND_MODELS),
        "commit-message" => Some(COMMIT_MESSAGE),
        "resolve-conflict" => Some(RESOLVE_CONFLICT),
        "direct-fix" => Some(DIRECT_FIX),
        "fix-issues" => Some(FIX_ISSUES),
        "conflict-agent" => Some(CONFLICT_AGENT),
        _ => None,
    };
    if found.is_none() {
        debug!(%name, "get_embedded: no match found");
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_name_resolves() {
        for name in NAMES {
            assert!(get_embedded(name).is_some(), "missing template {}", name);
        }
    }

    #[test]
    fn test_oracle_templates_state_line_format() {
        for name in ["check-issues", "verify-fixes", "audit"] {
            let body = get_embedded(name).unwrap();
            assert!(body.contains("ID: YES:"), "{} lacks YES format", name);
            assert!(body.contains("ID: NO:"), "{} lacks NO format", name);
        }
    }

    #[test]
    fn test_get_embedded_unknown() {
        assert!(get_embedded("unknown-template").is_none());
    }
}
