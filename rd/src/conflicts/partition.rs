//! Split conflicted paths into generated and human-authored files

use glob::Pattern;
use tracing::{debug, warn};

/// Conflicted paths by how they get resolved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictPartition {
    /// Lock/manifest-derived files that are regenerated, never patched
    pub generated: Vec<String>,
    pub human: Vec<String>,
}

/// Regeneration command for a generated file, by file name
pub fn regen_command_for(path: &str) -> Option<&'static [&'static str]> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let argv: &'static [&'static str] = match name {
        "Cargo.lock" => &["cargo", "generate-lockfile"],
        "package-lock.json" => &["npm", "install", "--package-lock-only", "--ignore-scripts"],
        "yarn.lock" => &["yarn", "install", "--ignore-scripts"],
        "pnpm-lock.yaml" => &["pnpm", "install", "--lockfile-only", "--ignore-scripts"],
        "poetry.lock" => &["poetry", "lock", "--no-update"],
        "Gemfile.lock" => &["bundle", "lock"],
        "go.sum" => &["go", "mod", "tidy"],
        "composer.lock" => &["composer", "update", "--lock", "--no-scripts", "--no-install"],
        _ => return None,
    };
    Some(argv)
}

/// Partition `paths` using glob `patterns` for generated files
///
/// A pattern matches either the whole path or the file name.
pub fn partition(paths: &[String], patterns: &[String]) -> ConflictPartition {
    debug!(count = paths.len(), "partition: called");
    let compiled: Vec<Pattern> = patterns
        .iter()
        .filter_map(|p| match Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!(pattern = %p, error = %e, "Ignoring invalid generated-file pattern");
                None
            }
        })
        .collect();

    let mut out = ConflictPartition::default();
    for path in paths {
        let name = path.rsplit('/').next().unwrap_or(path);
        if compiled.iter().any(|p| p.matches(path) || p.matches(name)) {
            out.generated.push(path.clone());
        } else {
            out.human.push(path.clone());
        }
    }
    out
}
