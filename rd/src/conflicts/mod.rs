//! Conflict resolution subsystem
//!
//! Invoked when a merge stops on conflicted paths. Generated files are
//! deleted and regenerated in the [`Sandbox`]; human-authored files go to the
//! editing agent first and then, for anything still carrying markers, to the
//! oracle.

use std::path::Path;
use std::sync::Arc;

use eyre::Result;
use tracing::{debug, info, warn};

use crate::agents::Agent;
use crate::git::{Vcs, has_conflict_markers};
use crate::oracle::Oracle;

mod partition;
mod sandbox;

pub use partition::{ConflictPartition, partition, regen_command_for};
pub use sandbox::{Sandbox, SandboxError, SandboxOutput, minimal_env};

/// Result of one resolution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictOutcome {
    /// Everything resolved and the merge committed
    Resolved { commit: String },
    /// These paths could not be resolved; the merge is left in progress
    Unresolved(Vec<String>),
}

impl ConflictOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ConflictOutcome::Resolved { .. })
    }
}

/// Resolves merge conflicts in one checkout
pub struct ConflictResolver<'a> {
    vcs: &'a dyn Vcs,
    oracle: &'a Oracle,
    agent: Option<(Arc<dyn Agent>, Option<String>)>,
    sandbox: &'a Sandbox,
    generated_patterns: &'a [String],
}

impl<'a> ConflictResolver<'a> {
    pub fn new(vcs: &'a dyn Vcs, oracle: &'a Oracle, sandbox: &'a Sandbox, generated_patterns: &'a [String]) -> Self {
        Self {
            vcs,
            oracle,
            agent: None,
            sandbox,
            generated_patterns,
        }
    }

    /// Hand human-authored conflicts to this agent before the oracle
    pub fn with_agent(mut self, agent: Arc<dyn Agent>, model: Option<String>) -> Self {
        self.agent = Some((agent, model));
        self
    }

    /// Resolve `paths` and commit the merge with `message`
    pub async fn resolve(&self, paths: &[String], merging: &str, message: &str) -> Result<ConflictOutcome> {
        info!(count = paths.len(), %merging, "Resolving merge conflicts");
        let parts = partition(paths, self.generated_patterns);
        debug!(generated = ?parts.generated, human = ?parts.human, "ConflictResolver::resolve: partitioned");

        let mut failed = Vec::new();
        let mut resolved = Vec::new();

        for path in &parts.generated {
            if self.regenerate(path).await {
                resolved.push(path.clone());
            } else {
                failed.push(path.clone());
            }
        }

        if !parts.human.is_empty() {
            self.run_agent(&parts.human, merging).await;
            for path in &parts.human {
                if self.finish_human_file(path).await? {
                    resolved.push(path.clone());
                } else {
                    failed.push(path.clone());
                }
            }
        }

        if !resolved.is_empty() {
            self.vcs.stage(&resolved).await?;
        }

        // Staged files can still be listed when git disagrees with our scan
        for path in self.vcs.conflicted_paths().await? {
            if !failed.contains(&path) {
                warn!(%path, "Still reported as conflicted");
                failed.push(path);
            }
        }

        if !failed.is_empty() {
            warn!(unresolved = ?failed, "Conflict resolution incomplete");
            return Ok(ConflictOutcome::Unresolved(failed));
        }

        let commit = self.vcs.commit(message).await?;
        info!(%commit, "Merge conflicts resolved");
        Ok(ConflictOutcome::Resolved { commit })
    }

    /// Delete and regenerate a generated file
    async fn regenerate(&self, path: &str) -> bool {
        let Some(argv) = regen_command_for(path) else {
            warn!(%path, "No regeneration command for generated file");
            return false;
        };
        if let Err(e) = self.vcs.remove_file(path).await {
            warn!(%path, error = %e, "Could not remove generated file");
            return false;
        }
        let dir = match Path::new(path).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => self.vcs.workdir().join(parent),
            _ => self.vcs.workdir().to_path_buf(),
        };
        match self.sandbox.run(&dir, argv).await {
            Ok(_) => match self.vcs.read_file(path).await {
                Ok(Some(content)) if !has_conflict_markers(&content) => true,
                _ => {
                    warn!(%path, "Regeneration did not produce a clean file");
                    false
                }
            },
            Err(e) => {
                warn!(%path, error = %e, "Regeneration failed");
                false
            }
        }
    }

    async fn run_agent(&self, paths: &[String], merging: &str) {
        let Some((agent, model)) = &self.agent else {
            return;
        };
        let prompt = match self.oracle.prompts().render(
            "conflict-agent",
            &serde_json::json!({ "paths": paths, "base_branch": merging }),
        ) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Could not render conflict prompt");
                return;
            }
        };
        let run = agent.run(self.vcs.workdir(), &prompt, model.as_deref()).await;
        if !run.success {
            warn!(agent = %agent.name(), error = ?run.error, "Agent conflict resolution failed");
        }
    }

    /// Residual check for one human-authored file, escalating to the oracle
    async fn finish_human_file(&self, path: &str) -> Result<bool> {
        let Some(content) = self.vcs.read_file(path).await? else {
            debug!(%path, "Conflicted file deleted, accepting deletion");
            return Ok(true);
        };
        if !has_conflict_markers(&content) {
            return Ok(true);
        }
        match self.oracle.resolve_conflict(path, &content).await {
            Ok(Some(resolved)) => {
                self.vcs.write_file(path, &resolved).await?;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                warn!(%path, error = %e, "Oracle conflict resolution failed");
                Ok(false)
            }
        }
    }
}
