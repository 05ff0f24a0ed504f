//! Persistent session state
//!
//! A [`Session`] owns the state document for one pull request, the store it
//! lives in, and the lock that makes this process its only writer.

use eyre::{Context, Result};
use sessionstore::{LessonEntry, LessonScope, SessionLock, SessionStore};
use tracing::{debug, info, warn};

use crate::domain::{PrRef, now_ms};

mod lessons;
pub mod recovery;
mod state;

pub use lessons::{MAX_PROMPT_LESSONS, lessons_for};
pub use recovery::{parse_review_trailers, restore_from_history, review_trailer};
pub use state::{AttemptOutcome, AttemptStats, CommitCache, ExitReason, Phase, SessionState};

/// Locked, loaded session for one PR
pub struct Session {
    store: SessionStore,
    key: String,
    _lock: SessionLock,
    state: SessionState,
    resumed: bool,
}

impl Session {
    /// Lock and load the session for `pr`, creating it if absent
    pub fn open(store: SessionStore, pr: &PrRef, branch: &str, base_branch: &str, head_sha: &str) -> Result<Self> {
        debug!(%pr, %branch, "Session::open: called");
        let key = pr.session_key();
        let lock = store.lock(&key)?;

        let loaded = match store.load::<SessionState>(&key) {
            Ok(state) => state,
            Err(e) => {
                warn!(%key, error = %e, "Session document unreadable, starting fresh");
                None
            }
        };

        let (state, resumed) = match loaded {
            Some(mut state) => {
                info!(%key, iteration = state.iteration, phase = %state.phase, "Resuming session");
                state.branch = branch.to_string();
                state.base_branch = base_branch.to_string();
                state.exit_reason = None;
                (state, true)
            }
            None => {
                info!(%key, "Starting new session");
                (SessionState::new(pr, branch, base_branch, head_sha), false)
            }
        };

        let session = Self {
            store,
            key,
            _lock: lock,
            state,
            resumed,
        };
        session.save()?;
        Ok(session)
    }

    /// Read a session document without locking it
    pub fn peek(store: &SessionStore, pr: &PrRef) -> Result<Option<SessionState>> {
        store.load(&pr.session_key())
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether state was loaded from a previous run
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    /// Write the document
    pub fn save(&self) -> Result<()> {
        debug!(key = %self.key, phase = %self.state.phase, "Session::save: called");
        let mut snapshot = self.state.clone();
        snapshot.updated_at = now_ms();
        self.store
            .save(&self.key, &snapshot)
            .context(format!("Failed to save session {}", self.key))
    }

    pub fn add_lesson(&self, scope: LessonScope, text: &str, issue_id: Option<&str>) -> Result<()> {
        debug!(key = %self.key, %scope, "Session::add_lesson: called");
        let entry = LessonEntry::new(scope, text.trim(), issue_id.map(String::from));
        self.store.append_lesson(&self.key, &entry)
    }

    /// Lessons relevant to a set of files
    pub fn lessons_for(&self, paths: &[String]) -> Vec<String> {
        match self.store.read_lessons(&self.key) {
            Ok(entries) => lessons_for(&entries, paths),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Could not read lessons");
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ReviewIssue;
    use crate::rotation::{RotationState, ToolModelState};
    use tempfile::TempDir;

    fn pr() -> PrRef {
        PrRef::new("octo", "widgets", 5)
    }

    #[test]
    fn test_fresh_then_resumed() {
        let temp = TempDir::new().unwrap();
        {
            let session = Session::open(SessionStore::open(temp.path()).unwrap(), &pr(), "feat", "main", "abc").unwrap();
            assert!(!session.resumed());
        }
        let session = Session::open(SessionStore::open(temp.path()).unwrap(), &pr(), "feat", "main", "abc").unwrap();
        assert!(session.resumed());
    }

    #[test]
    fn test_second_writer_rejected() {
        let temp = TempDir::new().unwrap();
        let _first = Session::open(SessionStore::open(temp.path()).unwrap(), &pr(), "feat", "main", "abc").unwrap();
        let second = Session::open(SessionStore::open(temp.path()).unwrap(), &pr(), "feat", "main", "abc");
        assert!(second.is_err());
    }

    #[test]
    fn test_resume_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let before = {
            let mut session =
                Session::open(SessionStore::open(temp.path()).unwrap(), &pr(), "feat", "main", "abc").unwrap();
            let state = session.state_mut();
            state.merge_fetched(vec![ReviewIssue::new(1, "a.rs", None, "rev", "x"), ReviewIssue::new(2, "b.rs", None, "rev", "y")]);
            state.iteration = 3;
            state.mark_verified_fixed("c1", "checked");
            state.rotation = RotationState::new(vec![
                ToolModelState::new("claude", vec!["sonnet".to_string(), "opus".to_string()]),
                ToolModelState::new("codex", vec![]),
            ]);
            state.rotation.advance(2);
            state.counters.record_failure();
            state.counters.complete_cycle(3);
            session.save().unwrap();
            session.state().clone()
        };

        let session = Session::open(SessionStore::open(temp.path()).unwrap(), &pr(), "feat", "main", "abc").unwrap();
        let after = session.state();
        assert_eq!(after.rotation, before.rotation);
        assert_eq!(after.counters, before.counters);
        assert_eq!(after.issues, before.issues);
        assert_eq!(after.iteration, 3);
    }

    #[test]
    fn test_lessons_scoped() {
        let temp = TempDir::new().unwrap();
        let session = Session::open(SessionStore::open(temp.path()).unwrap(), &pr(), "feat", "main", "abc").unwrap();
        session.add_lesson(LessonScope::Global, "keep commits small", None).unwrap();
        session
            .add_lesson(LessonScope::File("a.rs".to_string()), "tests live in tests/", Some("c1"))
            .unwrap();
        assert_eq!(session.lessons_for(&[]), vec!["keep commits small"]);
        assert_eq!(session.lessons_for(&["a.rs".to_string()]).len(), 2);
    }
}
