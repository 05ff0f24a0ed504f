//! SessionStore - durable state for pull-request resolution runs
//!
//! Each resolution target (repository + PR number) owns one JSON document
//! holding the session aggregate, plus an append-only lesson journal.
//! The store knows nothing about the shape of the session document; callers
//! pick the type they serialize.
//!
//! # Architecture
//!
//! ```text
//! sessions/
//! ├── owner__repo__pr-42.json            # session document (atomic rename on save)
//! ├── owner__repo__pr-42.lock            # advisory lock held by the running loop
//! └── owner__repo__pr-42.lessons.jsonl   # lesson journal, append-only
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sessionstore::SessionStore;
//!
//! let store = SessionStore::open("~/.local/share/resolvd/sessions")?;
//! let key = SessionStore::key_for("octo", "widgets", 42);
//! let _lock = store.lock(&key)?;
//! store.save(&key, &state)?;
//! ```

pub mod cli;
pub mod config;
mod lessons;
mod store;

pub use lessons::{LessonEntry, LessonScope, render_lessons_markdown};
pub use store::{SessionKey, SessionLock, SessionStore, SessionSummary};

/// Suffix of session documents
pub const DOCUMENT_SUFFIX: &str = ".json";

/// Suffix of lesson journals
pub const LESSONS_SUFFIX: &str = ".lessons.jsonl";

/// Suffix of lock files
pub const LOCK_SUFFIX: &str = ".lock";
