//! Core SessionStore implementation

use eyre::{Context, Result};
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::lessons::{LessonEntry, render_lessons_markdown};
use crate::{DOCUMENT_SUFFIX, LESSONS_SUFFIX, LOCK_SUFFIX};

/// Identifier of a session document (`owner__repo__pr-N`)
pub type SessionKey = String;

/// Summary of a stored session for listings
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Session key
    pub key: SessionKey,
    /// Last modification time (unix ms)
    pub updated_at: i64,
    /// Size of the session document in bytes
    pub size_bytes: u64,
    /// Number of journaled lessons
    pub lesson_count: usize,
}

/// Exclusive advisory lock on one session
///
/// Held by the resolution loop for the lifetime of a run so that only one
/// process writes a given session. Released when dropped.
#[derive(Debug)]
pub struct SessionLock {
    file: fs::File,
    path: PathBuf,
}

impl SessionLock {
    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "Failed to release session lock");
        }
    }
}

/// File-backed store of session documents and lesson journals
#[derive(Debug, Clone)]
pub struct SessionStore {
    /// Base path for storage
    base_path: PathBuf,
}

impl SessionStore {
    /// Open or create a session store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).context("Failed to create session store directory")?;
        debug!(?base_path, "Opened session store");
        Ok(Self { base_path })
    }

    /// Build the session key for a pull request
    pub fn key_for(owner: &str, repo: &str, number: u64) -> SessionKey {
        let clean = |s: &str| {
            s.chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
                .collect::<String>()
        };
        format!("{}__{}__pr-{}", clean(owner), clean(repo), number)
    }

    /// Base directory of the store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn document_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}{}", key, DOCUMENT_SUFFIX))
    }

    fn lessons_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}{}", key, LESSONS_SUFFIX))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}{}", key, LOCK_SUFFIX))
    }

    /// Take the exclusive lock for a session
    ///
    /// Fails immediately if another process holds it.
    pub fn lock(&self, key: &str) -> Result<SessionLock> {
        let path = self.lock_path(key);
        debug!(key, path = %path.display(), "lock: called");
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .context(format!("Failed to open lock file {}", path.display()))?;

        file.try_lock_exclusive()
            .map_err(|_| eyre::eyre!("Session {} is locked by another run ({})", key, path.display()))?;

        Ok(SessionLock { file, path })
    }

    /// Load a session document, `None` if it does not exist yet
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.document_path(key);
        debug!(key, path = %path.display(), "load: called");
        if !path.exists() {
            debug!(key, "load: no document");
            return Ok(None);
        }

        let content = fs::read_to_string(&path).context(format!("Failed to read session {}", path.display()))?;
        let value = serde_json::from_str(&content).context(format!("Failed to parse session {}", path.display()))?;
        Ok(Some(value))
    }

    /// Save a session document
    ///
    /// Writes a temporary file next to the document and renames it into place.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.document_path(key);
        let tmp = self.base_path.join(format!(".{}.{}.tmp", key, Uuid::now_v7()));
        debug!(key, path = %path.display(), "save: called");

        let content = serde_json::to_string_pretty(value)?;
        {
            let mut file = fs::File::create(&tmp).context(format!("Failed to create {}", tmp.display()))?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path).context(format!("Failed to move session into place at {}", path.display()))?;
        Ok(())
    }

    /// Append a lesson to the session journal
    pub fn append_lesson(&self, key: &str, lesson: &LessonEntry) -> Result<()> {
        let path = self.lessons_path(key);
        debug!(key, scope = %lesson.scope, "append_lesson: called");
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context(format!("Failed to open lesson journal {}", path.display()))?;
        let line = serde_json::to_string(lesson)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Read all lessons for a session, oldest first
    ///
    /// Lines that fail to parse are skipped.
    pub fn read_lessons(&self, key: &str) -> Result<Vec<LessonEntry>> {
        let path = self.lessons_path(key);
        debug!(key, "read_lessons: called");
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(fs::File::open(&path)?);
        let mut lessons = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LessonEntry>(&line) {
                Ok(lesson) => lessons.push(lesson),
                Err(e) => warn!(key, line = idx + 1, error = %e, "Skipping malformed lesson"),
            }
        }
        Ok(lessons)
    }

    /// Render the lesson journal as Markdown
    pub fn export_lessons_markdown(&self, key: &str) -> Result<String> {
        let lessons = self.read_lessons(key)?;
        Ok(render_lessons_markdown(key, &lessons))
    }

    /// List all stored sessions
    pub fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut sessions = Vec::new();

        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || name.ends_with(LESSONS_SUFFIX) {
                continue;
            }
            let Some(key) = name.strip_suffix(DOCUMENT_SUFFIX) else {
                continue;
            };

            let meta = entry.metadata()?;
            let updated_at = meta
                .modified()
                .ok()
                .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp_millis())
                .unwrap_or(0);
            let lesson_count = self.read_lessons(key).map(|l| l.len()).unwrap_or(0);

            sessions.push(SessionSummary {
                key: key.to_string(),
                updated_at,
                size_bytes: meta.len(),
                lesson_count,
            });
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    /// Delete a session document and its journal
    pub fn delete(&self, key: &str) -> Result<()> {
        for path in [self.document_path(key), self.lessons_path(key), self.lock_path(key)] {
            if path.exists() {
                fs::remove_file(&path).context(format!("Failed to remove {}", path.display()))?;
            }
        }
        info!(key, "Deleted session");
        Ok(())
    }
}
