//! Lesson journal entries

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a lesson applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum LessonScope {
    /// Applies to every prompt in the session
    Global,
    /// Applies to prompts touching this path
    File(String),
}

impl fmt::Display for LessonScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LessonScope::Global => write!(f, "global"),
            LessonScope::File(path) => write!(f, "file:{}", path),
        }
    }
}

/// One journaled lesson
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonEntry {
    pub id: String,
    pub scope: LessonScope,
    pub text: String,
    /// Issue the lesson was learned on, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    /// Unix ms
    pub created_at: i64,
}

impl LessonEntry {
    pub fn new(scope: LessonScope, text: impl Into<String>, issue_id: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            scope,
            text: text.into(),
            issue_id,
            created_at: Utc::now().timestamp_millis(),
        }
    }

    /// Creation time as a timestamp
    pub fn created(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.created_at).single()
    }
}

/// Render lessons as a Markdown document grouped by scope
///
/// Global lessons come first, then file lessons sorted by path.
pub fn render_lessons_markdown(key: &str, lessons: &[LessonEntry]) -> String {
    let mut out = format!("# Lessons for {}\n\n", key);
    if lessons.is_empty() {
        out.push_str("_No lessons recorded._\n");
        return out;
    }

    let global: Vec<&LessonEntry> = lessons.iter().filter(|l| l.scope == LessonScope::Global).collect();
    if !global.is_empty() {
        out.push_str("## Global\n\n");
        for lesson in global {
            push_item(&mut out, lesson);
        }
        out.push('\n');
    }

    let mut paths: Vec<&str> = lessons
        .iter()
        .filter_map(|l| match &l.scope {
            LessonScope::File(p) => Some(p.as_str()),
            LessonScope::Global => None,
        })
        .collect();
    paths.sort();
    paths.dedup();

    for path in paths {
        out.push_str(&format!("## `{}`\n\n", path));
        for lesson in lessons
            .iter()
            .filter(|l| matches!(&l.scope, LessonScope::File(p) if p == path))
        {
            push_item(&mut out, lesson);
        }
        out.push('\n');
    }

    out
}

fn push_item(out: &mut String, lesson: &LessonEntry) {
    let text = lesson.text.replace('\n', " ");
    match &lesson.issue_id {
        Some(issue) => out.push_str(&format!("- {} _({})_\n", text.trim(), issue)),
        None => out.push_str(&format!("- {}\n", text.trim())),
    }
}
