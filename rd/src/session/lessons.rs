//! Lessons fed back into agent prompts

use sessionstore::{LessonEntry, LessonScope};

/// Most lessons included in one prompt
pub const MAX_PROMPT_LESSONS: usize = 12;

/// Lesson texts relevant to `paths`: global ones plus those for any path
///
/// Newest lessons win when there are more than [`MAX_PROMPT_LESSONS`];
/// duplicates are collapsed.
pub fn lessons_for(entries: &[LessonEntry], paths: &[String]) -> Vec<String> {
    let mut texts: Vec<String> = Vec::new();
    for entry in entries.iter().rev() {
        let text = match &entry.scope {
            LessonScope::Global => entry.text.clone(),
            LessonScope::File(path) if paths.iter().any(|p| p == path) => format!("[{}] {}", path, entry.text),
            LessonScope::File(_) => continue,
        };
        if !texts.contains(&text) {
            texts.push(text);
        }
        if texts.len() == MAX_PROMPT_LESSONS {
            break;
        }
    }
    texts.reverse();
    texts
}
