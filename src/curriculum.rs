//! Curriculum and chapter specifications, plus the ingestion boundary.
//!
//! The planning operation of the content service returns loosely structured
//! text. `parse_curriculum` is the validation boundary: it digs the JSON
//! payload out of the response, deserializes it, and rejects anything that
//! does not form a coherent curriculum as `ServiceError::Malformed`.
//! Prerequisite cycles are *not* rejected here; the scheduler detects them
//! at run time and reports a stall instead of hanging.

use crate::errors::ServiceError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// The full specification of a course: a terminology lock and an ordered
/// set of chapter specs. Immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurriculumSpec {
    /// Stable id minted at ingestion, used to key checkpoints.
    pub id: Uuid,
    /// Subject the curriculum was planned from.
    pub topic: String,
    /// Course title.
    pub name: String,
    /// One-paragraph course description.
    pub description: String,
    /// Term -> canonical definition, used to keep chapters terminologically
    /// consistent.
    #[serde(default)]
    pub shared_dictionary: BTreeMap<String, String>,
    /// Chapters in curriculum order.
    pub chapters: Vec<ChapterSpec>,
}

impl CurriculumSpec {
    /// Number of chapters.
    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    /// Check if the curriculum has no chapters.
    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    /// Look up a chapter by id.
    pub fn chapter(&self, id: &str) -> Option<&ChapterSpec> {
        self.chapters.iter().find(|c| c.id == id)
    }

    /// All chapter ids in curriculum order.
    pub fn chapter_ids(&self) -> Vec<String> {
        self.chapters.iter().map(|c| c.id.clone()).collect()
    }
}

/// One unit of generated content with its own prerequisites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSpec {
    /// Unique within the curriculum.
    pub id: String,
    /// Human-readable chapter title.
    pub title: String,
    /// What the learner should be able to do afterwards.
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    /// Topics the chapter covers, in teaching order.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Chapter ids that must complete before this one is dispatched.
    #[serde(default)]
    pub prerequisite_ids: Vec<String>,
}

/// Payload shape of a planning response, before an id is minted.
#[derive(Debug, Deserialize)]
struct CurriculumPayload {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    shared_dictionary: BTreeMap<String, String>,
    chapters: Vec<ChapterSpec>,
}

/// Parse a planning response into a validated `CurriculumSpec`.
///
/// Accepts raw JSON, fenced ```json blocks, or JSON embedded in prose.
pub fn parse_curriculum(raw: &str, topic: &str) -> Result<CurriculumSpec, ServiceError> {
    let json = extract_json(raw)
        .ok_or_else(|| ServiceError::Malformed("no JSON object in planning response".into()))?;

    let payload: CurriculumPayload = serde_json::from_str(&json)
        .map_err(|e| ServiceError::Malformed(format!("planning response did not parse: {e}")))?;

    validate_chapters(&payload.chapters)?;

    Ok(CurriculumSpec {
        id: Uuid::new_v4(),
        topic: topic.to_string(),
        name: payload.name,
        description: payload.description,
        shared_dictionary: payload.shared_dictionary,
        chapters: payload.chapters,
    })
}

/// Structural validation shared by ingestion.
///
/// Rejects empty curricula, blank or duplicate ids, and prerequisites that
/// reference chapters outside the curriculum. Cycles pass: they are a
/// runtime stall, not a parse failure.
fn validate_chapters(chapters: &[ChapterSpec]) -> Result<(), ServiceError> {
    if chapters.is_empty() {
        return Err(ServiceError::Malformed("curriculum has no chapters".into()));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for chapter in chapters {
        if chapter.id.trim().is_empty() {
            return Err(ServiceError::Malformed(format!(
                "chapter '{}' has a blank id",
                chapter.title
            )));
        }
        if !seen.insert(chapter.id.as_str()) {
            return Err(ServiceError::Malformed(format!(
                "duplicate chapter id '{}'",
                chapter.id
            )));
        }
    }

    for chapter in chapters {
        for prereq in &chapter.prerequisite_ids {
            if !seen.contains(prereq.as_str()) {
                return Err(ServiceError::Malformed(format!(
                    "chapter '{}' references unknown prerequisite '{}'",
                    chapter.id, prereq
                )));
            }
        }
    }

    Ok(())
}

/// Extract a JSON object from text that may contain other content.
///
/// Prefers a fenced ```json block; falls back to brace-counting for the
/// outermost object.
pub fn extract_json(text: &str) -> Option<String> {
    if let Some(start) = text.find("```json") {
        let after = &text[start + 7..];
        if let Some(end) = after.find("```") {
            return Some(after[..end].trim().to_string());
        }
    }

    let start = text.find('{')?;
    let mut depth = 0;
    let mut end = start;

    for (i, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = start + i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    if depth == 0 && end > start {
        Some(text[start..end].to_string())
    } else {
        None
    }
}
