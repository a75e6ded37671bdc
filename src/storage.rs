//! Storage collaborator contracts and in-process implementations.
//!
//! Two traits split the concerns: `CourseStore` holds the growing course
//! aggregate, `CheckpointStore` holds resumable run snapshots. `MemoryStore`
//! implements both for tests and for embedders that persist elsewhere;
//! `JsonCheckpointFile` persists checkpoints to a single JSON file.

use crate::errors::StorageError;
use crate::pipeline::ChapterResult;
use crate::service::AssessmentItem;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

/// Lifecycle status of the course aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    /// Nothing generated yet.
    #[default]
    Empty,
    /// A synthesis run is in progress.
    Generating,
    /// All chapters generated.
    Complete,
    /// The run stalled; some chapters are missing.
    Partial,
    /// The run was cancelled; committed chapters are preserved.
    Cancelled,
}

/// Point-in-time snapshot of run progress, suitable for persistence and
/// later rehydration of the scheduler's run state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub curriculum_id: Uuid,
    pub deck_id: String,
    pub completed_chapter_ids: BTreeSet<String>,
    pub summaries: BTreeMap<String, String>,
    pub retry_counts: BTreeMap<String, u32>,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Number of completed chapters in the snapshot.
    pub fn completed_count(&self) -> usize {
        self.completed_chapter_ids.len()
    }
}

/// One chapter as stored in the course aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChapter {
    pub chapter_id: String,
    pub content: String,
    pub assessments: Vec<AssessmentItem>,
}

/// The course aggregate collaborator.
#[async_trait]
pub trait CourseStore: Send + Sync {
    /// Atomically append one finished chapter to the deck.
    async fn append_chapter_result(
        &self,
        deck_id: &str,
        chapter_id: &str,
        result: &ChapterResult,
    ) -> Result<(), StorageError>;

    /// Replace a stored chapter's content (audit refinement).
    async fn update_chapter_content(
        &self,
        deck_id: &str,
        chapter_id: &str,
        content: &str,
    ) -> Result<(), StorageError>;

    /// Read back a stored chapter's content.
    async fn chapter_content(&self, deck_id: &str, chapter_id: &str)
    -> Result<String, StorageError>;

    /// Record the deck's lifecycle status.
    async fn set_course_status(
        &self,
        deck_id: &str,
        status: CourseStatus,
    ) -> Result<(), StorageError>;
}

/// The checkpoint persistence collaborator.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a snapshot, replacing any earlier one for the curriculum.
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StorageError>;

    /// Load the latest snapshot for a curriculum, if any.
    async fn load_checkpoint(&self, curriculum_id: Uuid)
    -> Result<Option<Checkpoint>, StorageError>;
}

#[derive(Debug, Default)]
struct DeckRecord {
    status: CourseStatus,
    chapters: Vec<StoredChapter>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    decks: HashMap<String, DeckRecord>,
    checkpoints: HashMap<Uuid, Checkpoint>,
}

/// In-process store implementing both collaborator traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Stored chapters for a deck, in commit order.
    pub fn deck_chapters(&self, deck_id: &str) -> Vec<StoredChapter> {
        self.lock()
            .map(|inner| {
                inner
                    .decks
                    .get(deck_id)
                    .map(|d| d.chapters.clone())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Current status of a deck.
    pub fn course_status(&self, deck_id: &str) -> CourseStatus {
        self.lock()
            .map(|inner| {
                inner
                    .decks
                    .get(deck_id)
                    .map(|d| d.status)
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Number of checkpoints currently held.
    pub fn checkpoint_count(&self) -> usize {
        self.lock().map(|inner| inner.checkpoints.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CourseStore for MemoryStore {
    async fn append_chapter_result(
        &self,
        deck_id: &str,
        chapter_id: &str,
        result: &ChapterResult,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let deck = inner.decks.entry(deck_id.to_string()).or_default();
        deck.chapters.push(StoredChapter {
            chapter_id: chapter_id.to_string(),
            content: result.content.clone(),
            assessments: result.assessments.clone(),
        });
        Ok(())
    }

    async fn update_chapter_content(
        &self,
        deck_id: &str,
        chapter_id: &str,
        content: &str,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let deck = inner
            .decks
            .get_mut(deck_id)
            .ok_or_else(|| StorageError::DeckNotFound(deck_id.to_string()))?;
        let chapter = deck
            .chapters
            .iter_mut()
            .find(|c| c.chapter_id == chapter_id)
            .ok_or_else(|| StorageError::ChapterNotFound {
                deck: deck_id.to_string(),
                chapter: chapter_id.to_string(),
            })?;
        chapter.content = content.to_string();
        Ok(())
    }

    async fn chapter_content(
        &self,
        deck_id: &str,
        chapter_id: &str,
    ) -> Result<String, StorageError> {
        let inner = self.lock()?;
        let deck = inner
            .decks
            .get(deck_id)
            .ok_or_else(|| StorageError::DeckNotFound(deck_id.to_string()))?;
        deck.chapters
            .iter()
            .find(|c| c.chapter_id == chapter_id)
            .map(|c| c.content.clone())
            .ok_or_else(|| StorageError::ChapterNotFound {
                deck: deck_id.to_string(),
                chapter: chapter_id.to_string(),
            })
    }

    async fn set_course_status(
        &self,
        deck_id: &str,
        status: CourseStatus,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        inner.decks.entry(deck_id.to_string()).or_default().status = status;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        inner
            .checkpoints
            .insert(checkpoint.curriculum_id, checkpoint.clone());
        Ok(())
    }

    async fn load_checkpoint(
        &self,
        curriculum_id: Uuid,
    ) -> Result<Option<Checkpoint>, StorageError> {
        let inner = self.lock()?;
        Ok(inner.checkpoints.get(&curriculum_id).cloned())
    }
}

/// File-backed checkpoint store: one JSON file holding the latest snapshot
/// per curriculum id.
#[derive(Debug)]
pub struct JsonCheckpointFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonCheckpointFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<HashMap<Uuid, Checkpoint>, StorageError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_all(&self, checkpoints: &HashMap<Uuid, Checkpoint>) -> Result<(), StorageError> {
        let content = serde_json::to_string_pretty(checkpoints)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for JsonCheckpointFile {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::LockPoisoned)?;
        let mut checkpoints = self.read_all()?;
        checkpoints.insert(checkpoint.curriculum_id, checkpoint.clone());
        self.write_all(&checkpoints)
    }

    async fn load_checkpoint(
        &self,
        curriculum_id: Uuid,
    ) -> Result<Option<Checkpoint>, StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(self.read_all()?.get(&curriculum_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(content: &str, summary: &str) -> ChapterResult {
        ChapterResult {
            content: content.to_string(),
            summary: summary.to_string(),
            assessments: vec![AssessmentItem {
                question: "q".into(),
                answer: "a".into(),
                explanation: None,
            }],
        }
    }

    fn checkpoint(curriculum_id: Uuid, completed: &[&str]) -> Checkpoint {
        Checkpoint {
            curriculum_id,
            deck_id: "deck-1".into(),
            completed_chapter_ids: completed.iter().map(|s| s.to_string()).collect(),
            summaries: completed
                .iter()
                .map(|s| (s.to_string(), format!("summary of {s}")))
                .collect(),
            retry_counts: BTreeMap::new(),
            saved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let store = MemoryStore::new();
        store
            .append_chapter_result("deck-1", "ch-a", &result("content a", "sum a"))
            .await
            .unwrap();
        store
            .append_chapter_result("deck-1", "ch-b", &result("content b", "sum b"))
            .await
            .unwrap();

        let chapters = store.deck_chapters("deck-1");
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].chapter_id, "ch-a");
        assert_eq!(
            store.chapter_content("deck-1", "ch-b").await.unwrap(),
            "content b"
        );
    }

    #[tokio::test]
    async fn test_update_chapter_content() {
        let store = MemoryStore::new();
        store
            .append_chapter_result("deck-1", "ch-a", &result("original", "s"))
            .await
            .unwrap();
        store
            .update_chapter_content("deck-1", "ch-a", "refined")
            .await
            .unwrap();
        assert_eq!(
            store.chapter_content("deck-1", "ch-a").await.unwrap(),
            "refined"
        );
    }

    #[tokio::test]
    async fn test_missing_deck_and_chapter_errors() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.chapter_content("nope", "ch-a").await,
            Err(StorageError::DeckNotFound(_))
        ));

        store
            .append_chapter_result("deck-1", "ch-a", &result("c", "s"))
            .await
            .unwrap();
        assert!(matches!(
            store.update_chapter_content("deck-1", "ch-x", "c").await,
            Err(StorageError::ChapterNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_course_status_transitions() {
        let store = MemoryStore::new();
        assert_eq!(store.course_status("deck-1"), CourseStatus::Empty);
        store
            .set_course_status("deck-1", CourseStatus::Generating)
            .await
            .unwrap();
        assert_eq!(store.course_status("deck-1"), CourseStatus::Generating);
        store
            .set_course_status("deck-1", CourseStatus::Complete)
            .await
            .unwrap();
        assert_eq!(store.course_status("deck-1"), CourseStatus::Complete);
    }

    #[tokio::test]
    async fn test_checkpoint_replaces_earlier_snapshot() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.save_checkpoint(&checkpoint(id, &["a"])).await.unwrap();
        store
            .save_checkpoint(&checkpoint(id, &["a", "b"]))
            .await
            .unwrap();

        assert_eq!(store.checkpoint_count(), 1);
        let loaded = store.load_checkpoint(id).await.unwrap().unwrap();
        assert_eq!(loaded.completed_count(), 2);
    }

    #[tokio::test]
    async fn test_load_missing_checkpoint_is_none() {
        let store = MemoryStore::new();
        assert!(store.load_checkpoint(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_checkpoint_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        let id = Uuid::new_v4();

        {
            let store = JsonCheckpointFile::new(path.clone());
            store.save_checkpoint(&checkpoint(id, &["a", "b"])).await.unwrap();
        }

        // Fresh handle reads what the first one wrote.
        let store = JsonCheckpointFile::new(path);
        let loaded = store.load_checkpoint(id).await.unwrap().unwrap();
        assert_eq!(loaded.completed_count(), 2);
        assert_eq!(loaded.summaries.get("a").unwrap(), "summary of a");
        assert!(store.load_checkpoint(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_checkpoint_file_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCheckpointFile::new(dir.path().join("absent.json"));
        assert!(store.load_checkpoint(Uuid::new_v4()).await.unwrap().is_none());
    }
}
