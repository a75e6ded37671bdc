//! Run state owned by the scheduler, and the final run report.
//!
//! `RunState` is mutated only by the scheduler task: pipeline outcomes
//! funnel through a channel, so no lock guards it. Its mutating methods
//! enforce the run invariants (monotone completion, bounded active set,
//! bounded retry counts) rather than trusting callers.

use crate::config::duration_ms;
use crate::storage::Checkpoint;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Scheduling state of one chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterRunState {
    /// Waiting for prerequisites or capacity.
    Pending,
    /// A pipeline attempt is running.
    Active,
    /// Committed to the course aggregate.
    Complete,
    /// Failed but still inside the retry budget.
    FailedRetryable { retries: u32 },
    /// Retry budget exhausted; excluded from all future ready-sets.
    FailedExhausted,
}

impl ChapterRunState {
    /// Check if the chapter will never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::FailedExhausted)
    }
}

/// Terminal status of a synthesis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every chapter completed.
    Done,
    /// No chapter ready and none active, with chapters remaining.
    Stalled,
    /// The cancellation signal stopped the run early.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => write!(f, "done"),
            Self::Stalled => write!(f, "stalled"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a chapter never completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// Its own attempts exhausted the retry budget.
    RetriesExhausted,
    /// A transitive prerequisite failed permanently.
    PrerequisiteUnresolved { blocking: String },
    /// It sits in (or downstream of) a prerequisite cycle.
    DependencyCycle,
    /// The run was cancelled before it could complete.
    RunCancelled,
}

/// One chapter left incomplete, with its last known retry state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnresolvedChapter {
    pub chapter_id: String,
    pub retries: u32,
    pub reason: UnresolvedReason,
}

/// Final report of a synthesis run. The run always terminates and always
/// yields one of these, however partial the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisReport {
    pub curriculum_id: Uuid,
    pub deck_id: String,
    pub status: RunStatus,
    /// Completed chapters in commit order.
    pub completed_chapter_ids: Vec<String>,
    /// Per-chapter archival summaries.
    pub summaries: BTreeMap<String, String>,
    /// Chapters that never completed, with reasons.
    pub unresolved: Vec<UnresolvedChapter>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl SynthesisReport {
    /// Check if every chapter completed.
    pub fn is_fully_complete(&self) -> bool {
        self.status == RunStatus::Done && self.unresolved.is_empty()
    }

    /// Number of completed chapters.
    pub fn completed_count(&self) -> usize {
        self.completed_chapter_ids.len()
    }
}

/// Mutable run state. Single writer: the scheduler task.
#[derive(Debug)]
pub struct RunState {
    completed: BTreeSet<String>,
    completion_order: Vec<String>,
    active: BTreeSet<String>,
    retry_counts: BTreeMap<String, u32>,
    summaries: BTreeMap<String, String>,
    max_concurrency: usize,
    max_retries: u32,
}

impl RunState {
    /// Fresh state for a new run.
    pub fn new(max_concurrency: usize, max_retries: u32) -> Self {
        Self {
            completed: BTreeSet::new(),
            completion_order: Vec::new(),
            active: BTreeSet::new(),
            retry_counts: BTreeMap::new(),
            summaries: BTreeMap::new(),
            max_concurrency: max_concurrency.max(1),
            max_retries,
        }
    }

    /// Rehydrate state from a persisted checkpoint.
    pub fn from_checkpoint(checkpoint: &Checkpoint, max_concurrency: usize, max_retries: u32) -> Self {
        Self {
            completed: checkpoint.completed_chapter_ids.clone(),
            completion_order: checkpoint.completed_chapter_ids.iter().cloned().collect(),
            active: BTreeSet::new(),
            retry_counts: checkpoint.retry_counts.clone(),
            summaries: checkpoint.summaries.clone(),
            max_concurrency: max_concurrency.max(1),
            max_retries,
        }
    }

    /// Completed chapter ids.
    pub fn completed_ids(&self) -> &BTreeSet<String> {
        &self.completed
    }

    /// Completed chapters in commit order.
    pub fn completion_order(&self) -> &[String] {
        &self.completion_order
    }

    /// Per-chapter summaries recorded so far.
    pub fn summaries(&self) -> &BTreeMap<String, String> {
        &self.summaries
    }

    /// Summary for one chapter, if it completed.
    pub fn summary(&self, chapter_id: &str) -> Option<&str> {
        self.summaries.get(chapter_id).map(String::as_str)
    }

    /// Current retry count for a chapter.
    pub fn retry_count(&self, chapter_id: &str) -> u32 {
        self.retry_counts.get(chapter_id).copied().unwrap_or(0)
    }

    pub fn is_completed(&self, chapter_id: &str) -> bool {
        self.completed.contains(chapter_id)
    }

    pub fn is_active(&self, chapter_id: &str) -> bool {
        self.active.contains(chapter_id)
    }

    /// Check if the chapter's retry budget is spent.
    pub fn is_exhausted(&self, chapter_id: &str) -> bool {
        self.retry_count(chapter_id) >= self.max_retries
    }

    /// Number of currently active chapters.
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Number of completed chapters.
    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    /// Remaining dispatch capacity.
    pub fn capacity(&self) -> usize {
        self.max_concurrency.saturating_sub(self.active.len())
    }

    /// Scheduling state of one chapter.
    pub fn chapter_state(&self, chapter_id: &str) -> ChapterRunState {
        if self.completed.contains(chapter_id) {
            ChapterRunState::Complete
        } else if self.active.contains(chapter_id) {
            ChapterRunState::Active
        } else if self.is_exhausted(chapter_id) {
            ChapterRunState::FailedExhausted
        } else {
            match self.retry_count(chapter_id) {
                0 => ChapterRunState::Pending,
                retries => ChapterRunState::FailedRetryable { retries },
            }
        }
    }

    /// Admit a chapter to the active set. Returns false when the chapter is
    /// not admissible (already completed/active, or no capacity left).
    pub fn mark_active(&mut self, chapter_id: &str) -> bool {
        if self.completed.contains(chapter_id)
            || self.active.contains(chapter_id)
            || self.capacity() == 0
        {
            debug_assert!(false, "inadmissible dispatch of {chapter_id}");
            return false;
        }
        self.active.insert(chapter_id.to_string());
        true
    }

    /// Record a successful commit. Completion is monotone: a chapter is
    /// added at most once and never removed.
    pub fn mark_completed(&mut self, chapter_id: &str, summary: String) {
        self.active.remove(chapter_id);
        if self.completed.insert(chapter_id.to_string()) {
            self.completion_order.push(chapter_id.to_string());
            self.summaries.entry(chapter_id.to_string()).or_insert(summary);
        }
    }

    /// Record a failed attempt; returns the new retry count.
    pub fn mark_failed(&mut self, chapter_id: &str) -> u32 {
        self.active.remove(chapter_id);
        let count = self.retry_counts.entry(chapter_id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Release an active chapter without counting the attempt (cancelled).
    pub fn release(&mut self, chapter_id: &str) {
        self.active.remove(chapter_id);
    }

    /// Snapshot the resumable tuple.
    pub fn checkpoint(&self, curriculum_id: Uuid, deck_id: &str) -> Checkpoint {
        Checkpoint {
            curriculum_id,
            deck_id: deck_id.to_string(),
            completed_chapter_ids: self.completed.clone(),
            summaries: self.summaries.clone(),
            retry_counts: self.retry_counts.clone(),
            saved_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_set_is_bounded() {
        let mut state = RunState::new(2, 3);
        assert!(state.mark_active("a"));
        assert!(state.mark_active("b"));
        assert_eq!(state.capacity(), 0);
        // Third dispatch would exceed the bound.
        assert_eq!(state.active_len(), 2);
    }

    #[test]
    fn test_completed_chapter_is_not_readmitted() {
        let mut state = RunState::new(3, 3);
        state.mark_active("a");
        state.mark_completed("a", "summary".into());
        assert!(state.is_completed("a"));
        assert!(!state.is_active("a"));
        // Completion is monotone: a second completion changes nothing.
        state.mark_completed("a", "other summary".into());
        assert_eq!(state.completion_order(), &["a".to_string()]);
        assert_eq!(state.summary("a"), Some("summary"));
    }

    #[test]
    fn test_retry_counting_and_exhaustion() {
        let mut state = RunState::new(3, 3);
        for expected in 1..=3 {
            state.mark_active("a");
            assert_eq!(state.mark_failed("a"), expected);
        }
        assert!(state.is_exhausted("a"));
        assert_eq!(
            state.chapter_state("a"),
            ChapterRunState::FailedExhausted
        );
    }

    #[test]
    fn test_chapter_state_progression() {
        let mut state = RunState::new(3, 3);
        assert_eq!(state.chapter_state("a"), ChapterRunState::Pending);

        state.mark_active("a");
        assert_eq!(state.chapter_state("a"), ChapterRunState::Active);

        state.mark_failed("a");
        assert_eq!(
            state.chapter_state("a"),
            ChapterRunState::FailedRetryable { retries: 1 }
        );

        state.mark_active("a");
        state.mark_completed("a", "s".into());
        assert_eq!(state.chapter_state("a"), ChapterRunState::Complete);
        assert!(state.chapter_state("a").is_terminal());
    }

    #[test]
    fn test_release_does_not_count_a_retry() {
        let mut state = RunState::new(3, 3);
        state.mark_active("a");
        state.release("a");
        assert_eq!(state.retry_count("a"), 0);
        assert!(!state.is_active("a"));
    }

    #[test]
    fn test_checkpoint_roundtrip_restores_progress() {
        let mut state = RunState::new(3, 3);
        state.mark_active("a");
        state.mark_completed("a", "summary a".into());
        state.mark_active("b");
        state.mark_failed("b");

        let curriculum_id = Uuid::new_v4();
        let checkpoint = state.checkpoint(curriculum_id, "deck-1");
        assert_eq!(checkpoint.completed_count(), 1);

        let restored = RunState::from_checkpoint(&checkpoint, 3, 3);
        assert!(restored.is_completed("a"));
        assert!(!restored.is_completed("b"));
        assert_eq!(restored.retry_count("b"), 1);
        assert_eq!(restored.summary("a"), Some("summary a"));
        assert_eq!(restored.active_len(), 0);
    }

    #[test]
    fn test_report_helpers() {
        let report = SynthesisReport {
            curriculum_id: Uuid::new_v4(),
            deck_id: "deck-1".into(),
            status: RunStatus::Stalled,
            completed_chapter_ids: vec!["a".into()],
            summaries: BTreeMap::new(),
            unresolved: vec![UnresolvedChapter {
                chapter_id: "b".into(),
                retries: 3,
                reason: UnresolvedReason::RetriesExhausted,
            }],
            duration: Duration::from_secs(10),
        };
        assert!(!report.is_fully_complete());
        assert_eq!(report.completed_count(), 1);
    }

    #[test]
    fn test_run_status_display() {
        assert_eq!(RunStatus::Done.to_string(), "done");
        assert_eq!(RunStatus::Stalled.to_string(), "stalled");
        assert_eq!(RunStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_unresolved_reason_serialization() {
        let reason = UnresolvedReason::PrerequisiteUnresolved {
            blocking: "ch-a".into(),
        };
        let json = serde_json::to_string(&reason).unwrap();
        assert!(json.contains("prerequisite_unresolved"));
        assert!(json.contains("ch-a"));
    }
}
