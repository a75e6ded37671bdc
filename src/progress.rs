//! Run progress events for the presentation layer.
//!
//! The presentation collaborator consumes these over an optional mpsc
//! channel; a run with no channel attached emits nothing. Streaming draft
//! text travels separately through `stream::StreamHub`.

use crate::scheduler::RunStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Pipeline phase of one chapter, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterPhase {
    /// Streaming draft in progress.
    Drafting,
    /// Cleaning the draft into final content.
    Finalizing,
    /// Fact-check and refinement pass.
    Auditing,
    /// Splicing supplementary visual material.
    Illustrating,
    /// Generating assessment items.
    Assessing,
    /// Committed to the course aggregate.
    Complete,
    /// This attempt failed; the scheduler may retry.
    Failed,
}

impl ChapterPhase {
    /// Check if the phase ends the chapter's current attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Events emitted during a synthesis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A chapter moved to a new pipeline phase.
    ChapterPhase {
        chapter_id: String,
        phase: ChapterPhase,
    },
    /// A failed chapter is eligible for another attempt.
    ChapterRetryScheduled { chapter_id: String, retries: u32 },
    /// A progress checkpoint was persisted after a commit.
    CheckpointSaved {
        curriculum_id: Uuid,
        completed: usize,
    },
    /// The scheduler drained.
    RunCompleted {
        status: RunStatus,
        completed: usize,
        unresolved: usize,
    },
}

/// Fan-out handle for progress events.
///
/// Sends are best-effort: a full or closed channel drops the event rather
/// than stalling the run.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSink {
    /// A sink delivering into the given channel.
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emit an event if a channel is attached.
    pub async fn emit(&self, event: ProgressEvent) {
        if let Some(ref tx) = self.tx {
            tx.send(event).await.ok();
        }
    }

    /// Shorthand for the common phase-transition event.
    pub async fn phase(&self, chapter_id: &str, phase: ChapterPhase) {
        self.emit(ProgressEvent::ChapterPhase {
            chapter_id: chapter_id.to_string(),
            phase,
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_phases() {
        assert!(ChapterPhase::Complete.is_terminal());
        assert!(ChapterPhase::Failed.is_terminal());
        assert!(!ChapterPhase::Drafting.is_terminal());
        assert!(!ChapterPhase::Assessing.is_terminal());
    }

    #[test]
    fn test_event_serialization_is_snake_case() {
        let event = ProgressEvent::ChapterPhase {
            chapter_id: "ch-limits".into(),
            phase: ChapterPhase::Drafting,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"chapter_phase\""));
        assert!(json.contains("\"drafting\""));
    }

    #[tokio::test]
    async fn test_sink_delivers_when_attached() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = ProgressSink::new(tx);
        sink.phase("ch-a", ChapterPhase::Finalizing).await;

        match rx.recv().await.unwrap() {
            ProgressEvent::ChapterPhase { chapter_id, phase } => {
                assert_eq!(chapter_id, "ch-a");
                assert_eq!(phase, ChapterPhase::Finalizing);
            }
            other => panic!("Unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disabled_sink_discards() {
        let sink = ProgressSink::disabled();
        // Must not hang or panic.
        sink.phase("ch-a", ChapterPhase::Complete).await;
    }

    #[tokio::test]
    async fn test_closed_channel_does_not_stall() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = ProgressSink::new(tx);
        sink.phase("ch-a", ChapterPhase::Drafting).await;
    }
}
