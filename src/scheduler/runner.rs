//! The dependency scheduler: ready-set computation and the run loop.
//!
//! The scheduler owns the run state and is its only writer. Pipeline tasks
//! report outcomes over an mpsc channel; "wait for progress" is a single
//! `recv().await` on that channel rather than a poll interval. The loop
//! terminates when all chapters are complete, when nothing is ready and
//! nothing is active (a stall, the protection against cyclic or
//! unsatisfiable prerequisite graphs), or when cancellation drains the
//! active set.

use crate::config::SynthesisConfig;
use crate::curriculum::CurriculumSpec;
use crate::errors::SynthesisError;
use crate::pipeline::{ChapterContext, ChapterOutcome, ChapterPipeline};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::scheduler::graph::ChapterGraph;
use crate::scheduler::state::{
    RunState, RunStatus, SynthesisReport, UnresolvedChapter, UnresolvedReason,
};
use crate::service::ContentService;
use crate::storage::{Checkpoint, CheckpointStore, CourseStore};
use crate::stream::StreamHub;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives one curriculum through the chapter pipelines.
pub struct Scheduler {
    service: Arc<dyn ContentService>,
    store: Arc<dyn CourseStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    streams: Arc<StreamHub>,
    progress: ProgressSink,
    cancel: CancellationToken,
    config: SynthesisConfig,
}

impl Scheduler {
    pub fn new(
        service: Arc<dyn ContentService>,
        store: Arc<dyn CourseStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: SynthesisConfig,
    ) -> Self {
        Self {
            service,
            store,
            checkpoints,
            streams: Arc::new(StreamHub::new()),
            progress: ProgressSink::disabled(),
            cancel: CancellationToken::new(),
            config,
        }
    }

    /// Attach a progress event channel.
    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressEvent>) -> Self {
        self.progress = ProgressSink::new(tx);
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Share an externally owned stream hub.
    pub fn with_stream_hub(mut self, streams: Arc<StreamHub>) -> Self {
        self.streams = streams;
        self
    }

    /// The hub carrying per-chapter draft streams.
    pub fn stream_hub(&self) -> Arc<StreamHub> {
        self.streams.clone()
    }

    /// The token that cooperatively stops this run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run a curriculum from scratch.
    pub async fn run(
        &self,
        curriculum: &CurriculumSpec,
        deck_id: &str,
    ) -> Result<SynthesisReport, SynthesisError> {
        let state = RunState::new(self.config.max_concurrency, self.config.max_chapter_retries);
        self.drive(curriculum, deck_id, state).await
    }

    /// Resume a curriculum from a persisted checkpoint. Chapters already in
    /// the checkpoint's completed set are never redispatched.
    pub async fn resume(
        &self,
        curriculum: &CurriculumSpec,
        checkpoint: &Checkpoint,
    ) -> Result<SynthesisReport, SynthesisError> {
        if checkpoint.curriculum_id != curriculum.id {
            return Err(SynthesisError::CheckpointMismatch {
                expected: curriculum.id,
                found: checkpoint.curriculum_id,
            });
        }
        let state = RunState::from_checkpoint(
            checkpoint,
            self.config.max_concurrency,
            self.config.max_chapter_retries,
        );
        info!(
            curriculum = %curriculum.id,
            completed = state.completed_len(),
            "resuming synthesis from checkpoint"
        );
        self.drive(curriculum, &checkpoint.deck_id, state).await
    }

    async fn drive(
        &self,
        curriculum: &CurriculumSpec,
        deck_id: &str,
        mut state: RunState,
    ) -> Result<SynthesisReport, SynthesisError> {
        let graph = ChapterGraph::build(&curriculum.chapters)?;
        let started = Instant::now();

        info!(
            curriculum = %curriculum.id,
            chapters = graph.len(),
            max_concurrency = self.config.max_concurrency,
            "synthesis run starting"
        );

        let (outcome_tx, mut outcome_rx) = mpsc::channel::<ChapterOutcome>(graph.len().max(1));

        loop {
            if !self.cancel.is_cancelled() {
                self.dispatch_ready(&graph, &mut state, curriculum, deck_id, &outcome_tx);
            }

            if state.active_len() == 0 {
                break;
            }

            // Wait for at least one pipeline to settle.
            let Some(outcome) = outcome_rx.recv().await else {
                break;
            };
            self.absorb(outcome, &mut state, curriculum, deck_id).await;
        }

        let status = if state.completed_len() == graph.len() {
            RunStatus::Done
        } else if self.cancel.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Stalled
        };

        let report = build_report(
            &graph,
            &state,
            status,
            curriculum,
            deck_id,
            started.elapsed(),
        );

        info!(
            curriculum = %curriculum.id,
            status = %report.status,
            completed = report.completed_count(),
            unresolved = report.unresolved.len(),
            "synthesis run finished"
        );
        self.progress
            .emit(ProgressEvent::RunCompleted {
                status: report.status,
                completed: report.completed_count(),
                unresolved: report.unresolved.len(),
            })
            .await;

        Ok(report)
    }

    /// Dispatch ready chapters, in curriculum order, up to capacity.
    ///
    /// Ready means: not completed, not active, retry budget remaining, and
    /// every prerequisite completed.
    fn dispatch_ready(
        &self,
        graph: &ChapterGraph,
        state: &mut RunState,
        curriculum: &CurriculumSpec,
        deck_id: &str,
        outcome_tx: &mpsc::Sender<ChapterOutcome>,
    ) {
        for index in 0..graph.len() {
            if state.capacity() == 0 {
                break;
            }

            let chapter = graph.chapter(index);
            let id = &chapter.id;
            if state.is_completed(id) || state.is_active(id) || state.is_exhausted(id) {
                continue;
            }
            if !graph.prerequisites_met(index, state.completed_ids()) {
                continue;
            }

            state.mark_active(id);
            let attempt = state.retry_count(id) + 1;
            debug!(chapter = %id, attempt, "dispatching chapter pipeline");

            let prerequisite_summaries = chapter
                .prerequisite_ids
                .iter()
                .filter_map(|p| state.summary(p).map(|s| (p.clone(), s.to_string())))
                .collect();

            let ctx = ChapterContext {
                deck_id: deck_id.to_string(),
                topic: curriculum.topic.clone(),
                chapter: chapter.clone(),
                prerequisite_summaries,
                shared_dictionary: curriculum.shared_dictionary.clone(),
                attempt,
            };

            let pipeline = ChapterPipeline::new(
                self.service.clone(),
                self.store.clone(),
                self.streams.clone(),
                self.progress.clone(),
                self.cancel.clone(),
                self.config.clone(),
            );
            let tx = outcome_tx.clone();
            tokio::spawn(async move {
                let outcome = pipeline.execute(ctx).await;
                tx.send(outcome).await.ok();
            });
        }
    }

    /// Fold one pipeline outcome into the run state.
    async fn absorb(
        &self,
        outcome: ChapterOutcome,
        state: &mut RunState,
        curriculum: &CurriculumSpec,
        deck_id: &str,
    ) {
        match outcome {
            ChapterOutcome::Success { chapter_id, summary } => {
                state.mark_completed(&chapter_id, summary);
                info!(
                    chapter = %chapter_id,
                    completed = state.completed_len(),
                    "chapter committed"
                );

                let checkpoint = state.checkpoint(curriculum.id, deck_id);
                match self.checkpoints.save_checkpoint(&checkpoint).await {
                    Ok(()) => {
                        self.progress
                            .emit(ProgressEvent::CheckpointSaved {
                                curriculum_id: curriculum.id,
                                completed: checkpoint.completed_count(),
                            })
                            .await;
                    }
                    Err(err) => {
                        // The run state stays authoritative; resume just
                        // loses the most recent commit.
                        warn!(chapter = %chapter_id, error = %err, "checkpoint save failed");
                    }
                }
            }
            ChapterOutcome::Failure { chapter_id, error } => {
                let retries = state.mark_failed(&chapter_id);
                if state.is_exhausted(&chapter_id) {
                    warn!(
                        chapter = %chapter_id,
                        retries,
                        error = %error,
                        "chapter permanently failed"
                    );
                } else {
                    warn!(
                        chapter = %chapter_id,
                        retries,
                        error = %error,
                        "chapter attempt failed, eligible for retry"
                    );
                    self.progress
                        .emit(ProgressEvent::ChapterRetryScheduled {
                            chapter_id,
                            retries,
                        })
                        .await;
                }
            }
            ChapterOutcome::Cancelled { chapter_id } => {
                debug!(chapter = %chapter_id, "chapter attempt cancelled");
                state.release(&chapter_id);
            }
        }
    }
}

/// Assemble the final report, classifying every incomplete chapter.
fn build_report(
    graph: &ChapterGraph,
    state: &RunState,
    status: RunStatus,
    curriculum: &CurriculumSpec,
    deck_id: &str,
    duration: std::time::Duration,
) -> SynthesisReport {
    let exhausted: BTreeSet<String> = graph
        .chapters()
        .iter()
        .filter(|c| state.is_exhausted(&c.id))
        .map(|c| c.id.clone())
        .collect();

    let unresolved = graph
        .chapters()
        .iter()
        .enumerate()
        .filter(|(_, c)| !state.is_completed(&c.id))
        .map(|(index, c)| {
            let reason = if state.is_exhausted(&c.id) {
                UnresolvedReason::RetriesExhausted
            } else if let Some(blocking) = graph.blocking_ancestor(index, &exhausted) {
                UnresolvedReason::PrerequisiteUnresolved { blocking }
            } else if status == RunStatus::Cancelled {
                UnresolvedReason::RunCancelled
            } else {
                // Nothing failed, yet the chapter never became ready: its
                // prerequisites form (or sit downstream of) a cycle.
                UnresolvedReason::DependencyCycle
            };
            UnresolvedChapter {
                chapter_id: c.id.clone(),
                retries: state.retry_count(&c.id),
                reason,
            }
        })
        .collect();

    SynthesisReport {
        curriculum_id: curriculum.id,
        deck_id: deck_id.to_string(),
        status,
        completed_chapter_ids: state.completion_order().to_vec(),
        summaries: state.summaries().clone(),
        unresolved,
        duration,
    }
}
