//! The seven-stage chapter generation pipeline.
//!
//! One `ChapterPipeline::execute` call is one attempt for one chapter:
//!
//! 1. state synchronization (logical state vector from prerequisite
//!    summaries plus the shared dictionary)
//! 2. streaming draft, the only stage wrapped in the retry policy
//! 3. finalization
//! 4. verification/refinement (optional)
//! 5. enrichment (optional)
//! 6. assessment generation
//! 7. commit
//!
//! The cancellation token is observed at the start of every stage and for
//! the whole of the streaming stage. Retried draft attempts are clean-slate:
//! the stream buffer is reset and the stage-1 state vector is reused
//! unchanged, never the previous attempt's partial output.

use crate::config::SynthesisConfig;
use crate::errors::{PipelineError, ServiceError};
use crate::curriculum::ChapterSpec;
use crate::progress::{ChapterPhase, ProgressSink};
use crate::service::{call_bounded, AssessmentItem, ContentService};
use crate::storage::CourseStore;
use crate::stream::StreamHub;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Everything one pipeline attempt needs, snapshotted at dispatch time.
#[derive(Debug, Clone)]
pub struct ChapterContext {
    pub deck_id: String,
    pub topic: String,
    pub chapter: ChapterSpec,
    /// `(chapter_id, summary)` for each prerequisite, in prerequisite order.
    pub prerequisite_summaries: Vec<(String, String)>,
    pub shared_dictionary: BTreeMap<String, String>,
    /// 1-based attempt number for this chapter.
    pub attempt: u32,
}

/// Product of a successful pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterResult {
    pub content: String,
    pub summary: String,
    pub assessments: Vec<AssessmentItem>,
}

/// How one pipeline attempt settled, reported back to the scheduler.
#[derive(Debug)]
pub enum ChapterOutcome {
    /// Committed; carries the archival summary for the run state.
    Success { chapter_id: String, summary: String },
    /// Failed; counts against the chapter's retry budget.
    Failure {
        chapter_id: String,
        error: PipelineError,
    },
    /// Cooperatively stopped; does not count as a failure.
    Cancelled { chapter_id: String },
}

/// Executes one chapter attempt end to end.
pub struct ChapterPipeline {
    service: Arc<dyn ContentService>,
    store: Arc<dyn CourseStore>,
    streams: Arc<StreamHub>,
    progress: ProgressSink,
    cancel: CancellationToken,
    config: SynthesisConfig,
}

impl ChapterPipeline {
    pub fn new(
        service: Arc<dyn ContentService>,
        store: Arc<dyn CourseStore>,
        streams: Arc<StreamHub>,
        progress: ProgressSink,
        cancel: CancellationToken,
        config: SynthesisConfig,
    ) -> Self {
        Self {
            service,
            store,
            streams,
            progress,
            cancel,
            config,
        }
    }

    /// Run all stages and translate the result into a scheduler outcome.
    pub async fn execute(&self, ctx: ChapterContext) -> ChapterOutcome {
        let chapter_id = ctx.chapter.id.clone();
        match self.run_stages(&ctx).await {
            Ok(summary) => {
                self.progress.phase(&chapter_id, ChapterPhase::Complete).await;
                ChapterOutcome::Success { chapter_id, summary }
            }
            Err(PipelineError::Cancelled) => ChapterOutcome::Cancelled { chapter_id },
            Err(error) => {
                self.progress.phase(&chapter_id, ChapterPhase::Failed).await;
                ChapterOutcome::Failure { chapter_id, error }
            }
        }
    }

    async fn run_stages(&self, ctx: &ChapterContext) -> Result<String, PipelineError> {
        let id = &ctx.chapter.id;
        debug!(chapter = %id, attempt = ctx.attempt, "pipeline attempt starting");

        // 1. State synchronization.
        self.ensure_live()?;
        let state_vector = self
            .call(self.service.build_state_vector(
                &ctx.topic,
                &ctx.prerequisite_summaries,
                &ctx.shared_dictionary,
            ))
            .await?;

        // 2. Streaming draft, retried with backoff. The select keeps the
        // cancellation signal live for the whole stage, including between
        // chunks and during backoff sleeps.
        self.progress.phase(id, ChapterPhase::Drafting).await;
        let draft = tokio::select! {
            _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
            result = self.config.draft_retry.run("stream_chapter_draft", || {
                self.stream_draft(ctx, &state_vector)
            }) => result?,
        };

        // 3. Finalization.
        self.ensure_live()?;
        self.progress.phase(id, ChapterPhase::Finalizing).await;
        let finalized = self
            .call(self.service.finalize_chapter_draft(&ctx.topic, &ctx.chapter, &draft))
            .await?;
        let mut content = finalized.content;
        let summary = finalized.summary;

        // 4. Verification and refinement.
        if self.config.verification_enabled {
            self.ensure_live()?;
            self.progress.phase(id, ChapterPhase::Auditing).await;
            let corrections = self
                .call(self.service.verify_content(&ctx.topic, &content))
                .await?;
            if !corrections.is_empty() {
                debug!(chapter = %id, corrections = corrections.len(), "applying fact-check corrections");
                content = self
                    .call(self.service.refine_content(&content, &corrections))
                    .await?;
            }
        }

        // 5. Enrichment.
        if self.config.enrichment_enabled {
            self.ensure_live()?;
            self.progress.phase(id, ChapterPhase::Illustrating).await;
            if let Some(supplement) = self
                .call(self.service.enrich_content(&ctx.topic, &content))
                .await?
            {
                content = splice_after_heading(&content, &supplement);
            }
        }

        // 6. Assessment generation.
        self.ensure_live()?;
        self.progress.phase(id, ChapterPhase::Assessing).await;
        let batch = self
            .call(self.service.generate_assessments(&ctx.topic, &ctx.chapter, &content))
            .await?;
        content = batch.refined_content;

        // 7. Commit.
        self.ensure_live()?;
        let result = ChapterResult {
            content,
            summary: summary.clone(),
            assessments: batch.assessments,
        };
        self.store
            .append_chapter_result(&ctx.deck_id, id, &result)
            .await?;
        self.streams.close(id);

        Ok(summary)
    }

    /// One clean-slate streaming attempt: reset the feed, consume chunks
    /// until the service closes the stream.
    async fn stream_draft(
        &self,
        ctx: &ChapterContext,
        state_vector: &str,
    ) -> Result<String, ServiceError> {
        let id = &ctx.chapter.id;
        self.streams.restart(id);

        let mut stream = self
            .call_service(self.service.stream_chapter_draft(&ctx.topic, &ctx.chapter, state_vector))
            .await?;

        let mut buffer = String::new();
        loop {
            let next = call_bounded(self.config.service_timeout, async {
                Ok(stream.next().await)
            })
            .await?;

            match next {
                Some(Ok(chunk)) => {
                    buffer.push_str(&chunk);
                    self.streams.publish(id, &chunk);
                }
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }

        if buffer.trim().is_empty() {
            return Err(ServiceError::Malformed("empty draft stream".into()));
        }
        Ok(buffer)
    }

    /// Bound a service call with the configured timeout.
    async fn call_service<T>(
        &self,
        fut: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, ServiceError> {
        call_bounded(self.config.service_timeout, fut).await
    }

    /// Same, lifting the error into a pipeline failure.
    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, PipelineError> {
        Ok(self.call_service(fut).await?)
    }

    fn ensure_live(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Splice supplementary material after the first Markdown heading block.
///
/// Deterministic: the supplement lands after the first line starting with
/// `#`, separated by blank lines; content without headings gets it appended.
pub fn splice_after_heading(content: &str, supplement: &str) -> String {
    let mut lines: Vec<&str> = content.lines().collect();
    let insert_at = lines
        .iter()
        .position(|line| line.trim_start().starts_with('#'))
        .map(|i| i + 1);

    match insert_at {
        Some(i) => {
            lines.insert(i, "");
            lines.insert(i + 1, supplement);
            let mut out = lines.join("\n");
            if content.ends_with('\n') {
                out.push('\n');
            }
            out
        }
        None => {
            let mut out = content.to_string();
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push('\n');
            out.push_str(supplement);
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splice_after_first_heading() {
        let content = "# Limits\n\nA limit describes behavior near a point.\n";
        let spliced = splice_after_heading(content, "![diagram](limits.svg)");
        let lines: Vec<&str> = spliced.lines().collect();
        assert_eq!(lines[0], "# Limits");
        assert_eq!(lines[2], "![diagram](limits.svg)");
        assert!(spliced.contains("behavior near a point"));
    }

    #[test]
    fn test_splice_skips_later_headings() {
        let content = "# One\nbody\n## Two\nmore\n";
        let spliced = splice_after_heading(content, "FIGURE");
        let first = spliced.find("FIGURE").unwrap();
        let second_heading = spliced.find("## Two").unwrap();
        assert!(first < second_heading);
    }

    #[test]
    fn test_splice_without_heading_appends() {
        let content = "plain prose, no headings";
        let spliced = splice_after_heading(content, "FIGURE");
        assert!(spliced.ends_with("FIGURE"));
        assert!(spliced.starts_with("plain prose"));
    }

    #[test]
    fn test_splice_is_deterministic() {
        let content = "# H\nbody\n";
        assert_eq!(
            splice_after_heading(content, "X"),
            splice_after_heading(content, "X")
        );
    }
}
