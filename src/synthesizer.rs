//! Top-level course synthesis: plan, schedule, audit, record status.

use crate::auditor::{AuditOutcome, ConsistencyAuditor};
use crate::config::SynthesisConfig;
use crate::curriculum::{parse_curriculum, CurriculumSpec};
use crate::errors::SynthesisError;
use crate::progress::ProgressEvent;
use crate::scheduler::{RunStatus, Scheduler, SynthesisReport};
use crate::service::{call_bounded, ContentService, PlanConstraints};
use crate::storage::{CheckpointStore, CourseStatus, CourseStore};
use crate::stream::StreamHub;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// What to synthesize and where to put it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisRequest {
    /// Subject to build a course for.
    pub topic: String,
    /// Deck the generated chapters are appended to.
    pub deck_id: String,
    /// Planning constraints.
    #[serde(default)]
    pub constraints: PlanConstraints,
}

impl SynthesisRequest {
    pub fn new(topic: &str, deck_id: &str) -> Self {
        Self {
            topic: topic.to_string(),
            deck_id: deck_id.to_string(),
            constraints: PlanConstraints::default(),
        }
    }

    /// Set the planning constraints.
    pub fn with_constraints(mut self, constraints: PlanConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}

/// Everything a finished (or partially finished) run produced.
#[derive(Debug)]
pub struct SynthesisOutcome {
    pub curriculum: CurriculumSpec,
    pub report: SynthesisReport,
    /// Present when the global audit ran.
    pub audit: Option<AuditOutcome>,
}

/// Ties the orchestrator pieces together for the application layer.
pub struct CourseSynthesizer {
    service: Arc<dyn ContentService>,
    store: Arc<dyn CourseStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    streams: Arc<StreamHub>,
    progress_tx: Option<mpsc::Sender<ProgressEvent>>,
    cancel: CancellationToken,
    config: SynthesisConfig,
}

impl CourseSynthesizer {
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
            progress_tx: None,
            cancel: CancellationToken::new(),
            config,
        }
    }

    /// Attach a progress event channel.
    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressEvent>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The hub carrying per-chapter draft streams.
    pub fn stream_hub(&self) -> Arc<StreamHub> {
        self.streams.clone()
    }

    /// The token that cooperatively stops a run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Plan a curriculum for the request and drive it to a course.
    pub async fn synthesize(
        &self,
        request: &SynthesisRequest,
    ) -> Result<SynthesisOutcome, SynthesisError> {
        let raw = call_bounded(
            self.config.service_timeout,
            self.service
                .plan_curriculum(&request.topic, &request.constraints),
        )
        .await
        .map_err(SynthesisError::Planning)?;

        let curriculum =
            parse_curriculum(&raw, &request.topic).map_err(SynthesisError::Planning)?;
        info!(
            curriculum = %curriculum.id,
            name = %curriculum.name,
            chapters = curriculum.len(),
            "curriculum planned"
        );

        self.generate(&curriculum, &request.deck_id).await
    }

    /// Resume a previously planned curriculum from its latest checkpoint.
    pub async fn resume(
        &self,
        curriculum: &CurriculumSpec,
        deck_id: &str,
    ) -> Result<SynthesisOutcome, SynthesisError> {
        let checkpoint = self
            .checkpoints
            .load_checkpoint(curriculum.id)
            .await?
            .ok_or(SynthesisError::CheckpointNotFound(curriculum.id))?;

        self.store
            .set_course_status(deck_id, CourseStatus::Generating)
            .await?;

        let report = self.scheduler().resume(curriculum, &checkpoint).await?;
        self.finish(curriculum.clone(), report).await
    }

    async fn generate(
        &self,
        curriculum: &CurriculumSpec,
        deck_id: &str,
    ) -> Result<SynthesisOutcome, SynthesisError> {
        self.store
            .set_course_status(deck_id, CourseStatus::Generating)
            .await?;

        let report = self.scheduler().run(curriculum, deck_id).await?;
        self.finish(curriculum.clone(), report).await
    }

    async fn finish(
        &self,
        curriculum: CurriculumSpec,
        report: SynthesisReport,
    ) -> Result<SynthesisOutcome, SynthesisError> {
        let auditor =
            ConsistencyAuditor::new(self.service.clone(), self.store.clone(), self.config.clone());
        let audit = if auditor.is_eligible(&report) {
            Some(auditor.run(&curriculum, &report).await)
        } else {
            None
        };

        let status = match report.status {
            RunStatus::Done => CourseStatus::Complete,
            RunStatus::Stalled => CourseStatus::Partial,
            RunStatus::Cancelled => CourseStatus::Cancelled,
        };
        self.store.set_course_status(&report.deck_id, status).await?;

        Ok(SynthesisOutcome {
            curriculum,
            report,
            audit,
        })
    }

    fn scheduler(&self) -> Scheduler {
        let mut scheduler = Scheduler::new(
            self.service.clone(),
            self.store.clone(),
            self.checkpoints.clone(),
            self.config.clone(),
        )
        .with_cancellation(self.cancel.clone())
        .with_stream_hub(self.streams.clone());

        if let Some(ref tx) = self.progress_tx {
            scheduler = scheduler.with_progress(tx.clone());
        }
        scheduler
    }
}
