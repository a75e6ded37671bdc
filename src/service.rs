//! Content-generation service contract.
//!
//! The service is a fallible black box; this module fixes the operation
//! contract the orchestrator drives it through. Implementations live with
//! the application (HTTP clients, local models, test scripts).

use crate::curriculum::ChapterSpec;
use crate::errors::ServiceError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// Stream of partial draft text for one chapter.
pub type DraftStream = BoxStream<'static, Result<String, ServiceError>>;

/// Constraints handed to curriculum planning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanConstraints {
    /// Requested number of chapters, if the caller cares.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_count: Option<usize>,
    /// Target difficulty, free-form ("introductory", "graduate").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    /// Output language.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl PlanConstraints {
    /// Set the requested chapter count.
    pub fn with_chapter_count(mut self, count: usize) -> Self {
        self.chapter_count = Some(count);
        self
    }

    /// Set the target difficulty.
    pub fn with_difficulty(mut self, difficulty: &str) -> Self {
        self.difficulty = Some(difficulty.to_string());
        self
    }

    /// Set the output language.
    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }
}

/// Cleaned chapter content plus its archival summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizedDraft {
    pub content: String,
    pub summary: String,
}

/// One factual correction from the verification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    /// The claim as it appears in the content.
    pub claim: String,
    /// What it should say instead.
    pub correction: String,
}

/// A generated question item tied to one chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentItem {
    pub question: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Output of the assessment pass: lightly re-edited content plus items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentBatch {
    pub refined_content: String,
    pub assessments: Vec<AssessmentItem>,
}

/// One issue found by the global consistency audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSuggestion {
    /// Chapter the issue was found in.
    pub chapter_id: String,
    /// What is inconsistent (terminology drift, contradicted claim).
    pub issue: String,
    /// Instruction for the rewrite that resolves it.
    pub fix: String,
}

/// The content-generation service collaborator.
///
/// All operations are asynchronous and fallible. Planning returns the raw
/// response text; ingestion into a typed `CurriculumSpec` happens on the
/// orchestrator side (`curriculum::parse_curriculum`), so a response that
/// does not parse surfaces as `ServiceError::Malformed` there.
#[async_trait]
pub trait ContentService: Send + Sync {
    /// Plan a curriculum for a topic. Returns the raw planning response.
    async fn plan_curriculum(
        &self,
        topic: &str,
        constraints: &PlanConstraints,
    ) -> Result<String, ServiceError>;

    /// Build the logical state vector: a compact summary of everything the
    /// prerequisites already established, primed with the shared dictionary.
    async fn build_state_vector(
        &self,
        topic: &str,
        prerequisite_summaries: &[(String, String)],
        shared_dictionary: &BTreeMap<String, String>,
    ) -> Result<String, ServiceError>;

    /// Open a streaming draft for one chapter.
    async fn stream_chapter_draft(
        &self,
        topic: &str,
        chapter: &ChapterSpec,
        state_vector: &str,
    ) -> Result<DraftStream, ServiceError>;

    /// Clean the accumulated draft into final content plus a summary.
    async fn finalize_chapter_draft(
        &self,
        topic: &str,
        chapter: &ChapterSpec,
        draft: &str,
    ) -> Result<FinalizedDraft, ServiceError>;

    /// Fact-check finalized content. Empty means nothing to fix.
    async fn verify_content(
        &self,
        topic: &str,
        content: &str,
    ) -> Result<Vec<Correction>, ServiceError>;

    /// Rewrite content to incorporate the corrections.
    async fn refine_content(
        &self,
        content: &str,
        corrections: &[Correction],
    ) -> Result<String, ServiceError>;

    /// Request supplementary visual material for the chapter. `None` means
    /// the service had nothing useful to add; the pipeline splices the
    /// returned block into the content itself.
    async fn enrich_content(
        &self,
        topic: &str,
        content: &str,
    ) -> Result<Option<String>, ServiceError>;

    /// Re-edit for pedagogical clarity and produce assessment items.
    async fn generate_assessments(
        &self,
        topic: &str,
        chapter: &ChapterSpec,
        content: &str,
    ) -> Result<AssessmentBatch, ServiceError>;

    /// Review the completed chapter set for terminology/logical drift.
    async fn global_audit(
        &self,
        topic: &str,
        chapter_excerpts: &BTreeMap<String, String>,
        shared_dictionary: &BTreeMap<String, String>,
    ) -> Result<Vec<AuditSuggestion>, ServiceError>;

    /// Rewrite one chapter's content to apply a single audit fix.
    async fn apply_audit_fix(
        &self,
        content: &str,
        suggestion: &AuditSuggestion,
    ) -> Result<String, ServiceError>;
}

/// Bound a service call with a timeout, surfaced as a retryable failure.
pub(crate) async fn call_bounded<T, Fut>(timeout: Duration, fut: Fut) -> Result<T, ServiceError>
where
    Fut: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout(timeout)),
    }
}
