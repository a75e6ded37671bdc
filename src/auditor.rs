//! Global consistency audit with best-effort self-correction.
//!
//! Runs once, after the scheduler drains with at least two completed
//! chapters. The service reviews bounded excerpts of every completed
//! chapter against the shared dictionary; suggested fixes are then applied
//! sequentially, persisting after each. A fix that fails to apply is
//! logged and skipped, so one bad fix never aborts the rest. There is no
//! re-audit after fixes: the result is best-effort rather than a fixed
//! point.

use crate::config::SynthesisConfig;
use crate::curriculum::CurriculumSpec;
use crate::scheduler::SynthesisReport;
use crate::service::{call_bounded, AuditSuggestion, ContentService};
use crate::storage::CourseStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Minimum completed chapters before an audit is worth running.
pub const MIN_CHAPTERS_FOR_AUDIT: usize = 2;

/// What the audit pass did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditOutcome {
    /// Suggestions returned by the service.
    pub suggestions: usize,
    /// Chapter ids whose fixes were applied and persisted, in order.
    pub applied: Vec<String>,
    /// Fixes that were skipped, with reasons.
    pub skipped: Vec<SkippedFix>,
}

/// One fix that could not be applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedFix {
    pub chapter_id: String,
    pub reason: String,
}

/// Reviews a completed run for terminology and logical drift.
pub struct ConsistencyAuditor {
    service: Arc<dyn ContentService>,
    store: Arc<dyn CourseStore>,
    config: SynthesisConfig,
}

impl ConsistencyAuditor {
    pub fn new(
        service: Arc<dyn ContentService>,
        store: Arc<dyn CourseStore>,
        config: SynthesisConfig,
    ) -> Self {
        Self {
            service,
            store,
            config,
        }
    }

    /// Check if a run qualifies for an audit.
    pub fn is_eligible(&self, report: &SynthesisReport) -> bool {
        self.config.audit_enabled
            && report.status != crate::scheduler::RunStatus::Cancelled
            && report.completed_count() >= MIN_CHAPTERS_FOR_AUDIT
    }

    /// Run the audit and apply fixes best-effort.
    pub async fn run(
        &self,
        curriculum: &CurriculumSpec,
        report: &SynthesisReport,
    ) -> AuditOutcome {
        let mut outcome = AuditOutcome::default();

        let excerpts = self.collect_excerpts(report).await;
        if excerpts.len() < MIN_CHAPTERS_FOR_AUDIT {
            warn!(
                readable = excerpts.len(),
                "too few readable chapters, skipping audit"
            );
            return outcome;
        }

        let suggestions = match call_bounded(
            self.config.service_timeout,
            self.service
                .global_audit(&curriculum.topic, &excerpts, &curriculum.shared_dictionary),
        )
        .await
        {
            Ok(suggestions) => suggestions,
            Err(err) => {
                warn!(error = %err, "global audit call failed, skipping");
                return outcome;
            }
        };

        outcome.suggestions = suggestions.len();
        info!(suggestions = suggestions.len(), "global audit returned");

        for suggestion in &suggestions {
            match self.apply_fix(report, suggestion).await {
                Ok(()) => {
                    debug!(chapter = %suggestion.chapter_id, "audit fix applied");
                    outcome.applied.push(suggestion.chapter_id.clone());
                }
                Err(reason) => {
                    warn!(chapter = %suggestion.chapter_id, %reason, "audit fix skipped");
                    outcome.skipped.push(SkippedFix {
                        chapter_id: suggestion.chapter_id.clone(),
                        reason,
                    });
                }
            }
        }

        outcome
    }

    /// Bounded excerpts of every completed chapter's stored content.
    async fn collect_excerpts(&self, report: &SynthesisReport) -> BTreeMap<String, String> {
        let mut excerpts = BTreeMap::new();
        for chapter_id in &report.completed_chapter_ids {
            match self.store.chapter_content(&report.deck_id, chapter_id).await {
                Ok(content) => {
                    excerpts.insert(
                        chapter_id.clone(),
                        excerpt(&content, self.config.audit_excerpt_chars),
                    );
                }
                Err(err) => {
                    warn!(chapter = %chapter_id, error = %err, "could not read chapter for audit");
                }
            }
        }
        excerpts
    }

    /// Apply one fix and persist the rewritten chapter.
    async fn apply_fix(
        &self,
        report: &SynthesisReport,
        suggestion: &AuditSuggestion,
    ) -> Result<(), String> {
        let chapter_id = &suggestion.chapter_id;
        if !report.completed_chapter_ids.iter().any(|c| c == chapter_id) {
            return Err("suggestion names a chapter that never completed".to_string());
        }

        let content = self
            .store
            .chapter_content(&report.deck_id, chapter_id)
            .await
            .map_err(|e| e.to_string())?;

        let fixed = call_bounded(
            self.config.service_timeout,
            self.service.apply_audit_fix(&content, suggestion),
        )
        .await
        .map_err(|e| e.to_string())?;

        self.store
            .update_chapter_content(&report.deck_id, chapter_id, &fixed)
            .await
            .map_err(|e| e.to_string())
    }
}

/// First `max_chars` characters of `text`, cut on a char boundary.
fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
