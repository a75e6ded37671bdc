//! Configuration for a synthesis run.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of chapter pipelines running concurrently.
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

/// Default chapter-level retry budget.
pub const DEFAULT_MAX_CHAPTER_RETRIES: u32 = 3;

/// Default timeout applied to each content-service call.
pub const DEFAULT_SERVICE_TIMEOUT_SECS: u64 = 120;

/// Default cap on the per-chapter excerpt handed to the global auditor.
pub const DEFAULT_AUDIT_EXCERPT_CHARS: usize = 1200;

/// Configuration for the dependency scheduler and chapter pipelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Maximum chapters generated in parallel.
    pub max_concurrency: usize,
    /// Attempts per chapter before it is marked permanently failed.
    pub max_chapter_retries: u32,
    /// Retry policy for the streaming draft stage.
    pub draft_retry: RetryPolicy,
    /// Timeout per content-service call, surfaced as a retryable failure.
    #[serde(with = "duration_ms")]
    pub service_timeout: Duration,
    /// Run the fact-check/refine pass on each chapter.
    pub verification_enabled: bool,
    /// Request supplementary visual material for each chapter.
    pub enrichment_enabled: bool,
    /// Run the global consistency audit after the scheduler drains.
    pub audit_enabled: bool,
    /// Per-chapter content excerpt cap for the global audit.
    pub audit_excerpt_chars: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_chapter_retries: DEFAULT_MAX_CHAPTER_RETRIES,
            draft_retry: RetryPolicy::default(),
            service_timeout: Duration::from_secs(DEFAULT_SERVICE_TIMEOUT_SECS),
            verification_enabled: false,
            enrichment_enabled: false,
            audit_enabled: true,
            audit_excerpt_chars: DEFAULT_AUDIT_EXCERPT_CHARS,
        }
    }
}

impl SynthesisConfig {
    /// Set the maximum number of concurrently active chapters.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Set the chapter-level retry budget.
    pub fn with_max_chapter_retries(mut self, retries: u32) -> Self {
        self.max_chapter_retries = retries;
        self
    }

    /// Set the retry policy for the streaming draft stage.
    pub fn with_draft_retry(mut self, retry: RetryPolicy) -> Self {
        self.draft_retry = retry;
        self
    }

    /// Set the per-call service timeout.
    pub fn with_service_timeout(mut self, timeout: Duration) -> Self {
        self.service_timeout = timeout;
        self
    }

    /// Enable or disable the verification/refine pass.
    pub fn with_verification(mut self, enabled: bool) -> Self {
        self.verification_enabled = enabled;
        self
    }

    /// Enable or disable the enrichment pass.
    pub fn with_enrichment(mut self, enabled: bool) -> Self {
        self.enrichment_enabled = enabled;
        self
    }

    /// Enable or disable the global consistency audit.
    pub fn with_audit(mut self, enabled: bool) -> Self {
        self.audit_enabled = enabled;
        self
    }

    /// Set the per-chapter excerpt cap for the global audit.
    pub fn with_audit_excerpt_chars(mut self, chars: usize) -> Self {
        self.audit_excerpt_chars = chars;
        self
    }
}

/// Serde helpers for millisecond-precision Duration fields.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
