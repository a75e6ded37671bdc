//! Typed error hierarchy for the synthesis orchestrator.
//!
//! Four enums cover the four layers:
//! - `ServiceError` — a single content-service operation failed
//! - `StorageError` — the storage collaborator failed
//! - `PipelineError` — a chapter pipeline attempt failed
//! - `SynthesisError` — run-level failures (planning, malformed curricula)
//!
//! Cancellation is modelled as `PipelineError::Cancelled` rather than a
//! distinct type: it is a cooperative stop, and the scheduler treats it as
//! neither success nor failure.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors from a single content-service operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("transient service failure: {0}")]
    Transient(String),

    #[error("service call timed out after {0:?}")]
    Timeout(Duration),

    #[error("service rate limit hit: {0}")]
    RateLimited(String),

    #[error("malformed service response: {0}")]
    Malformed(String),
}

impl ServiceError {
    /// Whether the retry policy may re-invoke the operation.
    ///
    /// Malformed responses are not retried at the operation level; they
    /// count against the chapter's retry budget instead.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Malformed(_))
    }
}

/// Errors from the storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failure: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("deck {0} not found")]
    DeckNotFound(String),

    #[error("chapter {chapter} not found in deck {deck}")]
    ChapterNotFound { deck: String, chapter: String },
}

/// Errors from a single chapter pipeline attempt.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("commit failed: {0}")]
    Storage(#[from] StorageError),

    /// Cooperative stop. Committed work is preserved and the chapter's
    /// retry count is not incremented.
    #[error("generation cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Check if this is the cooperative cancellation signal.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Run-level errors from the synthesizer and scheduler.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("curriculum planning failed: {0}")]
    Planning(#[source] ServiceError),

    #[error("curriculum has no chapters")]
    EmptyCurriculum,

    #[error("duplicate chapter id '{0}' in curriculum")]
    DuplicateChapter(String),

    #[error("chapter '{chapter}' references unknown prerequisite '{prerequisite}'")]
    UnknownPrerequisite { chapter: String, prerequisite: String },

    #[error("no checkpoint found for curriculum {0}")]
    CheckpointNotFound(Uuid),

    #[error("checkpoint belongs to curriculum {found}, expected {expected}")]
    CheckpointMismatch { expected: Uuid, found: Uuid },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_timeout_are_retryable() {
        assert!(ServiceError::Transient("connection reset".into()).is_retryable());
        assert!(ServiceError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(ServiceError::RateLimited("429".into()).is_retryable());
    }

    #[test]
    fn malformed_is_not_retryable() {
        assert!(!ServiceError::Malformed("no JSON object".into()).is_retryable());
    }

    #[test]
    fn pipeline_error_converts_from_service_error() {
        let err: PipelineError = ServiceError::Transient("reset".into()).into();
        match &err {
            PipelineError::Service(ServiceError::Transient(msg)) => {
                assert_eq!(msg, "reset");
            }
            _ => panic!("Expected PipelineError::Service(Transient(..))"),
        }
        assert!(!err.is_cancellation());
    }

    #[test]
    fn cancellation_is_distinguished_from_failure() {
        assert!(PipelineError::Cancelled.is_cancellation());
        let failure: PipelineError = StorageError::LockPoisoned.into();
        assert!(!failure.is_cancellation());
    }

    #[test]
    fn unknown_prerequisite_names_both_chapters() {
        let err = SynthesisError::UnknownPrerequisite {
            chapter: "ch-limits".into(),
            prerequisite: "ch-functions".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ch-limits"));
        assert!(msg.contains("ch-functions"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ServiceError::Transient("x".into()));
        assert_std_error(&StorageError::LockPoisoned);
        assert_std_error(&PipelineError::Cancelled);
        assert_std_error(&SynthesisError::EmptyCurriculum);
    }
}
