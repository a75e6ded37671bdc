//! Dependency-aware scheduling of chapter pipelines.

pub mod graph;
pub mod runner;
pub mod state;

pub use graph::{ChapterGraph, ChapterIndex};
pub use runner::Scheduler;
pub use state::{
    ChapterRunState, RunState, RunStatus, SynthesisReport, UnresolvedChapter, UnresolvedReason,
};
