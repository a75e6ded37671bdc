pub mod auditor;
pub mod config;
pub mod curriculum;
pub mod errors;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod stream;
pub mod synthesizer;

pub use config::SynthesisConfig;
pub use curriculum::{ChapterSpec, CurriculumSpec};
pub use scheduler::{RunStatus, Scheduler, SynthesisReport};
pub use synthesizer::{CourseSynthesizer, SynthesisOutcome, SynthesisRequest};
