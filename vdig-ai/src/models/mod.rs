//! Data models for vdig-ai

pub mod submission;
pub mod task;
pub mod transcript;

pub use submission::{Submission, SubmissionResult};
pub use task::{
    ArtifactKind, ArtifactOptions, InvalidTransition, StateTransition, Task, TaskOptions,
};
pub use transcript::{AcquiredTranscript, Segment, SrtError, Tier, Transcript};
