//! Collaborators driven by the task engine

pub mod asr;
pub mod expander;
pub mod fetcher;
pub mod generator;
pub mod local_transcripts;
pub mod platform;
pub mod subtitle_pipeline;
pub mod workspace;

pub use asr::{CommandTranscriber, Transcriber, TranscriptionError};
pub use expander::{classify, CollectionExpander, Expansion, ReferenceKind};
pub use fetcher::{FetchError, FetchPolicy, Fetcher};
pub use generator::{ArtifactWriter, ContentGenerator, GenerationError, OpenAiCompatClient};
pub use platform::{BilibiliClient, CollectionPage, Cookies, VideoInfo, VideoPart, VideoPlatform};
pub use subtitle_pipeline::{
    AsrSource, LocalTranscriptSource, RemoteSubtitleSource, ResolvedVideo, SourceOutcome,
    SubtitlePipeline, TranscriptSource,
};
pub use workspace::{DirectoryWorkspaces, WorkspaceResolver};
