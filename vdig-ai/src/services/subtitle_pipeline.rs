//! Tiered transcript acquisition
//!
//! Sources are tried in order (remote, local, ASR). A source answers with a
//! transcript, a definitive miss, or an error. Only a miss moves on to the
//! next source; an error ends acquisition and is subject to the stage retry
//! policy of the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::asr::Transcriber;
use super::expander::{classify, ReferenceKind};
use super::fetcher::{FetchError, Fetcher};
use super::local_transcripts::{
    find_transcript, load_transcript, sanitize_title, save_transcript, transcript_path,
};
use super::platform::VideoPlatform;
use crate::error::TaskError;
use crate::models::{AcquiredTranscript, Tier, Transcript};

/// A video resolved to a concrete part with a display title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVideo {
    /// Reference as submitted for the task
    pub reference: String,
    pub bvid: String,
    pub page: u32,
    pub cid: u64,
    /// Display title; multi-part videos carry the part title as suffix
    pub title: String,
    pub workspace_dir: PathBuf,
    pub cover_url: Option<String>,
}

/// Answer of one transcript source
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Found(Transcript),
    /// This source definitively has nothing
    Miss(String),
}

/// One acquisition tier
#[async_trait::async_trait]
pub trait TranscriptSource: Send + Sync {
    fn tier(&self) -> Tier;

    async fn acquire(&self, video: &ResolvedVideo) -> Result<SourceOutcome, TaskError>;
}

/// Platform-hosted subtitles
pub struct RemoteSubtitleSource {
    platform: Arc<dyn VideoPlatform>,
    fetcher: Fetcher,
}

impl RemoteSubtitleSource {
    pub fn new(platform: Arc<dyn VideoPlatform>, fetcher: Fetcher) -> Self {
        Self { platform, fetcher }
    }
}

#[async_trait::async_trait]
impl TranscriptSource for RemoteSubtitleSource {
    fn tier(&self) -> Tier {
        Tier::Remote
    }

    async fn acquire(&self, video: &ResolvedVideo) -> Result<SourceOutcome, TaskError> {
        let platform = &self.platform;
        let subtitle = self
            .fetcher
            .fetch("subtitle", || platform.subtitle(&video.bvid, video.cid))
            .await?;

        Ok(match subtitle {
            Some(transcript) if !transcript.is_empty() => SourceOutcome::Found(transcript),
            _ => SourceOutcome::Miss("video has no subtitles".to_string()),
        })
    }
}

/// Transcripts already stored in the workspace
pub struct LocalTranscriptSource;

#[async_trait::async_trait]
impl TranscriptSource for LocalTranscriptSource {
    fn tier(&self) -> Tier {
        Tier::Local
    }

    async fn acquire(&self, video: &ResolvedVideo) -> Result<SourceOutcome, TaskError> {
        let workspace_dir = video.workspace_dir.clone();
        let title = video.title.clone();
        let lookup = tokio::task::spawn_blocking(move || -> std::io::Result<_> {
            let Some(path) = find_transcript(&workspace_dir, &title)? else {
                return Ok(None);
            };
            let loaded = load_transcript(&path);
            Ok(Some((path, loaded)))
        })
        .await
        .map_err(std::io::Error::other)??;

        let Some((path, loaded)) = lookup else {
            return Ok(SourceOutcome::Miss("no local transcript".to_string()));
        };

        match loaded {
            Ok(transcript) if !transcript.is_empty() => {
                tracing::debug!(path = %path.display(), "Local transcript found");
                Ok(SourceOutcome::Found(transcript))
            }
            Ok(_) => Ok(SourceOutcome::Miss(format!("{} is empty", path.display()))),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable local transcript ignored");
                Ok(SourceOutcome::Miss(format!("{} unreadable", path.display())))
            }
        }
    }
}

/// Speech-to-text fallback; never misses, fails instead
pub struct AsrSource {
    transcriber: Arc<dyn Transcriber>,
}

impl AsrSource {
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self { transcriber }
    }
}

#[async_trait::async_trait]
impl TranscriptSource for AsrSource {
    fn tier(&self) -> Tier {
        Tier::Asr
    }

    async fn acquire(&self, video: &ResolvedVideo) -> Result<SourceOutcome, TaskError> {
        let output = transcript_path(&video.workspace_dir, &video.title);
        let transcript = self.transcriber.transcribe(&video.reference, &output).await?;
        Ok(SourceOutcome::Found(transcript))
    }
}

/// Ordered list of transcript sources plus metadata resolution
pub struct SubtitlePipeline {
    platform: Arc<dyn VideoPlatform>,
    fetcher: Fetcher,
    sources: Vec<Arc<dyn TranscriptSource>>,
}

impl SubtitlePipeline {
    /// Remote, then local, then ASR
    pub fn standard(
        platform: Arc<dyn VideoPlatform>,
        fetcher: Fetcher,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        let sources: Vec<Arc<dyn TranscriptSource>> = vec![
            Arc::new(RemoteSubtitleSource::new(platform.clone(), fetcher.clone())),
            Arc::new(LocalTranscriptSource),
            Arc::new(AsrSource::new(transcriber)),
        ];
        Self::new(platform, fetcher, sources)
    }

    pub fn new(
        platform: Arc<dyn VideoPlatform>,
        fetcher: Fetcher,
        sources: Vec<Arc<dyn TranscriptSource>>,
    ) -> Self {
        Self {
            platform,
            fetcher,
            sources,
        }
    }

    pub fn tiers(&self) -> Vec<Tier> {
        self.sources.iter().map(|s| s.tier()).collect()
    }

    /// Resolve metadata: part, cid and display title
    pub async fn resolve(&self, reference: &str, workspace_dir: &Path) -> Result<ResolvedVideo, TaskError> {
        let (bvid, page) = match classify(reference) {
            ReferenceKind::Video { bvid, page } => (bvid, page.unwrap_or(1)),
            ReferenceKind::Collection { .. } | ReferenceKind::Unrecognized => {
                return Err(TaskError::InvalidReference(reference.to_string()))
            }
        };

        let platform = &self.platform;
        let info = self
            .fetcher
            .fetch("video_info", || platform.video_info(&bvid))
            .await?;

        let part = info.part(page).ok_or_else(|| {
            TaskError::Fetch(FetchError::NotFound(format!("{} has no part {}", bvid, page)))
        })?;

        let title = if info.parts.len() > 1 && !part.part.trim().is_empty() {
            format!("{}_{}", info.title, part.part.trim())
        } else {
            info.title.clone()
        };

        Ok(ResolvedVideo {
            reference: reference.to_string(),
            bvid,
            page,
            cid: part.cid,
            title,
            workspace_dir: workspace_dir.to_path_buf(),
            cover_url: info.cover_url.clone(),
        })
    }

    /// Download the cover image into the video directory, returning its locator
    ///
    /// An existing file is reused. Failures are logged and yield `None`.
    pub async fn save_cover(&self, video: &ResolvedVideo) -> Option<String> {
        let url = video.cover_url.as_deref()?;
        let name = sanitize_title(&video.title);
        let file = format!("{}_cover.{}", name, cover_extension(url));
        let path = video.workspace_dir.join(&name).join(&file);
        let locator = format!("{}/{}", name, file);

        if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
            return Some(locator);
        }

        let platform = &self.platform;
        let bytes = match self.fetcher.fetch("cover", || platform.cover(url)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(title = %video.title, error = %e, "Cover download failed");
                return None;
            }
        };

        let saved = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &bytes).await
        }
        .await;
        if let Err(e) = saved {
            tracing::warn!(path = %path.display(), error = %e, "Could not save cover");
            return None;
        }
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Cover saved");
        Some(locator)
    }

    /// Try every source in order until one yields a transcript
    pub async fn acquire(&self, video: &ResolvedVideo) -> Result<AcquiredTranscript, TaskError> {
        let mut misses = Vec::new();

        for source in &self.sources {
            let tier = source.tier();
            match source.acquire(video).await? {
                SourceOutcome::Found(transcript) => {
                    tracing::info!(
                        title = %video.title,
                        tier = %tier,
                        segments = transcript.segments.len(),
                        "Transcript acquired"
                    );
                    if tier != Tier::Local {
                        let workspace_dir = video.workspace_dir.clone();
                        let title = video.title.clone();
                        let srt = transcript.clone();
                        let saved = tokio::task::spawn_blocking(move || {
                            save_transcript(&workspace_dir, &title, &srt)
                        })
                        .await
                        .map_err(std::io::Error::other)
                        .and_then(|result| result);
                        match saved {
                            Ok(path) => tracing::debug!(path = %path.display(), "Transcript saved"),
                            Err(e) => tracing::warn!(error = %e, "Could not save transcript"),
                        }
                    }
                    return Ok(AcquiredTranscript { transcript, tier });
                }
                SourceOutcome::Miss(reason) => {
                    tracing::info!(title = %video.title, tier = %tier, reason = %reason, "Transcript source missed");
                    misses.push(format!("{}: {}", tier, reason));
                }
            }
        }

        Err(TaskError::NoTranscript(misses.join("; ")))
    }
}

/// Image extension taken from the URL path, `jpg` when unknown
fn cover_extension(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "png",
        Some("webp") => "webp",
        Some("gif") => "gif",
        _ => "jpg",
    }
}
