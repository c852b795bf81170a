//! Content generation collaborator and artifact files
//!
//! [`ContentGenerator`] turns a transcript into one artifact. The
//! [`ArtifactWriter`] owns the on-disk layout and reuses artifacts that
//! already exist, so resubmitting a video only regenerates what is missing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::models::{ArtifactKind, Transcript};
use crate::services::local_transcripts::sanitize_title;
use vdig_common::config::ModelConfig;

const GENERATION_TIMEOUT_SECS: u64 = 300;

/// Generation failure for one artifact
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// Backend overloaded, rate limited or unreachable
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Backend refused the request or answered nonsense
    #[error("{0}")]
    Rejected(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Unavailable(_))
    }
}

/// Transcript + artifact kind in, artifact text out
#[async_trait::async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(
        &self,
        model: &ModelConfig,
        kind: ArtifactKind,
        title: &str,
        transcript: &Transcript,
    ) -> Result<String, GenerationError>;
}

fn instruction(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Summary => {
            "Summarize the transcript. Answer with a JSON object with keys \
             \"title\", \"summary\" and \"key_points\" (array of strings)."
        }
        ArtifactKind::FullDocument => {
            "Rewrite the transcript as a well structured Markdown document \
             with headings. Keep every technical detail."
        }
        ArtifactKind::Exercises => {
            "Write practice exercises about the transcript. Answer with a JSON \
             object with key \"exercises\": an array of objects with \
             \"question\", \"options\" and \"answer\"."
        }
        ArtifactKind::GuidingQuestions => {
            "Write guiding questions a learner should be able to answer after \
             watching. Answer with a JSON object with key \"questions\" \
             (array of strings)."
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client
pub struct OpenAiCompatClient {
    http_client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(user_agent: &str) -> Result<Self, GenerationError> {
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(GENERATION_TIMEOUT_SECS))
            .build()
            .map_err(|e| GenerationError::Rejected(e.to_string()))?;
        Ok(Self { http_client })
    }
}

fn classify_send_error(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        GenerationError::Unavailable(err.to_string())
    } else {
        GenerationError::Rejected(err.to_string())
    }
}

#[async_trait::async_trait]
impl ContentGenerator for OpenAiCompatClient {
    async fn generate(
        &self,
        model: &ModelConfig,
        kind: ArtifactKind,
        title: &str,
        transcript: &Transcript,
    ) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", model.api_base.trim_end_matches('/'));
        let body = json!({
            "model": model.model_name,
            "messages": [
                { "role": "system", "content": instruction(kind) },
                {
                    "role": "user",
                    "content": format!("Title: {}\n\nTranscript:\n{}", title, transcript.plain_text()),
                },
            ],
        });

        tracing::debug!(model = %model.name, kind = %kind, title, "Requesting generation");

        let mut request = self.http_client.post(&url).json(&body);
        if !model.api_key.is_empty() {
            request = request.bearer_auth(&model.api_key);
        }

        let response = request.send().await.map_err(classify_send_error)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("HTTP {}: {}", status.as_u16(), text.trim());
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                GenerationError::Unavailable(message)
            } else {
                GenerationError::Rejected(message)
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Rejected(format!("malformed response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| GenerationError::Rejected("empty completion".to_string()))
    }
}

/// Relative artifact location inside the video directory
pub fn artifact_file_name(title: &str, kind: ArtifactKind) -> PathBuf {
    let name = sanitize_title(title);
    match kind {
        ArtifactKind::Summary => PathBuf::from(format!("{}_summary.json", name)),
        ArtifactKind::FullDocument => Path::new("markdown").join(format!("{}.md", name)),
        ArtifactKind::Exercises => PathBuf::from(format!("{}_exercises.json", name)),
        ArtifactKind::GuidingQuestions => PathBuf::from(format!("{}_questions.json", name)),
    }
}

/// Strip a Markdown code fence around model output
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Normalize generated text into the file content for `kind`
pub fn render_artifact(kind: ArtifactKind, generated: &str) -> String {
    if !kind.is_json() {
        return generated.trim().to_string() + "\n";
    }
    let value = serde_json::from_str::<serde_json::Value>(strip_code_fence(generated))
        .unwrap_or_else(|_| json!({ "content": generated.trim() }));
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
}

/// Writes artifacts under `<workspace>/<title>/`
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    workspace_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
        }
    }

    /// Absolute path and workspace-relative locator
    fn locate(&self, title: &str, kind: ArtifactKind) -> (PathBuf, String) {
        let relative = Path::new(&sanitize_title(title)).join(artifact_file_name(title, kind));
        let absolute = self.workspace_dir.join(&relative);
        (absolute, relative.to_string_lossy().replace('\\', "/"))
    }

    /// Locator of an artifact already on disk
    pub async fn existing(&self, title: &str, kind: ArtifactKind) -> Option<String> {
        let (path, locator) = self.locate(title, kind);
        let metadata = tokio::fs::metadata(&path).await.ok()?;
        metadata.is_file().then_some(locator)
    }

    /// Write an artifact, returning its locator
    pub async fn write(
        &self,
        title: &str,
        kind: ArtifactKind,
        generated: &str,
    ) -> std::io::Result<String> {
        let (path, locator) = self.locate(title, kind);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, render_artifact(kind, generated)).await?;
        tracing::debug!(path = %path.display(), kind = %kind, "Artifact written");
        Ok(locator)
    }
}
