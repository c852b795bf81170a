//! Speech-to-text collaborator
//!
//! The ASR tier is the last resort of acquisition. [`CommandTranscriber`]
//! delegates to an external command which downloads the audio and writes an
//! SRT file; the command line is a template from the `[asr]` config table.

use std::path::Path;

use thiserror::Error;
use tokio::process::Command;

use crate::models::Transcript;

/// Transcription failure
#[derive(Debug, Clone, Error)]
pub enum TranscriptionError {
    /// Backend temporarily unable to serve the request
    #[error("Transcription backend unavailable: {0}")]
    Unavailable(String),

    /// Transcription ran and failed, or cannot run at all
    #[error("ASR transcription failed: {0}")]
    Failed(String),
}

impl TranscriptionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TranscriptionError::Unavailable(_))
    }
}

/// Audio in, timestamped text out
#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio of `reference`, writing intermediate files to `output`
    async fn transcribe(&self, reference: &str, output: &Path) -> Result<Transcript, TranscriptionError>;
}

/// Runs a configured external command
///
/// `{url}` and `{output}` in the argument template are replaced by the video
/// reference and the SRT path the command must write.
#[derive(Debug, Clone)]
pub struct CommandTranscriber {
    template: Option<Vec<String>>,
}

impl CommandTranscriber {
    pub fn new(template: Option<Vec<String>>) -> Self {
        let template = template.filter(|t| !t.is_empty());
        if template.is_none() {
            tracing::info!("No ASR command configured; videos without subtitles will fail");
        }
        Self { template }
    }

    fn argv(&self, reference: &str, output: &Path) -> Result<Vec<String>, TranscriptionError> {
        let template = self
            .template
            .as_ref()
            .ok_or_else(|| TranscriptionError::Failed("no ASR command configured".to_string()))?;
        let output = output.to_string_lossy();
        Ok(template
            .iter()
            .map(|arg| arg.replace("{url}", reference).replace("{output}", &output))
            .collect())
    }
}

#[async_trait::async_trait]
impl Transcriber for CommandTranscriber {
    async fn transcribe(&self, reference: &str, output: &Path) -> Result<Transcript, TranscriptionError> {
        let argv = self.argv(reference, output)?;

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TranscriptionError::Failed(format!("create {}: {}", parent.display(), e)))?;
        }

        tracing::info!(program = %argv[0], reference, "Starting ASR transcription");

        let result = Command::new(&argv[0])
            .args(&argv[1..])
            .output()
            .await
            .map_err(|e| TranscriptionError::Failed(format!("cannot run {}: {}", argv[0], e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(TranscriptionError::Failed(format!(
                "{} exited with {}: {}",
                argv[0],
                result.status,
                tail(stderr.trim(), 300)
            )));
        }

        let content = tokio::fs::read_to_string(output).await.map_err(|e| {
            TranscriptionError::Failed(format!("no output at {}: {}", output.display(), e))
        })?;
        let transcript = Transcript::from_srt(&content)
            .map_err(|e| TranscriptionError::Failed(e.to_string()))?;
        if transcript.is_empty() {
            return Err(TranscriptionError::Failed("empty transcript".to_string()));
        }

        tracing::info!(reference, segments = transcript.segments.len(), "ASR transcription finished");
        Ok(transcript)
    }
}

/// Last `max` characters of `text`
fn tail(text: &str, max: usize) -> &str {
    match text.char_indices().rev().nth(max.saturating_sub(1)) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_unconfigured_command_fails_terminally() {
        let transcriber = CommandTranscriber::new(None);
        let err = transcriber
            .transcribe("BV1x", Path::new("/tmp/out.srt"))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("no ASR command configured"));
    }

    #[test]
    fn test_placeholders_are_substituted() {
        let transcriber = CommandTranscriber::new(Some(vec![
            "asr".to_string(),
            "--in={url}".to_string(),
            "{output}".to_string(),
        ]));
        let argv = transcriber.argv("BV1x", Path::new("/w/t.srt")).unwrap();
        assert_eq!(argv, vec!["asr", "--in=BV1x", "/w/t.srt"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_output_is_parsed() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("video").join("video.srt");
        let transcriber = CommandTranscriber::new(Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            "printf '1\\n00:00:00,000 --> 00:00:01,000\\nhello {url}\\n' > \"$0\"".to_string(),
            "{output}".to_string(),
        ]));

        let transcript = transcriber.transcribe("BV1x", &output).await.unwrap();
        assert_eq!(transcript.plain_text(), "hello BV1x");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let dir = TempDir::new().unwrap();
        let transcriber = CommandTranscriber::new(Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo model crashed >&2; exit 3".to_string(),
        ]));

        let err = transcriber
            .transcribe("BV1x", &dir.path().join("x.srt"))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscriptionError::Failed(ref m) if m.contains("model crashed")));
    }
}
