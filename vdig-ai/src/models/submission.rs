//! Submission request and result

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::ArtifactOptions;

/// Client request naming one or more references to process
///
/// Lives only long enough to be expanded into tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Submission {
    /// Raw references: single videos, specific parts or collections
    pub urls: Vec<String>,
    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub model_name: String,
    /// Expand every part of a multi-part video without a part selector
    #[serde(default)]
    pub download_all_parts: bool,
    #[serde(default)]
    pub options: ArtifactOptions,
}

impl Submission {
    /// Non-blank references, trimmed
    pub fn references(&self) -> Vec<String> {
        self.urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Outcome of an accepted submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    /// Created tasks, in queue order
    pub task_ids: Vec<Uuid>,
    /// Number of resolved videos, present when expansion occurred
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_videos: Option<usize>,
    /// Non-fatal expansion problems, e.g. a collection page that failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl SubmissionResult {
    /// One-line summary for the submitting client
    pub fn message(&self) -> String {
        let mut message = match self.total_videos {
            Some(total) => format!("Queued {} task(s) from {} resolved video(s)", self.task_ids.len(), total),
            None => format!("Queued {} task(s)", self.task_ids.len()),
        };
        if !self.warnings.is_empty() {
            message.push_str("; warnings: ");
            message.push_str(&self.warnings.join("; "));
        }
        message
    }
}
