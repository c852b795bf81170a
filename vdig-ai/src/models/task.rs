//! Task record and its lifecycle transitions
//!
//! A task is one unit of work for one resolved video reference. The record is
//! owned by the status store; workers and the stop controller mutate it only
//! through [`Task::transition_to`], which rejects edges outside the lifecycle
//! graph of [`TaskStatus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;
use vdig_common::TaskStatus;

/// Derived artifact produced by the generation stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Summary,
    FullDocument,
    Exercises,
    GuidingQuestions,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Summary,
        ArtifactKind::FullDocument,
        ArtifactKind::Exercises,
        ArtifactKind::GuidingQuestions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Summary => "summary",
            ArtifactKind::FullDocument => "full_document",
            ArtifactKind::Exercises => "exercises",
            ArtifactKind::GuidingQuestions => "guiding_questions",
        }
    }

    /// JSON artifacts are validated before they are written
    pub fn is_json(self) -> bool {
        !matches!(self, ArtifactKind::FullDocument)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifact selection flags of a submission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactOptions {
    pub summary: bool,
    pub full_document: bool,
    pub exercises: bool,
    pub guiding_questions: bool,
}

impl ArtifactOptions {
    /// Every artifact kind
    pub fn all() -> Self {
        Self {
            summary: true,
            full_document: true,
            exercises: true,
            guiding_questions: true,
        }
    }

    /// Requested kinds, in generation order
    pub fn requested(&self) -> Vec<ArtifactKind> {
        ArtifactKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                ArtifactKind::Summary => self.summary,
                ArtifactKind::FullDocument => self.full_document,
                ArtifactKind::Exercises => self.exercises,
                ArtifactKind::GuidingQuestions => self.guiding_questions,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.requested().is_empty()
    }
}

/// Per-task options carried from the submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    pub artifacts: ArtifactOptions,
    /// Sibling parts of a multi-part source were expanded into sibling tasks
    pub all_parts_expanded: bool,
}

/// Rejected lifecycle edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Applied lifecycle edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub task_id: Uuid,
    pub old_status: TaskStatus,
    pub new_status: TaskStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// One unit of work for one resolved video
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Resolved single-video reference (never a collection)
    pub source_reference: String,
    /// Display title, known once metadata is resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub workspace: String,
    pub model_name: String,
    pub options: TaskOptions,
    pub status: TaskStatus,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// Artifact kind -> storage locator; present only when completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<BTreeMap<ArtifactKind, String>>,
    /// Locator of the downloaded cover image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    pub retry_count: u32,
    pub cancel_requested: bool,
}

impl Task {
    pub fn new(
        source_reference: impl Into<String>,
        workspace: impl Into<String>,
        model_name: impl Into<String>,
        options: TaskOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_reference: source_reference.into(),
            title: None,
            workspace: workspace.into(),
            model_name: model_name.into(),
            options,
            status: TaskStatus::Pending,
            message: "Waiting in queue".to_string(),
            created_at: Utc::now(),
            artifacts: None,
            cover: None,
            retry_count: 0,
            cancel_requested: false,
        }
    }

    /// Move to `new_status`, overwriting the message
    ///
    /// `artifacts` is kept only on a transition into `completed`; every other
    /// transition clears it. The stage retry counter resets at every edge.
    pub fn transition_to(
        &mut self,
        new_status: TaskStatus,
        message: impl Into<String>,
    ) -> Result<StateTransition, InvalidTransition> {
        if !self.status.can_transition_to(new_status) {
            return Err(InvalidTransition {
                from: self.status,
                to: new_status,
            });
        }

        let transition = StateTransition {
            task_id: self.id,
            old_status: self.status,
            new_status,
            transitioned_at: Utc::now(),
        };

        self.status = new_status;
        self.message = message.into();
        self.retry_count = 0;
        if new_status != TaskStatus::Completed {
            self.artifacts = None;
        }

        Ok(transition)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Label used in logs and messages: title if known, else the reference
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.source_reference)
    }
}
