//! Task status vocabulary
//!
//! A task moves forward through:
//!
//! ```text
//! pending -> acquiring -> generating -> completed
//!                 |            |
//!                 +-> failed <-+
//! {pending, acquiring, generating} -> stopping -> stopped
//! ```
//!
//! `completed`, `failed` and `stopped` are terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a single task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in the queue for a worker
    Pending,
    /// Worker is obtaining a transcript
    Acquiring,
    /// Worker is producing artifacts from the transcript
    Generating,
    /// All (or the surviving subset of) requested artifacts were produced
    Completed,
    /// A stage failed terminally
    Failed,
    /// Stop requested, worker has not reached a checkpoint yet
    Stopping,
    /// Worker observed the stop request and abandoned the task
    Stopped,
}

impl TaskStatus {
    /// No task leaves a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Stopped
        )
    }

    /// States that occupy an admission slot
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Acquiring | TaskStatus::Generating)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Acquiring)
                | (Acquiring, Generating)
                | (Acquiring, Failed)
                | (Generating, Completed)
                | (Generating, Failed)
                | (Pending, Stopping)
                | (Acquiring, Stopping)
                | (Generating, Stopping)
                | (Stopping, Stopped)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Acquiring => "acquiring",
            TaskStatus::Generating => "generating",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Stopping => "stopping",
            TaskStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
