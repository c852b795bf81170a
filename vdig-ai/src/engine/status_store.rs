//! Authoritative task state
//!
//! One store is created per engine and shared by handle with the dispatcher,
//! every worker, the stop controller and the HTTP handlers. Each mutation
//! happens under a single write lock, so readers never observe a half-updated
//! task, and the matching event is emitted before the lock is released so the
//! event stream is ordered exactly like the state changes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;
use vdig_common::events::{EventBus, TaskEvent};
use vdig_common::TaskStatus;

use crate::models::{ArtifactKind, InvalidTransition, StateTransition, Task};

/// Status store failure
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Task not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// Effect of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Task moved to `stopping` now
    Requested,
    /// Stop had already been requested
    AlreadyStopping,
    /// Task had already finished; nothing changed
    AlreadyTerminal(TaskStatus),
}

/// Number of tasks per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub stopping: usize,
    pub stopped: usize,
}

#[derive(Default)]
struct StoreInner {
    tasks: HashMap<Uuid, Task>,
    /// Insertion order, oldest first
    order: Vec<Uuid>,
}

impl StoreInner {
    fn task_mut(&mut self, id: Uuid) -> Result<&mut Task, StoreError> {
        self.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))
    }
}

/// Concurrently readable map of all tasks
#[derive(Clone)]
pub struct StatusStore {
    inner: Arc<RwLock<StoreInner>>,
    events: EventBus,
}

impl StatusStore {
    pub fn new(events: EventBus) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Register new tasks, in queue order
    pub async fn insert_all(&self, tasks: Vec<Task>) -> Vec<Uuid> {
        let mut inner = self.inner.write().await;
        let ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
        for task in tasks {
            inner.order.push(task.id);
            inner.tasks.insert(task.id, task);
        }
        self.events.emit_lossy(TaskEvent::TasksSubmitted {
            task_ids: ids.clone(),
            timestamp: Utc::now(),
        });
        ids
    }

    pub async fn get(&self, id: Uuid) -> Option<Task> {
        self.inner.read().await.tasks.get(&id).cloned()
    }

    /// All tasks, newest first
    pub async fn snapshot(&self) -> Vec<Task> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.tasks.get(id).cloned())
            .collect()
    }

    pub async fn counts(&self) -> StatusCounts {
        let inner = self.inner.read().await;
        let mut counts = StatusCounts {
            total: inner.tasks.len(),
            ..StatusCounts::default()
        };
        for task in inner.tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Acquiring | TaskStatus::Generating => counts.active += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Stopping => counts.stopping += 1,
                TaskStatus::Stopped => counts.stopped += 1,
            }
        }
        counts
    }

    pub async fn cancel_requested(&self, id: Uuid) -> bool {
        self.inner
            .read()
            .await
            .tasks
            .get(&id)
            .is_some_and(|t| t.cancel_requested)
    }

    fn emit_transition(&self, transition: &StateTransition, message: &str) {
        self.events.emit_lossy(TaskEvent::StatusChanged {
            task_id: transition.task_id,
            old_status: transition.old_status,
            new_status: transition.new_status,
            message: message.to_string(),
            timestamp: transition.transitioned_at,
        });
    }

    /// Apply one lifecycle edge
    pub async fn transition(
        &self,
        id: Uuid,
        new_status: TaskStatus,
        message: impl Into<String>,
    ) -> Result<StateTransition, StoreError> {
        let message = message.into();
        let mut inner = self.inner.write().await;
        let task = inner.task_mut(id)?;
        let transition = task.transition_to(new_status, message.clone())?;
        tracing::debug!(
            task_id = %id,
            from = %transition.old_status,
            to = %new_status,
            message = %message,
            "Task status changed"
        );
        self.emit_transition(&transition, &message);
        Ok(transition)
    }

    /// Move to `completed` with its artifact locators in one step
    pub async fn complete(
        &self,
        id: Uuid,
        artifacts: BTreeMap<ArtifactKind, String>,
        message: impl Into<String>,
    ) -> Result<StateTransition, StoreError> {
        let message = message.into();
        let mut inner = self.inner.write().await;
        let task = inner.task_mut(id)?;
        let transition = task.transition_to(TaskStatus::Completed, message.clone())?;
        task.artifacts = Some(artifacts);
        self.emit_transition(&transition, &message);
        Ok(transition)
    }

    /// Record the resolved display title
    pub async fn set_title(&self, id: Uuid, title: impl Into<String>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.task_mut(id)?.title = Some(title.into());
        Ok(())
    }

    pub async fn set_cover(&self, id: Uuid, locator: impl Into<String>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.task_mut(id)?.cover = Some(locator.into());
        Ok(())
    }

    /// Update the progress message of an active task
    ///
    /// Ignored once a stop was requested or the task finished, so the stop
    /// or final message stays visible.
    pub async fn set_message(&self, id: Uuid, message: impl Into<String>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let task = inner.task_mut(id)?;
        if task.status.is_active() && !task.cancel_requested {
            task.message = message.into();
        }
        Ok(())
    }

    /// Count one more retry of the current operation, returning the new count
    pub async fn record_retry(&self, id: Uuid, reason: &str, max_retries: u32) -> Result<u32, StoreError> {
        let mut inner = self.inner.write().await;
        let task = inner.task_mut(id)?;
        task.retry_count += 1;
        let retry_count = task.retry_count;
        if task.status.is_active() && !task.cancel_requested {
            task.message = format!("Retrying ({}/{}): {}", retry_count, max_retries, reason);
        }
        self.events.emit_lossy(TaskEvent::RetryScheduled {
            task_id: id,
            retry_count,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        Ok(retry_count)
    }

    /// Start a fresh retry budget for the next operation
    pub async fn reset_retries(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.task_mut(id)?.retry_count = 0;
        Ok(())
    }

    /// Set `cancel_requested` and move a live task to `stopping`
    ///
    /// Terminal tasks are left untouched; repeated requests change nothing.
    pub async fn request_stop(&self, id: Uuid) -> Result<StopOutcome, StoreError> {
        let mut inner = self.inner.write().await;
        let task = inner.task_mut(id)?;

        if task.is_terminal() {
            return Ok(StopOutcome::AlreadyTerminal(task.status));
        }
        if task.status == TaskStatus::Stopping {
            return Ok(StopOutcome::AlreadyStopping);
        }

        task.cancel_requested = true;
        let message = "Stopping after the current step".to_string();
        let transition = task.transition_to(TaskStatus::Stopping, message.clone())?;
        self.emit_transition(&transition, &message);
        Ok(StopOutcome::Requested)
    }
}
