//! Task lifecycle events
//!
//! Provides the shared event definitions and the EventBus used by the task
//! engine to publish state transitions. Emission is lossy: the engine never
//! depends on anybody listening.

use crate::status::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events published by the task engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TaskEvent {
    /// A submission was accepted and expanded into tasks
    TasksSubmitted {
        /// Created task IDs, in queue order
        task_ids: Vec<Uuid>,
        /// When the submission was accepted
        timestamp: DateTime<Utc>,
    },

    /// A task moved along its lifecycle
    StatusChanged {
        task_id: Uuid,
        old_status: TaskStatus,
        new_status: TaskStatus,
        /// Task message after the transition
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage operation is being retried after a transient failure
    RetryScheduled {
        task_id: Uuid,
        /// Retry number within the current stage operation (1-based)
        retry_count: u32,
        /// Transient cause of the previous attempt
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl TaskEvent {
    /// Task the event refers to, if it refers to exactly one
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            TaskEvent::TasksSubmitted { .. } => None,
            TaskEvent::StatusChanged { task_id, .. } | TaskEvent::RetryScheduled { task_id, .. } => {
                Some(*task_id)
            }
        }
    }
}

/// Broadcast bus for task events
///
/// Cloning is cheap: every clone shares the same channel.
///
/// # Examples
///
/// ```
/// use vdig_common::events::{EventBus, TaskEvent};
///
/// let bus = EventBus::new(16);
/// let mut rx = bus.subscribe();
/// bus.emit_lossy(TaskEvent::TasksSubmitted {
///     task_ids: vec![],
///     timestamp: chrono::Utc::now(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: TaskEvent) -> Result<usize, broadcast::error::SendError<TaskEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: TaskEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
