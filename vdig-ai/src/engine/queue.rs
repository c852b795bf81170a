//! FIFO job queue with an admission ceiling
//!
//! The queue holds pending task ids plus the set of ids currently executing.
//! Admission is bounded by a semaphore sized to `max_concurrent`; a worker
//! holds its permit until its task is terminal.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Uuid>,
    in_flight: HashSet<Uuid>,
}

/// Snapshot of queue occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDepth {
    pub pending: usize,
    pub in_flight: usize,
}

pub struct JobQueue {
    state: Mutex<QueueState>,
    available: Notify,
    slots: Arc<Semaphore>,
    max_concurrent: usize,
}

impl JobQueue {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Append ids in order and wake the dispatcher
    pub async fn push_all(&self, ids: &[Uuid]) {
        if ids.is_empty() {
            return;
        }
        self.state.lock().await.pending.extend(ids.iter().copied());
        self.available.notify_one();
    }

    /// Wait for a free admission slot
    pub async fn acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.clone().acquire_owned().await.ok()
    }

    /// Wait until a pending id is available and move it to in-flight
    pub async fn next(&self) -> Uuid {
        loop {
            // Registered before checking so a push in between is not missed
            let notified = self.available.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(id) = state.pending.pop_front() {
                    state.in_flight.insert(id);
                    if !state.pending.is_empty() {
                        self.available.notify_one();
                    }
                    return id;
                }
            }
            notified.await;
        }
    }

    /// Remove an executed id from the in-flight set
    pub async fn finish(&self, id: Uuid) {
        self.state.lock().await.in_flight.remove(&id);
    }

    /// Remove and return every pending id
    pub async fn drain_pending(&self) -> Vec<Uuid> {
        self.state.lock().await.pending.drain(..).collect()
    }

    pub async fn depth(&self) -> QueueDepth {
        let state = self.state.lock().await;
        QueueDepth {
            pending: state.pending.len(),
            in_flight: state.in_flight.len(),
        }
    }

    /// Stop handing out admission slots
    pub fn close(&self) {
        self.slots.close();
        self.available.notify_waiters();
    }
}
