//! Stop requests
//!
//! Every task gets a child of the engine shutdown token. A stop request marks
//! the task in the status store and cancels its token; workers observe either
//! signal at their checkpoints and never interrupt a call already in flight.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::status_store::{StatusStore, StopOutcome, StoreError};

#[derive(Clone)]
pub struct CancellationController {
    store: StatusStore,
    root: CancellationToken,
    tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl CancellationController {
    pub fn new(store: StatusStore, root: CancellationToken) -> Self {
        Self {
            store,
            root,
            tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create the token for a new task
    pub async fn register(&self, id: Uuid) -> CancellationToken {
        let token = self.root.child_token();
        self.tokens.write().await.insert(id, token.clone());
        token
    }

    pub async fn token(&self, id: Uuid) -> Option<CancellationToken> {
        self.tokens.read().await.get(&id).cloned()
    }

    /// Forget the token of a finished task
    pub async fn release(&self, id: Uuid) {
        self.tokens.write().await.remove(&id);
    }

    /// Stop a task; idempotent, no-op on terminal tasks
    pub async fn request_stop(&self, id: Uuid) -> Result<StopOutcome, StoreError> {
        let outcome = self.store.request_stop(id).await?;

        match outcome {
            StopOutcome::Requested => {
                if let Some(token) = self.token(id).await {
                    token.cancel();
                }
                tracing::info!(task_id = %id, "Stop requested");
            }
            StopOutcome::AlreadyStopping => {
                tracing::debug!(task_id = %id, "Stop already requested");
            }
            StopOutcome::AlreadyTerminal(status) => {
                tracing::debug!(task_id = %id, status = %status, "Stop ignored, task already finished");
            }
        }

        Ok(outcome)
    }

    /// Stop every live task
    pub async fn request_stop_all(&self) -> usize {
        let ids: Vec<Uuid> = self.tokens.read().await.keys().copied().collect();
        let mut stopped = 0;
        for id in ids {
            if let Ok(StopOutcome::Requested) = self.request_stop(id).await {
                stopped += 1;
            }
        }
        stopped
    }

    pub fn root(&self) -> &CancellationToken {
        &self.root
    }
}
