//! Task orchestration engine
//!
//! `TaskEngine` owns the status store, the FIFO job queue and the stop
//! controller, and runs one dispatcher task that admits pending tasks into
//! fresh workers, never more than `max_concurrent` at a time.

pub mod cancellation;
pub mod queue;
pub mod status_store;
pub mod worker;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vdig_common::events::{EventBus, TaskEvent};
use vdig_common::TaskStatus;

use crate::config::{EngineSettings, ModelRegistry, EVENT_CAPACITY};
use crate::models::{Submission, SubmissionResult, Task, TaskOptions};
use crate::services::asr::Transcriber;
use crate::services::expander::CollectionExpander;
use crate::services::fetcher::Fetcher;
use crate::services::generator::ContentGenerator;
use crate::services::platform::VideoPlatform;
use crate::services::subtitle_pipeline::SubtitlePipeline;
use crate::services::workspace::WorkspaceResolver;

pub use cancellation::CancellationController;
pub use queue::{JobQueue, QueueDepth};
pub use status_store::{StatusCounts, StatusStore, StopOutcome, StoreError};
pub use worker::{Worker, WorkerContext};

/// External collaborators the engine drives
pub struct EngineDeps {
    pub platform: Arc<dyn VideoPlatform>,
    pub transcriber: Arc<dyn Transcriber>,
    pub generator: Arc<dyn ContentGenerator>,
    pub workspaces: Arc<dyn WorkspaceResolver>,
    pub models: ModelRegistry,
}

pub struct TaskEngine {
    store: StatusStore,
    queue: Arc<JobQueue>,
    cancellation: CancellationController,
    expander: CollectionExpander,
    ctx: Arc<WorkerContext>,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl TaskEngine {
    /// Build an engine; nothing executes until [`TaskEngine::start`]
    pub fn new(deps: EngineDeps, settings: EngineSettings) -> Arc<Self> {
        let events = EventBus::new(EVENT_CAPACITY);
        let store = StatusStore::new(events);
        let shutdown = CancellationToken::new();
        let fetcher = Fetcher::new(settings.fetch);

        let pipeline =
            SubtitlePipeline::standard(deps.platform.clone(), fetcher.clone(), deps.transcriber);
        let expander =
            CollectionExpander::new(deps.platform, fetcher, settings.site_url.clone());

        let ctx = Arc::new(WorkerContext {
            store: store.clone(),
            pipeline,
            generator: deps.generator,
            workspaces: deps.workspaces,
            models: deps.models,
            settings: settings.clone(),
        });

        tracing::info!(
            max_concurrent = settings.max_concurrent,
            max_stage_retries = settings.max_stage_retries,
            tiers = ?ctx.pipeline.tiers(),
            "Task engine created"
        );

        Arc::new(Self {
            queue: Arc::new(JobQueue::new(settings.max_concurrent)),
            cancellation: CancellationController::new(store.clone(), shutdown.clone()),
            store,
            expander,
            ctx,
            shutdown,
            dispatcher: Mutex::new(None),
        })
    }

    /// Spawn the dispatcher; repeated calls are no-ops
    pub async fn start(&self) {
        let mut dispatcher = self.dispatcher.lock().await;
        if dispatcher.is_some() || self.shutdown.is_cancelled() {
            return;
        }
        let handle = tokio::spawn(dispatch(
            self.queue.clone(),
            self.ctx.clone(),
            self.cancellation.clone(),
            self.shutdown.clone(),
        ));
        *dispatcher = Some(handle);
        tracing::info!("Dispatcher started");
    }

    /// Validate a submission, expand its references and queue one task per video
    ///
    /// Validation failures are returned as `InvalidInput` and create no
    /// tasks. Expansion problems never fail the submission; they are
    /// reported as warnings on the result.
    pub async fn submit(&self, submission: Submission) -> vdig_common::Result<SubmissionResult> {
        if self.shutdown.is_cancelled() {
            return Err(vdig_common::Error::Internal(
                "engine is shutting down".to_string(),
            ));
        }

        let references = submission.references();
        if references.is_empty() {
            return Err(vdig_common::Error::InvalidInput(
                "at least one URL is required".to_string(),
            ));
        }
        let workspace = submission.workspace.trim();
        if workspace.is_empty() {
            return Err(vdig_common::Error::InvalidInput(
                "workspace is required".to_string(),
            ));
        }
        if !self.ctx.workspaces.exists(workspace) {
            return Err(vdig_common::Error::InvalidInput(format!(
                "workspace '{}' does not exist",
                workspace
            )));
        }
        let model_name = submission.model_name.trim();
        if model_name.is_empty() {
            return Err(vdig_common::Error::InvalidInput(
                "model_name is required".to_string(),
            ));
        }
        if !self.ctx.models.contains(model_name) {
            return Err(vdig_common::Error::InvalidInput(format!(
                "model '{}' is not configured",
                model_name
            )));
        }
        if submission.options.is_empty() {
            return Err(vdig_common::Error::InvalidInput(
                "select at least one artifact to generate".to_string(),
            ));
        }

        let mut tasks = Vec::new();
        let mut warnings = Vec::new();
        let mut expanded = false;

        for reference in &references {
            let expansion = self
                .expander
                .expand(reference, submission.download_all_parts)
                .await;
            expanded |= expansion.expanded;
            warnings.extend(expansion.warnings);

            let options = TaskOptions {
                artifacts: submission.options,
                all_parts_expanded: expansion.all_parts,
            };
            tasks.extend(expansion.references.into_iter().map(|resolved| {
                Task::new(resolved, workspace, model_name, options.clone())
            }));
        }

        let total_videos = tasks.len();
        let task_ids = self.store.insert_all(tasks).await;
        for &id in &task_ids {
            self.cancellation.register(id).await;
        }
        self.queue.push_all(&task_ids).await;

        tracing::info!(
            references = references.len(),
            tasks = task_ids.len(),
            workspace,
            model = model_name,
            warnings = warnings.len(),
            "Submission queued"
        );

        Ok(SubmissionResult {
            task_ids,
            total_videos: expanded.then_some(total_videos),
            warnings,
        })
    }

    /// Snapshot of every known task, newest first
    pub async fn poll_status(&self) -> Vec<Task> {
        self.store.snapshot().await
    }

    pub async fn get(&self, id: Uuid) -> Option<Task> {
        self.store.get(id).await
    }

    /// Request a cooperative stop; idempotent
    pub async fn request_stop(&self, id: Uuid) -> Result<StopOutcome, StoreError> {
        self.cancellation.request_stop(id).await
    }

    pub async fn counts(&self) -> StatusCounts {
        self.store.counts().await
    }

    pub async fn queue_depth(&self) -> QueueDepth {
        self.queue.depth().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.store.events().subscribe()
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.ctx.models
    }

    pub fn workspaces(&self) -> &dyn WorkspaceResolver {
        self.ctx.workspaces.as_ref()
    }

    pub fn max_concurrent(&self) -> usize {
        self.queue.max_concurrent()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop admitting work, cancel in-flight tasks and wait for their workers
    pub async fn shutdown(&self) {
        tracing::info!("Task engine shutting down");
        self.shutdown.cancel();

        let handle = self.dispatcher.lock().await.take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Dispatcher terminated abnormally");
                }
            }
            // Never started: pending tasks still need a terminal state
            None => stop_pending(&self.queue, &self.store).await,
        }
        tracing::info!("Task engine stopped");
    }
}

/// Admission loop: one slot, one pending id, one fresh worker
async fn dispatch(
    queue: Arc<JobQueue>,
    ctx: Arc<WorkerContext>,
    cancellation: CancellationController,
    shutdown: CancellationToken,
) {
    let mut workers = JoinSet::new();

    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(joined) = workers.join_next(), if !workers.is_empty() => {
                log_worker_exit(joined);
                continue;
            }
            permit = queue.acquire_slot() => match permit {
                Some(permit) => permit,
                None => break,
            },
        };

        let task_id = tokio::select! {
            _ = shutdown.cancelled() => break,
            id = queue.next() => id,
        };

        let token = match cancellation.token(task_id).await {
            Some(token) => token,
            None => cancellation.register(task_id).await,
        };
        let queue = queue.clone();
        let ctx = ctx.clone();
        let cancellation = cancellation.clone();

        tracing::debug!(task_id = %task_id, "Task admitted");
        workers.spawn(async move {
            // Held until the task is terminal
            let _permit = permit;
            let store = ctx.store.clone();

            let result = AssertUnwindSafe(Worker::new(task_id, ctx, token).run())
                .catch_unwind()
                .await;
            if result.is_err() {
                tracing::error!(task_id = %task_id, "Worker panicked");
                record_worker_panic(&store, task_id).await;
            }

            queue.finish(task_id).await;
            cancellation.release(task_id).await;
        });
    }

    queue.close();
    stop_pending(&queue, &ctx.store).await;

    tracing::info!(in_flight = workers.len(), "Waiting for in-flight workers");
    while let Some(joined) = workers.join_next().await {
        log_worker_exit(joined);
    }
    tracing::info!("Dispatcher stopped");
}

/// Move every never-admitted task to `stopped`
async fn stop_pending(queue: &JobQueue, store: &StatusStore) {
    let pending = queue.drain_pending().await;
    if pending.is_empty() {
        return;
    }
    tracing::info!(count = pending.len(), "Stopping tasks still waiting in queue");
    for id in pending {
        let result = match store.request_stop(id).await {
            Ok(StopOutcome::AlreadyTerminal(_)) => continue,
            Ok(_) => {
                store
                    .transition(id, TaskStatus::Stopped, "Stopped: service shutting down")
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(task_id = %id, error = %e, "Could not stop pending task");
        }
    }
}

/// Give a task whose worker panicked a terminal state
///
/// A task that was already asked to stop ends `stopped`, since `stopping`
/// only leads there; anything else still running ends `failed`.
async fn record_worker_panic(store: &StatusStore, task_id: Uuid) {
    let Some(task) = store.get(task_id).await else {
        return;
    };
    let result = match task.status {
        status if status.is_terminal() => return,
        TaskStatus::Pending | TaskStatus::Stopping => match store.request_stop(task_id).await {
            Ok(_) => store
                .transition(task_id, TaskStatus::Stopped, "Stopped: worker panicked")
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        },
        _ => store
            .transition(task_id, TaskStatus::Failed, "Internal error: worker panicked")
            .await
            .map(|_| ()),
    };
    if let Err(e) = result {
        tracing::warn!(task_id = %task_id, error = %e, "Could not record worker panic");
    }
}

fn log_worker_exit(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Worker task aborted");
    }
}
