//! Per-task execution
//!
//! A [`Worker`] is created for exactly one admitted task and dropped when the
//! task is terminal. It drives the task through acquisition and generation,
//! retrying transient stage failures, and checks for a stop request:
//! - before claiming the task
//! - between acquisition and generation
//! - before every artifact and after the last one
//!
//! In-flight calls are never interrupted; only backoff sleeps end early.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vdig_common::TaskStatus;

use super::status_store::{StatusStore, StoreError};
use crate::config::{EngineSettings, ModelRegistry};
use crate::error::TaskError;
use crate::models::{AcquiredTranscript, ArtifactKind, Task, Transcript};
use crate::services::generator::{ArtifactWriter, ContentGenerator};
use crate::services::subtitle_pipeline::{ResolvedVideo, SubtitlePipeline};
use crate::services::workspace::WorkspaceResolver;
use vdig_common::config::ModelConfig;

/// Collaborators shared by all workers of one engine
pub struct WorkerContext {
    pub store: StatusStore,
    pub pipeline: SubtitlePipeline,
    pub generator: Arc<dyn ContentGenerator>,
    pub workspaces: Arc<dyn WorkspaceResolver>,
    pub models: ModelRegistry,
    pub settings: EngineSettings,
}

/// Why execution left the normal path
#[derive(Debug)]
enum Interrupt {
    Stopped,
    Failed(TaskError),
}

impl From<TaskError> for Interrupt {
    fn from(err: TaskError) -> Self {
        Interrupt::Failed(err)
    }
}

impl From<StoreError> for Interrupt {
    fn from(err: StoreError) -> Self {
        match err {
            // Stop won the race against the worker's own transition
            StoreError::Transition(t) if t.from == TaskStatus::Stopping => Interrupt::Stopped,
            other => Interrupt::Failed(TaskError::Store(other)),
        }
    }
}

/// Artifacts produced by the generation stage
struct GenerationOutcome {
    produced: BTreeMap<ArtifactKind, String>,
    failed: Vec<ArtifactKind>,
    last_error: Option<TaskError>,
}

pub struct Worker {
    task_id: Uuid,
    ctx: Arc<WorkerContext>,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(task_id: Uuid, ctx: Arc<WorkerContext>, cancel: CancellationToken) -> Self {
        Self {
            task_id,
            ctx,
            cancel,
        }
    }

    /// Drive the task to a terminal state
    pub async fn run(self) {
        tracing::debug!(task_id = %self.task_id, "Worker started");

        match self.execute().await {
            Ok(()) => {}
            Err(Interrupt::Stopped) => self.finish_stopped().await,
            Err(Interrupt::Failed(err)) => self.finish_failed(err).await,
        }

        tracing::debug!(task_id = %self.task_id, "Worker finished");
    }

    async fn execute(&self) -> Result<(), Interrupt> {
        self.checkpoint().await?;

        let Some(task) = self.ctx.store.get(self.task_id).await else {
            tracing::warn!(task_id = %self.task_id, "Admitted task vanished from the status store");
            return Ok(());
        };

        self.ctx
            .store
            .transition(self.task_id, TaskStatus::Acquiring, "Fetching video information")
            .await?;
        tracing::info!(task_id = %self.task_id, reference = %task.source_reference, "Task started");

        let workspace_dir = self.ctx.workspaces.resolve(&task.workspace).ok_or_else(|| {
            TaskError::Configuration(format!("workspace '{}' does not exist", task.workspace))
        })?;
        let model = self.ctx.models.get(&task.model_name).cloned().ok_or_else(|| {
            TaskError::Configuration(format!("model '{}' is not configured", task.model_name))
        })?;

        let (video, acquired) = self
            .with_stage_retry("acquisition", || self.acquire(&task, &workspace_dir))
            .await?;

        self.checkpoint().await?;

        let kinds = task.options.artifacts.requested();
        self.ctx
            .store
            .transition(
                self.task_id,
                TaskStatus::Generating,
                format!(
                    "Generating {} artifact(s) from {} transcript",
                    kinds.len(),
                    acquired.tier
                ),
            )
            .await?;

        let outcome = self
            .generate_all(&model, &kinds, &video, &acquired.transcript, &workspace_dir)
            .await?;

        self.checkpoint().await?;

        if outcome.produced.is_empty() {
            return Err(Interrupt::Failed(outcome.last_error.unwrap_or_else(|| {
                TaskError::Configuration("no artifacts requested".to_string())
            })));
        }

        let message = if outcome.failed.is_empty() {
            format!(
                "Completed: {} artifact(s) from {} transcript",
                outcome.produced.len(),
                acquired.tier
            )
        } else {
            let failed: Vec<&str> = outcome.failed.iter().map(|k| k.as_str()).collect();
            format!(
                "Completed with {} artifact(s); failed: {} ({})",
                outcome.produced.len(),
                failed.join(", "),
                outcome
                    .last_error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default()
            )
        };

        let artifact_count = outcome.produced.len();
        self.ctx
            .store
            .complete(self.task_id, outcome.produced, message)
            .await?;
        tracing::info!(
            task_id = %self.task_id,
            title = %video.title,
            artifacts = artifact_count,
            tier = %acquired.tier,
            "Task completed"
        );
        Ok(())
    }

    /// Resolve metadata and obtain a transcript
    async fn acquire(
        &self,
        task: &Task,
        workspace_dir: &Path,
    ) -> Result<(ResolvedVideo, AcquiredTranscript), TaskError> {
        let video = self
            .ctx
            .pipeline
            .resolve(&task.source_reference, workspace_dir)
            .await?;
        self.ctx.store.set_title(self.task_id, video.title.clone()).await?;
        if let Some(cover) = self.ctx.pipeline.save_cover(&video).await {
            self.ctx.store.set_cover(self.task_id, cover).await?;
        }
        self.ctx
            .store
            .set_message(self.task_id, format!("Acquiring transcript for {}", video.title))
            .await?;

        let acquired = self.ctx.pipeline.acquire(&video).await?;
        Ok((video, acquired))
    }

    async fn generate_all(
        &self,
        model: &ModelConfig,
        kinds: &[ArtifactKind],
        video: &ResolvedVideo,
        transcript: &Transcript,
        workspace_dir: &Path,
    ) -> Result<GenerationOutcome, Interrupt> {
        let writer = ArtifactWriter::new(workspace_dir.to_path_buf());
        let mut outcome = GenerationOutcome {
            produced: BTreeMap::new(),
            failed: Vec::new(),
            last_error: None,
        };

        for (index, &kind) in kinds.iter().enumerate() {
            self.checkpoint().await?;

            if let Some(locator) = writer.existing(&video.title, kind).await {
                tracing::info!(task_id = %self.task_id, kind = %kind, locator = %locator, "Artifact exists, reusing");
                outcome.produced.insert(kind, locator);
                continue;
            }

            self.ctx
                .store
                .set_message(
                    self.task_id,
                    format!("Generating {} ({}/{})", kind, index + 1, kinds.len()),
                )
                .await?;

            let generated = self
                .with_stage_retry(kind.as_str(), || async {
                    self.ctx
                        .generator
                        .generate(model, kind, &video.title, transcript)
                        .await
                        .map_err(|source| TaskError::Generation { kind, source })
                })
                .await;

            let result = match generated {
                Ok(text) => writer
                    .write(&video.title, kind, &text)
                    .await
                    .map_err(TaskError::Storage),
                Err(Interrupt::Stopped) => return Err(Interrupt::Stopped),
                Err(Interrupt::Failed(err)) => Err(err),
            };

            match result {
                Ok(locator) => {
                    outcome.produced.insert(kind, locator);
                }
                Err(err) => {
                    tracing::warn!(task_id = %self.task_id, kind = %kind, error = %err, "Artifact failed");
                    outcome.failed.push(kind);
                    outcome.last_error = Some(err);
                }
            }
        }

        Ok(outcome)
    }

    /// Run one stage operation, re-attempting transient failures
    ///
    /// The retry counter starts fresh for every operation and never exceeds
    /// `max_stage_retries`.
    async fn with_stage_retry<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, Interrupt>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        let max_retries = self.ctx.settings.max_stage_retries;
        self.ctx.store.reset_retries(self.task_id).await?;
        let mut retries = 0;

        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_transient() || retries >= max_retries {
                if retries > 0 {
                    tracing::warn!(
                        task_id = %self.task_id,
                        operation,
                        retries,
                        error = %err,
                        "Stage operation failed after retries"
                    );
                }
                return Err(Interrupt::Failed(err));
            }

            if self.stop_requested().await {
                return Err(Interrupt::Stopped);
            }

            retries += 1;
            let reason = err.to_string();
            self.ctx
                .store
                .record_retry(self.task_id, &reason, max_retries)
                .await?;
            tracing::warn!(
                task_id = %self.task_id,
                operation,
                retry = retries,
                max_retries,
                error = %reason,
                "Transient stage failure, retrying"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Interrupt::Stopped),
                _ = tokio::time::sleep(self.ctx.settings.stage_retry_delay) => {}
            }
        }
    }

    async fn stop_requested(&self) -> bool {
        self.cancel.is_cancelled() || self.ctx.store.cancel_requested(self.task_id).await
    }

    async fn checkpoint(&self) -> Result<(), Interrupt> {
        if self.stop_requested().await {
            tracing::info!(task_id = %self.task_id, "Stop observed at checkpoint");
            Err(Interrupt::Stopped)
        } else {
            Ok(())
        }
    }

    async fn finish_stopped(&self) {
        // Engine shutdown cancels tokens without a prior stop request
        let message = if self.ctx.store.cancel_requested(self.task_id).await {
            "Stopped by user"
        } else {
            "Stopped: service shutting down"
        };
        if let Err(e) = self.ctx.store.request_stop(self.task_id).await {
            tracing::warn!(task_id = %self.task_id, error = %e, "Could not mark task stopping");
            return;
        }
        match self
            .ctx
            .store
            .transition(self.task_id, TaskStatus::Stopped, message)
            .await
        {
            Ok(_) => tracing::info!(task_id = %self.task_id, "Task stopped"),
            Err(e) => tracing::debug!(task_id = %self.task_id, error = %e, "Task already finished"),
        }
    }

    async fn finish_failed(&self, err: TaskError) {
        if self.stop_requested().await {
            tracing::debug!(task_id = %self.task_id, error = %err, "Failure after stop request, recording stop");
            self.finish_stopped().await;
            return;
        }

        tracing::error!(task_id = %self.task_id, error = %err, "Task failed");
        if let Err(e) = self
            .ctx
            .store
            .transition(self.task_id, TaskStatus::Failed, err.to_string())
            .await
        {
            match e {
                StoreError::Transition(t) if t.from == TaskStatus::Stopping => {
                    self.finish_stopped().await
                }
                other => {
                    tracing::warn!(task_id = %self.task_id, error = %other, "Could not record failure")
                }
            }
        }
    }
}

