//! Test Helper Utilities
//!
//! Fake collaborators with a shared call log, plus an engine builder backed
//! by a temporary root folder holding workspace "w1" and model "m1".

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::{broadcast, Notify, Semaphore};
use uuid::Uuid;
use vdig_common::config::ModelConfig;
use vdig_common::events::TaskEvent;
use vdig_common::TaskStatus;

use vdig_ai::config::{EngineSettings, ModelRegistry};
use vdig_ai::models::{ArtifactKind, ArtifactOptions, Segment, Submission, Task, Transcript};
use vdig_ai::services::{
    CollectionPage, ContentGenerator, DirectoryWorkspaces, FetchError, FetchPolicy,
    GenerationError, Transcriber, TranscriptionError, VideoInfo, VideoPart, VideoPlatform,
};
use vdig_ai::{EngineDeps, TaskEngine};

/// Ordered record of collaborator calls, e.g. `subtitle:BV1`, `asr:...`
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }
}

pub fn transcript(text: &str) -> Transcript {
    Transcript::new(vec![
        Segment {
            start: 0.0,
            end: 2.5,
            text: text.to_string(),
        },
        Segment {
            start: 2.5,
            end: 5.0,
            text: "second line".to_string(),
        },
    ])
}

/// In-memory video platform
#[derive(Default)]
pub struct FakePlatform {
    pub calls: CallLog,
    videos: Mutex<HashMap<String, VideoInfo>>,
    /// `None` entry: the video definitively has no subtitle
    subtitles: Mutex<HashMap<String, Option<Transcript>>>,
    collections: Mutex<HashMap<u64, Vec<Result<CollectionPage, FetchError>>>>,
    /// Errors returned by upcoming `video_info` calls before succeeding
    info_failures: Mutex<HashMap<String, VecDeque<FetchError>>>,
    covers: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakePlatform {
    pub fn new(calls: CallLog) -> Self {
        Self {
            calls,
            ..Self::default()
        }
    }

    /// Single-part video with a remote subtitle
    pub fn add_video(&self, bvid: &str, title: &str) {
        self.add_parts(bvid, title, &["P1"]);
        self.set_subtitle(bvid, Some(transcript(&format!("{} remote", title))));
    }

    pub fn add_parts(&self, bvid: &str, title: &str, parts: &[&str]) {
        let parts = parts
            .iter()
            .enumerate()
            .map(|(i, part)| VideoPart {
                page: i as u32 + 1,
                cid: 1000 + i as u64,
                part: part.to_string(),
            })
            .collect();
        self.videos.lock().unwrap().insert(
            bvid.to_string(),
            VideoInfo {
                bvid: bvid.to_string(),
                title: title.to_string(),
                parts,
                cover_url: None,
            },
        );
        self.subtitles
            .lock()
            .unwrap()
            .entry(bvid.to_string())
            .or_insert_with(|| Some(transcript(title)));
    }

    pub fn set_subtitle(&self, bvid: &str, subtitle: Option<Transcript>) {
        self.subtitles
            .lock()
            .unwrap()
            .insert(bvid.to_string(), subtitle);
    }

    /// Give a known video a cover image served with `bytes`
    pub fn add_cover(&self, bvid: &str, bytes: &[u8]) {
        let url = format!("https://i0.hdslb.com/bfs/archive/{}.png", bvid);
        if let Some(info) = self.videos.lock().unwrap().get_mut(bvid) {
            info.cover_url = Some(url.clone());
        }
        self.covers.lock().unwrap().insert(url, bytes.to_vec());
    }

    /// Keep listed cover URLs but serve none of them
    pub fn drop_covers(&self) {
        self.covers.lock().unwrap().clear();
    }

    pub fn add_collection(&self, media_id: u64, pages: Vec<Result<CollectionPage, FetchError>>) {
        self.collections.lock().unwrap().insert(media_id, pages);
    }

    pub fn fail_info(&self, bvid: &str, errors: Vec<FetchError>) {
        self.info_failures
            .lock()
            .unwrap()
            .insert(bvid.to_string(), errors.into());
    }
}

#[async_trait::async_trait]
impl VideoPlatform for FakePlatform {
    async fn video_info(&self, bvid: &str) -> Result<VideoInfo, FetchError> {
        self.calls.push(format!("info:{}", bvid));
        if let Some(err) = self
            .info_failures
            .lock()
            .unwrap()
            .get_mut(bvid)
            .and_then(|queue| queue.pop_front())
        {
            return Err(err);
        }
        self.videos
            .lock()
            .unwrap()
            .get(bvid)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(bvid.to_string()))
    }

    async fn subtitle(&self, bvid: &str, _cid: u64) -> Result<Option<Transcript>, FetchError> {
        self.calls.push(format!("subtitle:{}", bvid));
        Ok(self.subtitles.lock().unwrap().get(bvid).cloned().flatten())
    }

    async fn collection_page(&self, media_id: u64, page: u32) -> Result<CollectionPage, FetchError> {
        self.calls.push(format!("collection:{}:{}", media_id, page));
        let collections = self.collections.lock().unwrap();
        let pages = collections
            .get(&media_id)
            .ok_or_else(|| FetchError::PermissionDenied(format!("collection {}", media_id)))?;
        match pages.get(page as usize - 1) {
            Some(Ok(listing)) => Ok(listing.clone()),
            Some(Err(e)) => Err(e.clone()),
            None => Ok(CollectionPage::default()),
        }
    }

    async fn cover(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.push(format!("cover:{}", url));
        self.covers
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}

/// ASR fake: succeeds with a canned transcript unless told to fail
#[derive(Default)]
pub struct FakeTranscriber {
    pub calls: CallLog,
    failure: Mutex<Option<TranscriptionError>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    pub entered: Arc<Notify>,
}

impl FakeTranscriber {
    pub fn new(calls: CallLog) -> Self {
        Self {
            calls,
            ..Self::default()
        }
    }

    pub fn fail_with(&self, err: TranscriptionError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    /// Hold every transcription until the returned semaphore hands out a permit
    pub fn close_gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait::async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, reference: &str, _output: &Path) -> Result<Transcript, TranscriptionError> {
        self.calls.push(format!("asr:{}", reference));
        self.entered.notify_one();
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(transcript("asr text")),
        }
    }
}

/// Generation fake with per-kind failures and an optional gate
pub struct FakeGenerator {
    pub calls: CallLog,
    failures: Mutex<HashMap<ArtifactKind, GenerationError>>,
    /// When set, every call waits for one permit before answering
    gate: Mutex<Option<Arc<Semaphore>>>,
    pub entered: Arc<Notify>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    delay: Mutex<Duration>,
    panics: AtomicBool,
}

impl FakeGenerator {
    pub fn new(calls: CallLog) -> Self {
        Self {
            calls,
            failures: Mutex::new(HashMap::new()),
            gate: Mutex::new(None),
            entered: Arc::new(Notify::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            panics: AtomicBool::new(false),
        }
    }

    pub fn fail_kind(&self, kind: ArtifactKind, err: GenerationError) {
        self.failures.lock().unwrap().insert(kind, err);
    }

    /// Hold every call until the returned semaphore hands out a permit
    pub fn close_gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Panic once the gate and delay have passed
    pub fn panic_on_call(&self) {
        self.panics.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ContentGenerator for FakeGenerator {
    async fn generate(
        &self,
        model: &ModelConfig,
        kind: ArtifactKind,
        title: &str,
        _transcript: &Transcript,
    ) -> Result<String, GenerationError> {
        self.calls
            .push(format!("generate:{}:{}:{}", model.name, kind.as_str(), title));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.entered.notify_one();

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.panics.load(Ordering::SeqCst) {
            panic!("generator crashed on {}", kind.as_str());
        }

        if let Some(err) = self.failures.lock().unwrap().get(&kind) {
            return Err(err.clone());
        }
        Ok(if kind.is_json() {
            format!(r#"{{"kind": "{}", "title": "{}"}}"#, kind.as_str(), title)
        } else {
            format!("# {}\n\nDocument body", title)
        })
    }
}

pub fn test_model(name: &str) -> ModelConfig {
    ModelConfig {
        name: name.to_string(),
        model_name: "test-model".to_string(),
        api_base: "http://127.0.0.1:9/v1".to_string(),
        api_key: "test-key".to_string(),
    }
}

pub fn test_settings(max_concurrent: usize) -> EngineSettings {
    EngineSettings {
        max_concurrent,
        max_stage_retries: 3,
        stage_retry_delay: Duration::from_millis(5),
        fetch: FetchPolicy {
            max_attempts: 1,
            pacing: Duration::ZERO,
            jitter: Duration::ZERO,
        },
        site_url: "https://www.bilibili.com".to_string(),
    }
}

/// Engine wired to fakes; the dispatcher is not started
pub struct TestEngine {
    pub engine: Arc<TaskEngine>,
    pub root: TempDir,
    pub calls: CallLog,
    pub platform: Arc<FakePlatform>,
    pub transcriber: Arc<FakeTranscriber>,
    pub generator: Arc<FakeGenerator>,
    pub events: broadcast::Receiver<TaskEvent>,
}

impl TestEngine {
    pub fn new(max_concurrent: usize) -> Self {
        Self::with_settings(test_settings(max_concurrent))
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("w1")).unwrap();

        let calls = CallLog::default();
        let platform = Arc::new(FakePlatform::new(calls.clone()));
        let transcriber = Arc::new(FakeTranscriber::new(calls.clone()));
        let generator = Arc::new(FakeGenerator::new(calls.clone()));

        let deps = EngineDeps {
            platform: platform.clone(),
            transcriber: transcriber.clone(),
            generator: generator.clone(),
            workspaces: Arc::new(DirectoryWorkspaces::new(root.path())),
            models: ModelRegistry::new(vec![test_model("m1")]),
        };
        let engine = TaskEngine::new(deps, settings);
        let events = engine.subscribe();

        Self {
            engine,
            root,
            calls,
            platform,
            transcriber,
            generator,
            events,
        }
    }

    pub fn workspace_dir(&self) -> std::path::PathBuf {
        self.root.path().join("w1")
    }

    /// Drain every event received so far
    pub fn take_events(&mut self) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn submission(urls: &[&str], options: ArtifactOptions) -> Submission {
    Submission {
        urls: urls.iter().map(|u| u.to_string()).collect(),
        workspace: "w1".to_string(),
        model_name: "m1".to_string(),
        download_all_parts: false,
        options,
    }
}

pub fn summary_only() -> ArtifactOptions {
    ArtifactOptions {
        summary: true,
        ..ArtifactOptions::default()
    }
}

/// Poll until every listed task is terminal
pub async fn wait_terminal(engine: &TaskEngine, ids: &[Uuid]) -> Vec<Task> {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let mut tasks = Vec::with_capacity(ids.len());
            for id in ids {
                tasks.push(engine.get(*id).await.unwrap());
            }
            if tasks.iter().all(|t| t.is_terminal()) {
                return tasks;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("tasks did not finish in time")
}

/// Poll until the task reaches `status`
pub async fn wait_status(engine: &TaskEngine, id: Uuid, status: TaskStatus) -> Task {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let task = engine.get(id).await.unwrap();
            if task.status == status {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("task never reached {}", status))
}

/// Status sequence of one task, starting at `pending`
pub fn status_path(events: &[TaskEvent], id: Uuid) -> Vec<TaskStatus> {
    let mut path = vec![TaskStatus::Pending];
    for event in events {
        if let TaskEvent::StatusChanged {
            task_id,
            old_status,
            new_status,
            ..
        } = event
        {
            if *task_id == id {
                assert_eq!(path.last(), Some(old_status), "event chain broken for {}", id);
                path.push(*new_status);
            }
        }
    }
    path
}

/// Largest number of tasks simultaneously acquiring or generating
pub fn peak_active(events: &[TaskEvent]) -> usize {
    let mut active = HashSet::new();
    let mut peak = 0;
    for event in events {
        if let TaskEvent::StatusChanged {
            task_id, new_status, ..
        } = event
        {
            if new_status.is_active() {
                active.insert(*task_id);
            } else {
                active.remove(task_id);
            }
            peak = peak.max(active.len());
        }
    }
    peak
}

pub fn retry_counts(events: &[TaskEvent], id: Uuid) -> Vec<u32> {
    events
        .iter()
        .filter_map(|event| match event {
            TaskEvent::RetryScheduled {
                task_id,
                retry_count,
                ..
            } if *task_id == id => Some(*retry_count),
            _ => None,
        })
        .collect()
}
