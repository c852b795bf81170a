//! Task engine integration tests
//!
//! Drives the engine with fake collaborators and checks lifecycle, retry,
//! admission and cancellation behavior through polling and the event bus.

mod helpers;

use std::sync::atomic::Ordering;
use std::time::Duration;

use helpers::*;
use vdig_ai::engine::StopOutcome;
use vdig_ai::models::{ArtifactKind, ArtifactOptions, Tier};
use vdig_ai::services::{CollectionPage, FetchError, GenerationError, TranscriptionError};
use vdig_common::TaskStatus;

#[tokio::test]
async fn test_plain_references_create_pending_tasks() {
    let t = TestEngine::new(2);
    let result = t
        .engine
        .submit(submission(
            &["BV1aaaaaaaaa", "https://www.bilibili.com/video/BV1bbbbbbbbb", "BV1ccccccccc?p=2"],
            summary_only(),
        ))
        .await
        .unwrap();

    assert_eq!(result.task_ids.len(), 3);
    assert_eq!(result.total_videos, None);

    let tasks = t.engine.poll_status().await;
    assert_eq!(tasks.len(), 3);
    for task in &tasks {
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.workspace, "w1");
        assert_eq!(task.model_name, "m1");
        assert!(task.artifacts.is_none());
    }
    // Nothing runs before the dispatcher starts
    assert!(t.calls.entries().is_empty());
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_single_video_produces_four_artifacts() {
    let mut t = TestEngine::new(2);
    t.platform.add_video("BV1GJ411x7h7", "Rust Ownership");

    let result = t
        .engine
        .submit(submission(&["BV1GJ411x7h7"], ArtifactOptions::all()))
        .await
        .unwrap();
    let id = result.task_ids[0];
    assert_eq!(t.engine.get(id).await.unwrap().status, TaskStatus::Pending);

    t.engine.start().await;
    let task = wait_terminal(&t.engine, &[id]).await.remove(0);

    assert_eq!(task.status, TaskStatus::Completed, "message: {}", task.message);
    assert_eq!(task.title.as_deref(), Some("Rust Ownership"));
    let artifacts = task.artifacts.expect("artifacts on completed task");
    assert_eq!(artifacts.len(), 4);
    assert_eq!(
        artifacts[&ArtifactKind::FullDocument],
        "Rust Ownership/markdown/Rust Ownership.md"
    );
    for locator in artifacts.values() {
        assert!(t.workspace_dir().join(locator).is_file(), "{} missing", locator);
    }
    assert!(task.message.contains("remote"));

    // Remote transcript is kept for the local tier
    assert!(t
        .workspace_dir()
        .join("Rust Ownership")
        .join("Rust Ownership.srt")
        .is_file());

    let events = t.take_events();
    assert_eq!(
        status_path(&events, id),
        vec![
            TaskStatus::Pending,
            TaskStatus::Acquiring,
            TaskStatus::Generating,
            TaskStatus::Completed
        ]
    );
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_remote_miss_falls_back_to_local_before_asr() {
    let t = TestEngine::new(1);
    t.platform.add_video("BV1local0000", "Local Talk");
    t.platform.set_subtitle("BV1local0000", None);

    let video_dir = t.workspace_dir().join("Local Talk");
    std::fs::create_dir_all(&video_dir).unwrap();
    std::fs::write(
        video_dir.join("Local Talk.srt"),
        "1\n00:00:00,000 --> 00:00:02,000\nstored line\n",
    )
    .unwrap();

    let ids = t
        .engine
        .submit(submission(&["BV1local0000"], summary_only()))
        .await
        .unwrap()
        .task_ids;
    t.engine.start().await;
    let task = wait_terminal(&t.engine, &ids).await.remove(0);

    assert_eq!(task.status, TaskStatus::Completed, "message: {}", task.message);
    assert!(task.message.contains(&Tier::Local.to_string()));
    assert_eq!(t.calls.count_prefix("subtitle:"), 1);
    assert_eq!(t.calls.count_prefix("asr:"), 0);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_asr_runs_only_after_remote_and_local_miss() {
    let t = TestEngine::new(1);
    t.platform.add_video("BV1asr000000", "Lecture");
    t.platform.set_subtitle("BV1asr000000", None);

    let ids = t
        .engine
        .submit(submission(&["BV1asr000000"], summary_only()))
        .await
        .unwrap()
        .task_ids;
    t.engine.start().await;
    let task = wait_terminal(&t.engine, &ids).await.remove(0);

    assert_eq!(task.status, TaskStatus::Completed, "message: {}", task.message);
    let subtitle_at = t.calls.position("subtitle:").unwrap();
    let asr_at = t.calls.position("asr:").unwrap();
    assert!(subtitle_at < asr_at);
    assert!(t.workspace_dir().join("Lecture").join("Lecture.srt").is_file());
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_asr_failure_is_reported_instead_of_remote_miss() {
    let mut t = TestEngine::new(1);
    t.platform.add_video("BV1fail00000", "Silent Video");
    t.platform.set_subtitle("BV1fail00000", None);
    t.transcriber
        .fail_with(TranscriptionError::Failed("exit status 1: no audio stream".into()));

    let ids = t
        .engine
        .submit(submission(&["BV1fail00000"], ArtifactOptions::all()))
        .await
        .unwrap()
        .task_ids;
    t.engine.start().await;
    let task = wait_terminal(&t.engine, &ids).await.remove(0);

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.message.contains("ASR"), "message: {}", task.message);
    assert!(!task.message.contains("no subtitles"));
    assert!(task.artifacts.is_none());
    assert_eq!(t.calls.count_prefix("generate:"), 0);

    let events = t.take_events();
    assert_eq!(
        status_path(&events, ids[0]),
        vec![TaskStatus::Pending, TaskStatus::Acquiring, TaskStatus::Failed]
    );
    // Definitive ASR failure is not retried
    assert!(retry_counts(&events, ids[0]).is_empty());
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_transient_acquisition_failure_is_retried() {
    let mut t = TestEngine::new(1);
    t.platform.add_video("BV1flaky0000", "Flaky");
    t.platform.fail_info(
        "BV1flaky0000",
        vec![FetchError::Server(503), FetchError::Timeout("read".into())],
    );

    let ids = t
        .engine
        .submit(submission(&["BV1flaky0000"], summary_only()))
        .await
        .unwrap()
        .task_ids;
    t.engine.start().await;
    let task = wait_terminal(&t.engine, &ids).await.remove(0);

    assert_eq!(task.status, TaskStatus::Completed, "message: {}", task.message);
    assert_eq!(t.calls.count_prefix("info:"), 3);
    assert_eq!(retry_counts(&t.take_events(), ids[0]), vec![1, 2]);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_stage_retries_stop_at_cap() {
    let mut t = TestEngine::new(1);
    t.platform.add_video("BV1cap000000", "Overloaded");
    t.generator.fail_kind(
        ArtifactKind::Summary,
        GenerationError::Unavailable("HTTP 503".into()),
    );

    let ids = t
        .engine
        .submit(submission(&["BV1cap000000"], summary_only()))
        .await
        .unwrap()
        .task_ids;
    t.engine.start().await;
    let task = wait_terminal(&t.engine, &ids).await.remove(0);

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.message.contains("summary generation failed"), "message: {}", task.message);
    assert!(task.retry_count <= 3);
    // One attempt plus three retries
    assert_eq!(t.calls.count_prefix("generate:"), 4);
    assert_eq!(retry_counts(&t.take_events(), ids[0]), vec![1, 2, 3]);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_partial_artifact_failure_still_completes() {
    let t = TestEngine::new(1);
    t.platform.add_video("BV1part00000", "Partial");
    t.generator.fail_kind(
        ArtifactKind::Exercises,
        GenerationError::Rejected("content policy".into()),
    );

    let ids = t
        .engine
        .submit(submission(&["BV1part00000"], ArtifactOptions::all()))
        .await
        .unwrap()
        .task_ids;
    t.engine.start().await;
    let task = wait_terminal(&t.engine, &ids).await.remove(0);

    assert_eq!(task.status, TaskStatus::Completed);
    let artifacts = task.artifacts.unwrap();
    assert_eq!(artifacts.len(), 3);
    assert!(!artifacts.contains_key(&ArtifactKind::Exercises));
    assert!(task.message.contains("exercises"), "message: {}", task.message);
    // Rejected output is definitive, no retries
    assert_eq!(t.calls.count_prefix("generate:m1:exercises"), 1);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_existing_artifact_is_reused() {
    let t = TestEngine::new(1);
    t.platform.add_video("BV1reuse0000", "Reuse");
    let video_dir = t.workspace_dir().join("Reuse");
    std::fs::create_dir_all(&video_dir).unwrap();
    std::fs::write(video_dir.join("Reuse_summary.json"), r#"{"summary": "old"}"#).unwrap();

    let options = ArtifactOptions {
        summary: true,
        guiding_questions: true,
        ..ArtifactOptions::default()
    };
    let ids = t
        .engine
        .submit(submission(&["BV1reuse0000"], options))
        .await
        .unwrap()
        .task_ids;
    t.engine.start().await;
    let task = wait_terminal(&t.engine, &ids).await.remove(0);

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.artifacts.unwrap().len(), 2);
    assert_eq!(t.calls.count_prefix("generate:m1:summary"), 0);
    assert_eq!(t.calls.count_prefix("generate:m1:guiding_questions"), 1);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_collection_runs_serially_with_one_slot() {
    let mut t = TestEngine::new(1);
    for (bvid, title) in [("BV1m1", "Member One"), ("BV1m2", "Member Two"), ("BV1m3", "Member Three")] {
        t.platform.add_video(bvid, title);
    }
    t.platform.add_collection(
        42,
        vec![
            Ok(CollectionPage {
                bvids: vec!["BV1m1".into(), "BV1m2".into()],
                has_more: true,
            }),
            Ok(CollectionPage {
                bvids: vec!["BV1m3".into()],
                has_more: false,
            }),
        ],
    );
    t.generator.set_delay(Duration::from_millis(10));

    let result = t
        .engine
        .submit(submission(
            &["https://space.bilibili.com/1/favlist?fid=42"],
            summary_only(),
        ))
        .await
        .unwrap();
    assert_eq!(result.task_ids.len(), 3);
    assert_eq!(result.total_videos, Some(3));

    let tasks = t.engine.poll_status().await;
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
    assert!(tasks
        .iter()
        .any(|t| t.source_reference == "https://www.bilibili.com/video/BV1m3"));

    t.engine.start().await;
    let tasks = wait_terminal(&t.engine, &result.task_ids).await;
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));

    let events = t.take_events();
    assert_eq!(peak_active(&events), 1);
    assert_eq!(t.generator.max_in_flight.load(Ordering::SeqCst), 1);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_collection_page_failure_keeps_fetched_members() {
    let t = TestEngine::new(1);
    t.platform.add_collection(
        7,
        vec![
            Ok(CollectionPage {
                bvids: vec!["BV1k1".into(), "BV1k2".into()],
                has_more: true,
            }),
            Err(FetchError::PermissionDenied("collection is private".into())),
        ],
    );

    let result = t
        .engine
        .submit(submission(&["https://www.bilibili.com/medialist/detail/ml7"], summary_only()))
        .await
        .unwrap();
    assert_eq!(result.task_ids.len(), 2);
    assert_eq!(result.total_videos, Some(2));
    assert_eq!(result.warnings.len(), 1);
    assert!(result.message().contains("private"));
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_all_parts_expand_into_sibling_tasks() {
    let t = TestEngine::new(2);
    t.platform.add_parts("BV1multi0000", "Course", &["Intro", "Basics", "Wrap-up"]);

    let mut request = submission(&["BV1multi0000"], summary_only());
    request.download_all_parts = true;
    let result = t.engine.submit(request).await.unwrap();
    assert_eq!(result.task_ids.len(), 3);
    assert_eq!(result.total_videos, Some(3));

    t.engine.start().await;
    let tasks = wait_terminal(&t.engine, &result.task_ids).await;
    let mut titles: Vec<String> = tasks.iter().filter_map(|t| t.title.clone()).collect();
    titles.sort();
    assert_eq!(titles, vec!["Course_Basics", "Course_Intro", "Course_Wrap-up"]);
    assert!(tasks.iter().all(|t| t.options.all_parts_expanded));
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_admission_never_exceeds_max_concurrent() {
    let mut t = TestEngine::new(2);
    let bvids: Vec<String> = (0..6).map(|i| format!("BV1load{:05}", i)).collect();
    for bvid in &bvids {
        t.platform.add_video(bvid, bvid);
    }
    t.generator.set_delay(Duration::from_millis(15));

    let urls: Vec<&str> = bvids.iter().map(String::as_str).collect();
    let ids = t
        .engine
        .submit(submission(&urls, summary_only()))
        .await
        .unwrap()
        .task_ids;
    t.engine.start().await;
    let tasks = wait_terminal(&t.engine, &ids).await;

    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
    let events = t.take_events();
    assert!(peak_active(&events) <= 2);
    assert!(t.generator.max_in_flight.load(Ordering::SeqCst) <= 2);
    for id in &ids {
        // Every path is a valid walk through the lifecycle
        assert_eq!(status_path(&events, *id).last(), Some(&TaskStatus::Completed));
    }
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_stop_during_generation_waits_for_inflight_call() {
    let mut t = TestEngine::new(1);
    t.platform.add_video("BV1stop00000", "Long Talk");
    let gate = t.generator.close_gate();

    let ids = t
        .engine
        .submit(submission(&["BV1stop00000"], ArtifactOptions::all()))
        .await
        .unwrap()
        .task_ids;
    let id = ids[0];
    t.engine.start().await;

    wait_status(&t.engine, id, TaskStatus::Generating).await;
    tokio::time::timeout(Duration::from_secs(5), t.generator.entered.notified())
        .await
        .expect("generation never started");

    assert_eq!(t.engine.request_stop(id).await.unwrap(), StopOutcome::Requested);
    let task = t.engine.get(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Stopping);
    assert!(task.cancel_requested);

    gate.add_permits(1);
    let task = wait_terminal(&t.engine, &ids).await.remove(0);
    assert_eq!(task.status, TaskStatus::Stopped);
    assert!(task.artifacts.is_none());
    assert_eq!(task.message, "Stopped by user");
    // No further artifact was started after the stop
    assert_eq!(t.calls.count_prefix("generate:"), 1);

    let events = t.take_events();
    assert_eq!(
        status_path(&events, id),
        vec![
            TaskStatus::Pending,
            TaskStatus::Acquiring,
            TaskStatus::Generating,
            TaskStatus::Stopping,
            TaskStatus::Stopped
        ]
    );
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let t = TestEngine::new(1);
    t.platform.add_video("BV1idem00000", "Idempotent");

    let ids = t
        .engine
        .submit(submission(&["BV1idem00000"], summary_only()))
        .await
        .unwrap()
        .task_ids;
    let id = ids[0];

    assert_eq!(t.engine.request_stop(id).await.unwrap(), StopOutcome::Requested);
    assert_eq!(
        t.engine.request_stop(id).await.unwrap(),
        StopOutcome::AlreadyStopping
    );
    assert_eq!(t.engine.get(id).await.unwrap().status, TaskStatus::Stopping);

    t.engine.start().await;
    let task = wait_terminal(&t.engine, &ids).await.remove(0);
    assert_eq!(task.status, TaskStatus::Stopped);
    // A stopped pending task never reaches acquisition
    assert!(t.calls.entries().is_empty());

    assert_eq!(
        t.engine.request_stop(id).await.unwrap(),
        StopOutcome::AlreadyTerminal(TaskStatus::Stopped)
    );
    assert_eq!(t.engine.get(id).await.unwrap().status, TaskStatus::Stopped);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_stop_unknown_task_is_not_found() {
    let t = TestEngine::new(1);
    let err = t.engine.request_stop(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, vdig_ai::engine::StoreError::NotFound(_)));
}

#[tokio::test]
async fn test_failure_does_not_abort_siblings() {
    let t = TestEngine::new(2);
    t.platform.add_video("BV1good00000", "Good");

    let ids = t
        .engine
        .submit(submission(&["BV1gone00000", "BV1good00000", "not a video"], summary_only()))
        .await
        .unwrap()
        .task_ids;
    t.engine.start().await;
    let tasks = wait_terminal(&t.engine, &ids).await;

    assert_eq!(tasks[0].status, TaskStatus::Failed);
    assert!(tasks[0].message.contains("Not found"), "message: {}", tasks[0].message);
    assert_eq!(tasks[1].status, TaskStatus::Completed);
    assert_eq!(tasks[2].status, TaskStatus::Failed);
    assert!(tasks[2].message.contains("Invalid video reference"));
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_validation_rejects_without_creating_tasks() {
    let t = TestEngine::new(1);

    let cases = vec![
        submission(&[], summary_only()),
        submission(&["  "], summary_only()),
        {
            let mut s = submission(&["BV1x"], summary_only());
            s.workspace = String::new();
            s
        },
        {
            let mut s = submission(&["BV1x"], summary_only());
            s.workspace = "missing".into();
            s
        },
        {
            let mut s = submission(&["BV1x"], summary_only());
            s.model_name = String::new();
            s
        },
        {
            let mut s = submission(&["BV1x"], summary_only());
            s.model_name = "m9".into();
            s
        },
        submission(&["BV1x"], ArtifactOptions::default()),
    ];

    for case in cases {
        let err = t.engine.submit(case).await.unwrap_err();
        assert!(matches!(err, vdig_common::Error::InvalidInput(_)), "{:?}", err);
    }
    assert!(t.engine.poll_status().await.is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_running_and_pending_tasks() {
    let t = TestEngine::new(1);
    for bvid in ["BV1sd1", "BV1sd2", "BV1sd3"] {
        t.platform.add_video(bvid, bvid);
    }
    let gate = t.generator.close_gate();

    let ids = t
        .engine
        .submit(submission(&["BV1sd1", "BV1sd2", "BV1sd3"], ArtifactOptions::all()))
        .await
        .unwrap()
        .task_ids;
    t.engine.start().await;
    wait_status(&t.engine, ids[0], TaskStatus::Generating).await;
    tokio::time::timeout(Duration::from_secs(5), t.generator.entered.notified())
        .await
        .expect("generation never started");

    let engine = t.engine.clone();
    let shutdown = tokio::spawn(async move { engine.shutdown().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    gate.add_permits(10);
    tokio::time::timeout(Duration::from_secs(5), shutdown)
        .await
        .unwrap()
        .unwrap();

    let tasks = wait_terminal(&t.engine, &ids).await;
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Stopped));
    assert_eq!(tasks[1].message, "Stopped: service shutting down");

    let err = t
        .engine
        .submit(submission(&["BV1sd1"], summary_only()))
        .await
        .unwrap_err();
    assert!(matches!(err, vdig_common::Error::Internal(_)));
}

async fn wait_idle(t: &TestEngine) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while t.engine.queue_depth().await.in_flight > 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("worker slot was never released");
}

#[tokio::test]
async fn test_worker_panic_after_stop_ends_stopped() {
    let mut t = TestEngine::new(1);
    t.platform.add_video("BV1crash0000", "Crash");
    let gate = t.generator.close_gate();
    t.generator.panic_on_call();

    let ids = t
        .engine
        .submit(submission(&["BV1crash0000"], summary_only()))
        .await
        .unwrap()
        .task_ids;
    let id = ids[0];
    t.engine.start().await;

    tokio::time::timeout(Duration::from_secs(5), t.generator.entered.notified())
        .await
        .expect("generation never started");
    assert_eq!(t.engine.request_stop(id).await.unwrap(), StopOutcome::Requested);
    gate.add_permits(1);

    let task = wait_terminal(&t.engine, &ids).await.remove(0);
    assert_eq!(task.status, TaskStatus::Stopped);
    assert!(task.artifacts.is_none());
    wait_idle(&t).await;
    assert!(t.engine.poll_status().await.iter().all(|t| t.is_terminal()));

    let path = status_path(&t.take_events(), id);
    assert_eq!(path.last(), Some(&TaskStatus::Stopped));
    assert!(path.contains(&TaskStatus::Stopping));
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_worker_panic_without_stop_ends_failed() {
    let t = TestEngine::new(1);
    t.platform.add_video("BV1crash0001", "Crash");
    t.generator.panic_on_call();

    let ids = t
        .engine
        .submit(submission(&["BV1crash0001"], summary_only()))
        .await
        .unwrap()
        .task_ids;
    t.engine.start().await;

    let task = wait_terminal(&t.engine, &ids).await.remove(0);
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.message, "Internal error: worker panicked");
    wait_idle(&t).await;
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_stop_during_acquisition_lets_asr_finish() {
    let mut t = TestEngine::new(1);
    t.platform.add_video("BV1asrstop00", "Slow Audio");
    t.platform.set_subtitle("BV1asrstop00", None);
    let gate = t.transcriber.close_gate();

    let ids = t
        .engine
        .submit(submission(&["BV1asrstop00"], ArtifactOptions::all()))
        .await
        .unwrap()
        .task_ids;
    let id = ids[0];
    t.engine.start().await;

    tokio::time::timeout(Duration::from_secs(5), t.transcriber.entered.notified())
        .await
        .expect("ASR never started");
    assert_eq!(t.engine.get(id).await.unwrap().status, TaskStatus::Acquiring);
    assert_eq!(t.engine.request_stop(id).await.unwrap(), StopOutcome::Requested);

    gate.add_permits(1);
    let task = wait_terminal(&t.engine, &ids).await.remove(0);
    assert_eq!(task.status, TaskStatus::Stopped);
    assert_eq!(task.message, "Stopped by user");
    assert_eq!(t.calls.count_prefix("asr:"), 1);
    assert_eq!(t.calls.count_prefix("generate:"), 0);

    assert_eq!(
        status_path(&t.take_events(), id),
        vec![
            TaskStatus::Pending,
            TaskStatus::Acquiring,
            TaskStatus::Stopping,
            TaskStatus::Stopped
        ]
    );
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_stop_cuts_retry_backoff_short() {
    let mut settings = test_settings(1);
    settings.stage_retry_delay = Duration::from_secs(60);
    let mut t = TestEngine::with_settings(settings);
    t.platform.add_video("BV1backoff00", "Backoff");
    t.platform.fail_info("BV1backoff00", vec![FetchError::Server(503)]);

    let ids = t
        .engine
        .submit(submission(&["BV1backoff00"], summary_only()))
        .await
        .unwrap()
        .task_ids;
    let id = ids[0];
    t.engine.start().await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while t.engine.get(id).await.unwrap().retry_count == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("no retry was scheduled");
    assert_eq!(t.engine.request_stop(id).await.unwrap(), StopOutcome::Requested);

    let task = wait_terminal(&t.engine, &ids).await.remove(0);
    assert_eq!(task.status, TaskStatus::Stopped);
    assert_eq!(task.message, "Stopped by user");
    // The backoff ended early: no second attempt was made
    assert_eq!(t.calls.count_prefix("info:"), 1);

    let events = t.take_events();
    assert_eq!(retry_counts(&events, id), vec![1]);
    assert_eq!(
        status_path(&events, id),
        vec![
            TaskStatus::Pending,
            TaskStatus::Acquiring,
            TaskStatus::Stopping,
            TaskStatus::Stopped
        ]
    );
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_cover_is_saved_next_to_transcript() {
    let t = TestEngine::new(1);
    t.platform.add_video("BV1cover0000", "Covered");
    t.platform.add_cover("BV1cover0000", b"png-bytes");

    let ids = t
        .engine
        .submit(submission(&["BV1cover0000"], summary_only()))
        .await
        .unwrap()
        .task_ids;
    t.engine.start().await;
    let task = wait_terminal(&t.engine, &ids).await.remove(0);

    assert_eq!(task.status, TaskStatus::Completed, "message: {}", task.message);
    assert_eq!(task.cover.as_deref(), Some("Covered/Covered_cover.png"));
    let saved = std::fs::read(t.workspace_dir().join("Covered").join("Covered_cover.png")).unwrap();
    assert_eq!(saved, b"png-bytes");
    assert_eq!(t.calls.count_prefix("cover:"), 1);
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_cover_failure_does_not_fail_task() {
    let t = TestEngine::new(1);
    t.platform.add_video("BV1cover0001", "Coverless");
    // Cover URL listed but the image is gone
    t.platform.add_cover("BV1cover0001", b"x");
    t.platform.drop_covers();

    let ids = t
        .engine
        .submit(submission(&["BV1cover0001"], summary_only()))
        .await
        .unwrap()
        .task_ids;
    t.engine.start().await;
    let task = wait_terminal(&t.engine, &ids).await.remove(0);

    assert_eq!(task.status, TaskStatus::Completed, "message: {}", task.message);
    assert!(task.cover.is_none());
    assert_eq!(t.calls.count_prefix("cover:"), 1);
    t.engine.shutdown().await;
}
