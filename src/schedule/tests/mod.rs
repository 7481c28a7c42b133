use super::*;
use crate::error::SubmitError;
use crate::test_helpers::{test_settings, wait_for_terminal, Behavior, TestEnv, MB};
use std::time::Duration;

const VIDEO: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

fn success(audio_bytes: u64, subtitles: bool) -> Behavior {
    Behavior::Succeed { audio_bytes, subtitles }
}

#[tokio::test]
async fn test_complete_task_lifecycle() {
    // 1. set up an isolated manager and scheduler
    let env = TestEnv::new(success(MB, false)).await;
    let scheduler = TaskScheduler::new(env.manager.clone()).with_poll_interval(Duration::from_millis(50));

    // 2. submit before any worker runs
    let submission = env.manager.submit(VIDEO).await.unwrap();
    assert_eq!(submission, Submission { task_id: 1, created: true });
    assert_eq!(env.manager.get_task(1).await.unwrap().status, TaskStatus::Pending);

    // 3. start the worker and wait for the outcome
    scheduler.start(1).await;
    let task = wait_for_terminal(&env.store, submission.task_id).await;

    // 4. verify the recorded artifacts
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.title.as_deref(), Some("Video 1"));
    assert!(task.claimed_by.is_some());
    assert_eq!(task.artifact_bytes, MB);
    assert!(task.subtitle_path.is_none());
    let audio = task.live_audio().unwrap();
    assert!(audio.starts_with("1_") && audio.ends_with(".mp3"));
    assert!(env.download_dir().join(audio).exists());

    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_extraction_records_error() {
    let env = TestEnv::new(Behavior::Fail(ErrorKind::Network)).await;
    let submission = env.manager.submit(VIDEO).await.unwrap();

    let claimed = env.manager.claim_next("worker-a").await.unwrap().unwrap();
    let task = env.manager.process_task(claimed).await.unwrap();

    assert_eq!(task.id, submission.task_id);
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_kind, Some(ErrorKind::Network));
    assert!(!task.error_message.unwrap_or_default().is_empty());
    assert!(task.audio_path.is_none() && task.subtitle_path.is_none());
    assert!(task.completed_at.is_some());
}

#[tokio::test]
async fn test_subtitles_recorded_with_sizes() {
    let env = TestEnv::new(success(2 * MB, true)).await;
    env.manager.submit(VIDEO).await.unwrap();

    let claimed = env.manager.claim_next("worker-a").await.unwrap().unwrap();
    let task = env.manager.process_task(claimed).await.unwrap();

    let subtitle = task.live_subtitle().unwrap();
    assert!(subtitle.ends_with(".txt"));
    let subtitle_len = std::fs::metadata(env.download_dir().join(subtitle)).unwrap().len();
    assert_eq!(task.artifact_bytes, 2 * MB + subtitle_len);
}

#[tokio::test]
async fn test_invalid_url_creates_nothing() {
    let env = TestEnv::new(success(MB, false)).await;

    let result = env.manager.submit("http://example.com").await;
    assert!(matches!(result, Err(SubmitError::InvalidUrl(_))));
    assert_eq!(env.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_dedupe_active_then_allow_after_terminal() {
    let env = TestEnv::new(Behavior::Fail(ErrorKind::Unavailable)).await;

    let first = env.manager.submit(VIDEO).await.unwrap();
    let again = env.manager.submit("https://youtu.be/dQw4w9WgXcQ").await.unwrap();
    assert_eq!(again, Submission { task_id: first.task_id, created: false });

    let claimed = env.manager.claim_next("worker-a").await.unwrap().unwrap();
    let dup_while_processing = env.manager.submit(VIDEO).await.unwrap();
    assert!(!dup_while_processing.created);

    env.manager.process_task(claimed).await.unwrap();
    let retry = env.manager.submit(VIDEO).await.unwrap();
    assert!(retry.created);
    assert!(retry.task_id > first.task_id);
}

#[tokio::test]
async fn test_claim_next_takes_oldest_once() {
    let env = TestEnv::new(success(MB, false)).await;
    let a = env.manager.submit(VIDEO).await.unwrap();
    let b = env.manager.submit("https://www.youtube.com/watch?v=other_video").await.unwrap();

    let first = env.manager.claim_next("worker-a").await.unwrap().unwrap();
    let second = env.manager.claim_next("worker-b").await.unwrap().unwrap();
    assert_eq!((first.id, second.id), (a.task_id, b.task_id));
    assert_eq!(second.claimed_by.as_deref(), Some("worker-b"));
    assert!(env.manager.claim_next("worker-c").await.unwrap().is_none());
}

#[tokio::test]
async fn test_extraction_timeout_fails_task() {
    let mut settings = test_settings();
    settings.extraction_timeout = Some(Duration::from_millis(100));
    let env = TestEnv::with(Behavior::Hang, 1024 * MB, settings).await;
    env.manager.submit(VIDEO).await.unwrap();

    let claimed = env.manager.claim_next("worker-a").await.unwrap().unwrap();
    let task = env.manager.process_task(claimed).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_kind, Some(ErrorKind::Timeout));
}

#[tokio::test]
async fn test_stale_processing_swept() {
    let mut settings = test_settings();
    settings.extraction_timeout = Some(Duration::from_millis(10));
    settings.stale_grace = Duration::from_millis(10);
    let env = TestEnv::with(success(MB, false), 1024 * MB, settings).await;
    env.manager.submit(VIDEO).await.unwrap();

    // claimed by a worker that never finishes
    let claimed = env.manager.claim_next("crashed-worker").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(env.manager.handle_timed_out_tasks().await.unwrap(), 1);
    let task = env.manager.get_task(claimed.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_kind, Some(ErrorKind::Timeout));

    // the late result is discarded instead of overwriting the terminal state
    assert!(env.manager.process_task(claimed).await.is_err());
    assert_eq!(env.manager.get_task(task.id).await.unwrap().status, TaskStatus::Failed);
    assert_eq!(std::fs::read_dir(env.download_dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_sweep_disabled_without_timeout() {
    let mut settings = test_settings();
    settings.extraction_timeout = None;
    let env = TestEnv::with(success(MB, false), 1024 * MB, settings).await;
    env.manager.submit(VIDEO).await.unwrap();
    env.manager.claim_next("worker-a").await.unwrap();

    assert_eq!(env.manager.handle_timed_out_tasks().await.unwrap(), 0);
}

#[tokio::test]
async fn test_restart_fails_interrupted_tasks_without_timeout() {
    let mut settings = test_settings();
    settings.extraction_timeout = None;
    let env = TestEnv::with(success(MB, false), 1024 * MB, settings).await;
    env.manager.submit(VIDEO).await.unwrap();
    let interrupted = env.manager.claim_next("previous-run").await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let boot = chrono::Utc::now();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let other = "https://www.youtube.com/watch?v=abcdefghijk";
    env.manager.submit(other).await.unwrap();
    let current = env.manager.claim_next("this-run").await.unwrap().unwrap();

    assert_eq!(env.manager.recover_interrupted(boot).await.unwrap(), 1);
    let task = env.manager.get_task(interrupted.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_kind, Some(ErrorKind::Internal));
    assert_eq!(env.manager.get_task(current.id).await.unwrap().status, TaskStatus::Processing);

    // the url is no longer held by a dead task
    let retry = env.manager.submit(VIDEO).await.unwrap();
    assert!(retry.created);
    assert_ne!(retry.task_id, interrupted.id);
}

#[tokio::test]
async fn test_completion_evicts_oldest_but_not_new_task() {
    // budget 100MB, 95MB already stored, new artifact 20MB
    let env = TestEnv::with(success(20 * MB, false), 100 * MB, test_settings()).await;
    let oldest = env.completed_task("https://www.youtube.com/watch?v=old_one", 50 * MB).await;
    let newer = env.completed_task("https://www.youtube.com/watch?v=old_two", 45 * MB).await;

    env.manager.submit(VIDEO).await.unwrap();
    let claimed = env.manager.claim_next("worker-a").await.unwrap().unwrap();
    let task = env.manager.process_task(claimed).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert!(env.store.get(oldest.id).await.unwrap().evicted_at.is_some());
    assert!(env.store.get(newer.id).await.unwrap().evicted_at.is_none());
    assert!(env.store.get(task.id).await.unwrap().live_audio().is_some());
    assert!(env.storage.usage().await.unwrap() <= 100 * MB);
}

#[tokio::test]
async fn test_reservation_happens_before_download() {
    let mut settings = test_settings();
    settings.reservation_bytes = 20 * MB;
    let env = TestEnv::with(Behavior::Fail(ErrorKind::Network), 100 * MB, settings).await;
    let oldest = env.completed_task("https://www.youtube.com/watch?v=old_one", 50 * MB).await;
    env.completed_task("https://www.youtube.com/watch?v=old_two", 45 * MB).await;

    env.manager.submit(VIDEO).await.unwrap();
    let claimed = env.manager.claim_next("worker-a").await.unwrap().unwrap();
    env.manager.process_task(claimed).await.unwrap();

    // space was made even though the download then failed
    assert!(env.store.get(oldest.id).await.unwrap().evicted_at.is_some());
    assert_eq!(env.storage.usage().await.unwrap(), 45 * MB);
}

#[tokio::test]
async fn test_retention_expiry() {
    let mut settings = test_settings();
    settings.artifact_retention = Some(chrono::Duration::milliseconds(1));
    let env = TestEnv::with(success(MB, false), 1024 * MB, settings).await;
    let task = env.completed_task(VIDEO, MB).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let report = env.manager.expire_artifacts().await.unwrap();
    assert_eq!(report.evicted, vec![task.id]);

    let without = TestEnv::new(success(MB, false)).await;
    without.completed_task(VIDEO, MB).await;
    assert!(without.manager.expire_artifacts().await.unwrap().evicted.is_empty());
}

#[tokio::test]
async fn test_submission_wakes_idle_worker() {
    let env = TestEnv::new(success(MB, false)).await;
    // long poll interval: only the wake signal can get the task picked up in time
    let scheduler = TaskScheduler::new(env.manager.clone()).with_poll_interval(Duration::from_secs(3600));
    scheduler.start(1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let submission = env.manager.submit(VIDEO).await.unwrap();
    let task = wait_for_terminal(&env.store, submission.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(env.extractor.calls(), 1);

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multiple_workers_process_each_task_once() {
    let env = TestEnv::new(success(MB, false)).await;
    let mut ids = Vec::new();
    for i in 0..6 {
        let url = format!("https://www.youtube.com/watch?v=video_{}", i);
        ids.push(env.manager.submit(&url).await.unwrap().task_id);
    }

    let scheduler = TaskScheduler::new(env.manager.clone()).with_poll_interval(Duration::from_millis(20));
    scheduler.start(3).await;
    for id in &ids {
        assert_eq!(wait_for_terminal(&env.store, *id).await.status, TaskStatus::Completed);
    }
    scheduler.stop().await.unwrap();

    assert_eq!(env.extractor.calls(), ids.len());
}

#[tokio::test]
async fn test_stop_returns_for_idle_scheduler() {
    let env = TestEnv::new(success(MB, false)).await;
    let scheduler = TaskScheduler::new(env.manager.clone())
        .with_poll_interval(Duration::from_secs(3600))
        .with_maintenance_interval(Duration::from_secs(3600));
    scheduler.start(2).await;

    tokio::time::timeout(Duration::from_secs(5), scheduler.stop())
        .await
        .expect("scheduler did not stop")
        .unwrap();
}
