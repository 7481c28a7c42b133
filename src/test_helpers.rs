//! Fixtures shared by the worker, storage and HTTP tests.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::error::ExtractError;
use crate::extract::{ExtractRequest, Extraction, Extractor};
use crate::schedule::scheduler::ManagerSettings;
use crate::schedule::types::{Artifacts, ErrorKind, Task, TaskChange, TaskStatus};
use crate::schedule::TaskManager;
use crate::storage::artifacts::StorageManager;
use crate::storage::task::{SqliteTaskStore, TaskStore};

pub const MB: u64 = 1024 * 1024;

/// What the fake extractor does for a url.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed { audio_bytes: u64, subtitles: bool },
    Fail(ErrorKind),
    Hang,
}

pub struct FakeExtractor {
    dir: PathBuf,
    default: Behavior,
    per_url: Mutex<HashMap<String, Behavior>>,
    calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn new(dir: impl Into<PathBuf>, default: Behavior) -> Self {
        Self {
            dir: dir.into(),
            default,
            per_url: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn on(&self, url: &str, behavior: Behavior) {
        self.per_url.lock().unwrap().insert(url.to_string(), behavior);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(&self, request: &ExtractRequest) -> Result<Extraction, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .per_url
            .lock()
            .unwrap()
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        match behavior {
            Behavior::Succeed { audio_bytes, subtitles } => {
                let stem = request.file_stem();
                let audio_path = self.dir.join(format!("{}.mp3", stem));
                sparse_file(&audio_path, audio_bytes);
                let subtitle_path = if subtitles {
                    let path = self.dir.join(format!("{}.txt", stem));
                    std::fs::write(&path, "[00:00:00.000] - [00:00:01.000] hello\n").unwrap();
                    Some(path)
                } else {
                    None
                };
                Ok(Extraction {
                    title: format!("Video {}", request.task_id),
                    description: Some("fake".to_string()),
                    audio_path,
                    subtitle_path,
                })
            }
            Behavior::Fail(kind) => Err(match kind {
                ErrorKind::Network => ExtractError::Network("Connection reset by peer".into()),
                ErrorKind::Unavailable => ExtractError::Unavailable("Video unavailable".into()),
                ErrorKind::SizeLimitExceeded => ExtractError::SizeLimitExceeded("too large".into()),
                ErrorKind::NoAudioStream => ExtractError::NoAudioStream("no audio".into()),
                ErrorKind::Timeout | ErrorKind::Internal => ExtractError::Tool("boom".into()),
            }),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

/// Creates a file of `bytes` length without writing its contents.
pub fn sparse_file(path: &Path, bytes: u64) {
    let file = File::create(path).unwrap();
    file.set_len(bytes).unwrap();
}

pub fn test_settings() -> ManagerSettings {
    ManagerSettings {
        extraction_timeout: Some(Duration::from_secs(5)),
        reservation_bytes: 0,
        stale_grace: Duration::from_secs(60),
        artifact_retention: None,
    }
}

pub struct TestEnv {
    pub dir: TempDir,
    pub store: Arc<dyn TaskStore>,
    pub storage: Arc<StorageManager>,
    pub extractor: Arc<FakeExtractor>,
    pub manager: Arc<TaskManager>,
}

impl TestEnv {
    pub async fn new(default: Behavior) -> Self {
        Self::with(default, 1024 * 1024 * MB, test_settings()).await
    }

    pub async fn with(default: Behavior, budget: u64, settings: ManagerSettings) -> Self {
        let dir = TempDir::new().unwrap();
        let download_dir = dir.path().join("download");
        std::fs::create_dir_all(&download_dir).unwrap();

        let store: Arc<dyn TaskStore> =
            Arc::new(SqliteTaskStore::new(dir.path().join("tasks.db")).await.unwrap());
        let storage = Arc::new(StorageManager::new(store.clone(), download_dir.clone(), budget));
        let extractor = Arc::new(FakeExtractor::new(download_dir, default));
        let manager = Arc::new(TaskManager::new(
            store.clone(),
            storage.clone(),
            extractor.clone(),
            settings,
        ));

        Self { dir, store, storage, extractor, manager }
    }

    pub fn download_dir(&self) -> PathBuf {
        self.dir.path().join("download")
    }

    /// Inserts a completed task whose audio file of `bytes` length exists on disk.
    pub async fn completed_task(&self, url: &str, bytes: u64) -> Task {
        seed_completed(&self.store, &self.download_dir(), url, bytes).await
    }
}

pub async fn seed_completed(store: &Arc<dyn TaskStore>, dir: &Path, url: &str, bytes: u64) -> Task {
    let task = store.create(url).await.unwrap();
    store
        .transition(task.id, TaskStatus::Pending, TaskChange::Claim { worker_id: "seed".into() })
        .await
        .unwrap();

    let audio_path = format!("{}_seed.mp3", task.id);
    sparse_file(&dir.join(&audio_path), bytes);
    store
        .transition(
            task.id,
            TaskStatus::Processing,
            TaskChange::Complete(Artifacts {
                title: format!("seeded {}", task.id),
                description: None,
                audio_path,
                subtitle_path: None,
                bytes,
            }),
        )
        .await
        .unwrap()
}

/// Polls until the task leaves the active states or the deadline passes.
pub async fn wait_for_terminal(store: &Arc<dyn TaskStore>, id: i64) -> Task {
    for _ in 0..200 {
        let task = store.get(id).await.unwrap();
        if task.status.is_terminal() {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("task {} did not finish", id);
}
