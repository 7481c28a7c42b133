use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{StoreError, SubmitError};
use crate::extract::{ExtractRequest, Extraction, Extractor};
use crate::schedule::types::{Artifacts, ErrorKind, Task, TaskChange, TaskId, TaskStatus};
use crate::storage::artifacts::{EvictionReport, StorageManager};
use crate::storage::task::TaskStore;
use crate::utils::{format_file_size, youtube};
use crate::web::Pagination;

// a pending task can be claimed away between lookup and claim; give up after this many races
const MAX_CLAIM_ATTEMPTS: usize = 8;

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// `None` lets an extraction run forever.
    pub extraction_timeout: Option<Duration>,
    /// Bytes reserved in the storage budget before each download.
    pub reservation_bytes: u64,
    /// Added to the timeout before a processing task counts as abandoned.
    pub stale_grace: Duration,
    pub artifact_retention: Option<chrono::Duration>,
}

impl From<&Config> for ManagerSettings {
    fn from(config: &Config) -> Self {
        Self {
            extraction_timeout: config.extraction_timeout,
            reservation_bytes: config.max_audio_bytes,
            stale_grace: Duration::from_secs(5 * 60),
            artifact_retention: config.artifact_retention,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub task_id: TaskId,
    /// False when an active task for the same url was returned instead.
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct TaskPage {
    pub pagination: Pagination,
    pub total: u64,
    pub tasks: Vec<Task>,
}

pub struct TaskManager {
    store: Arc<dyn TaskStore>,
    storage: Arc<StorageManager>,
    extractor: Arc<dyn Extractor>,
    settings: ManagerSettings,
    wake: Notify,
}

impl TaskManager {
    pub fn new(
        store: Arc<dyn TaskStore>,
        storage: Arc<StorageManager>,
        extractor: Arc<dyn Extractor>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            store,
            storage,
            extractor,
            settings,
            wake: Notify::new(),
        }
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    /// Validates the url and returns the task that owns it, creating one when none is active.
    pub async fn submit(&self, url: &str) -> Result<Submission, SubmitError> {
        let url = youtube::normalize_watch_url(url)?;

        if let Some(existing) = self.store.find_active(&url).await? {
            info!("Task {} already covers {}", existing.id, url);
            return Ok(Submission { task_id: existing.id, created: false });
        }

        match self.store.create(&url).await {
            Ok(task) => {
                info!("Creating new task {} for {}", task.id, url);
                self.wake.notify_one();
                Ok(Submission { task_id: task.id, created: true })
            }
            // lost a race with a concurrent submission of the same url
            Err(StoreError::Duplicate(id)) => Ok(Submission { task_id: id, created: false }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task, StoreError> {
        self.store.get(id).await
    }

    pub async fn list_tasks(&self, pagination: Pagination) -> Result<TaskPage, StoreError> {
        let tasks = self.store.list(&pagination).await?;
        let total = self.store.count().await?;
        Ok(TaskPage { pagination, total, tasks })
    }

    pub async fn list_subtitles(&self, pagination: Pagination) -> Result<TaskPage, StoreError> {
        let tasks = self.store.list_subtitled(&pagination).await?;
        let total = self.store.count_subtitled().await?;
        Ok(TaskPage { pagination, total, tasks })
    }

    /// Resolves when a submission arrives or `interval` elapses.
    pub async fn wait_for_work(&self, interval: Duration) {
        let _ = tokio::time::timeout(interval, self.wake.notified()).await;
    }

    /// Claims the oldest pending task for `worker_id`. Losing a claim race is not an error.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<Task>, StoreError> {
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let Some(task) = self.store.next_pending().await? else {
                return Ok(None);
            };

            let change = TaskChange::Claim { worker_id: worker_id.to_string() };
            match self.store.transition(task.id, TaskStatus::Pending, change).await {
                Ok(claimed) => {
                    info!("Worker {} claimed task {}", worker_id, claimed.id);
                    return Ok(Some(claimed));
                }
                Err(StoreError::Conflict { id, actual, .. }) => {
                    debug!("Task {} was taken by another worker ({})", id, actual);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Runs the extraction for a claimed task and records the terminal state.
    pub async fn process_task(&self, task: Task) -> Result<Task, StoreError> {
        match self.storage.reserve(self.settings.reservation_bytes).await {
            Ok(report) => log_eviction("reservation", task.id, &report),
            Err(e) => warn!("Storage reservation for task {} failed: {}", task.id, e),
        }

        let request = ExtractRequest::new(task.id, task.url.clone());
        let extracted = match self.settings.extraction_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.extractor.extract(&request)).await {
                Ok(result) => result.map_err(|e| (e.kind(), e.to_string())),
                Err(_) => Err((
                    ErrorKind::Timeout,
                    format!("extraction did not finish within {}s", limit.as_secs()),
                )),
            },
            None => self.extractor.extract(&request).await.map_err(|e| (e.kind(), e.to_string())),
        };

        match extracted {
            Ok(extraction) => self.complete(task.id, extraction).await,
            Err((kind, message)) => self.fail(task.id, kind, message).await,
        }
    }

    async fn complete(&self, id: TaskId, extraction: Extraction) -> Result<Task, StoreError> {
        let artifacts = match self.record_artifacts(&extraction).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                discard(&extraction).await;
                return self
                    .fail(id, ErrorKind::Internal, format!("could not record artifacts: {}", e))
                    .await;
            }
        };
        let bytes = artifacts.bytes;

        match self.store.transition(id, TaskStatus::Processing, TaskChange::Complete(artifacts)).await {
            Ok(done) => {
                info!("Task {} completed ({})", id, format_file_size(bytes));
                match self.storage.reclaim(id).await {
                    Ok(report) => log_eviction("reclaim", id, &report),
                    Err(e) => warn!("Storage reclaim after task {} failed: {}", id, e),
                }
                Ok(done)
            }
            Err(e) => {
                error!("Could not record completion of task {}: {}", id, e);
                discard(&extraction).await;
                Err(e)
            }
        }
    }

    async fn record_artifacts(&self, extraction: &Extraction) -> std::io::Result<Artifacts> {
        let mut paths = vec![extraction.audio_path.as_path()];
        paths.extend(extraction.subtitle_path.as_deref());
        let bytes = self.storage.measure(&paths).await?;

        Ok(Artifacts {
            title: extraction.title.clone(),
            description: extraction.description.clone(),
            audio_path: file_name(&extraction.audio_path)?,
            subtitle_path: extraction.subtitle_path.as_deref().map(file_name).transpose()?,
            bytes,
        })
    }

    async fn fail(&self, id: TaskId, kind: ErrorKind, message: String) -> Result<Task, StoreError> {
        warn!("Task {} failed ({}): {}", id, kind, message);
        self.store
            .transition(id, TaskStatus::Processing, TaskChange::Fail { kind, message })
            .await
    }

    /// Fails processing tasks that outlived the extraction timeout, e.g. after a crash.
    pub async fn handle_timed_out_tasks(&self) -> Result<usize, StoreError> {
        let Some(timeout) = self.settings.extraction_timeout else {
            return Ok(0);
        };
        let limit = timeout + self.settings.stale_grace;
        let cutoff = Utc::now() - chrono::Duration::from_std(limit).unwrap_or_else(|_| chrono::Duration::days(3650));
        let message = format!("abandoned in processing for over {}s", limit.as_secs());
        self.fail_stale(cutoff, ErrorKind::Timeout, &message).await
    }

    /// Fails tasks a previous run left in processing. Call once at startup, before workers start.
    pub async fn recover_interrupted(&self, started_before: DateTime<Utc>) -> Result<usize, StoreError> {
        self.fail_stale(started_before, ErrorKind::Internal, "interrupted by a restart before finishing")
            .await
    }

    async fn fail_stale(
        &self,
        cutoff: DateTime<Utc>,
        kind: ErrorKind,
        message: &str,
    ) -> Result<usize, StoreError> {
        let mut failed = 0;
        for task in self.store.stale_processing(cutoff).await? {
            let change = TaskChange::Fail { kind, message: message.to_string() };
            match self.store.transition(task.id, TaskStatus::Processing, change).await {
                Ok(_) => {
                    warn!("Task {} failed in processing: {}", task.id, message);
                    failed += 1;
                }
                Err(StoreError::Conflict { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(failed)
    }

    /// Evicts artifacts older than the retention window, if one is configured.
    pub async fn expire_artifacts(&self) -> Result<EvictionReport, StoreError> {
        let Some(retention) = self.settings.artifact_retention else {
            return Ok(EvictionReport::default());
        };
        let report = self.storage.expire(Utc::now() - retention).await?;
        if !report.evicted.is_empty() {
            info!(
                "Expired {} task artifacts older than {} days",
                report.evicted.len(),
                retention.num_days()
            );
        }
        Ok(report)
    }
}

fn file_name(path: &Path) -> std::io::Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(String::from)
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("artifact path {} has no file name", path.display()),
            )
        })
}

async fn discard(extraction: &Extraction) {
    let paths = std::iter::once(extraction.audio_path.as_path()).chain(extraction.subtitle_path.as_deref());
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            debug!("Could not remove {}: {}", path.display(), e);
        }
    }
}

fn log_eviction(reason: &str, id: TaskId, report: &EvictionReport) {
    if !report.evicted.is_empty() {
        info!(
            "Storage {} for task {} evicted tasks {:?}, freeing {}",
            reason,
            id,
            report.evicted,
            format_file_size(report.freed_bytes)
        );
    }
}
