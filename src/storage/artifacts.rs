use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{EvictionError, StoreError};
use crate::schedule::types::{Task, TaskId};
use crate::storage::task::TaskStore;
use crate::utils::format_file_size;

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvictionReport {
    pub evicted: Vec<TaskId>,
    pub freed_bytes: u64,
    pub failures: usize,
    pub usage_after: u64,
}

/// Keeps the artifacts in the download directory within a byte budget.
///
/// Usage is the sum of `artifact_bytes` over live completed tasks, so the store is
/// the single source of truth. Eviction removes the oldest completions first.
pub struct StorageManager {
    store: Arc<dyn TaskStore>,
    root: PathBuf,
    budget: u64,
}

impl StorageManager {
    pub fn new(store: Arc<dyn TaskStore>, root: impl Into<PathBuf>, budget: u64) -> Self {
        Self { store, root: root.into(), budget }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub async fn usage(&self) -> Result<u64, StoreError> {
        self.store.artifact_usage().await
    }

    /// Joins a bare file name onto the download directory. Anything with a path component is refused.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        let valid = !file_name.is_empty()
            && !file_name.starts_with('.')
            && !file_name.contains(&['/', '\\', '\0'][..])
            && Path::new(file_name).file_name().and_then(|n| n.to_str()) == Some(file_name);
        valid.then(|| self.root.join(file_name))
    }

    /// Total size on disk of the given files.
    pub async fn measure(&self, paths: &[&Path]) -> io::Result<u64> {
        let mut total = 0;
        for path in paths {
            total += tokio::fs::metadata(path).await?.len();
        }
        Ok(total)
    }

    /// Frees room for `bytes` more before a download starts.
    pub async fn reserve(&self, bytes: u64) -> Result<EvictionReport, StoreError> {
        self.evict_until(self.budget.saturating_sub(bytes), None).await
    }

    /// Brings usage back under budget after `just_written` completed. That task is never evicted.
    pub async fn reclaim(&self, just_written: TaskId) -> Result<EvictionReport, StoreError> {
        self.evict_until(self.budget, Some(just_written)).await
    }

    /// Evicts every task completed before `before`.
    pub async fn expire(&self, before: DateTime<Utc>) -> Result<EvictionReport, StoreError> {
        let mut report = EvictionReport::default();
        for task in self.store.evictable().await? {
            if task.completed_at.map_or(true, |at| at >= before) {
                // evictable() is ordered by completion time
                break;
            }
            self.evict_into(&task, &mut report).await;
        }
        report.usage_after = self.usage().await?;
        Ok(report)
    }

    async fn evict_until(&self, target: u64, keep: Option<TaskId>) -> Result<EvictionReport, StoreError> {
        let mut usage = self.usage().await?;
        let mut report = EvictionReport::default();

        if usage > target {
            for task in self.store.evictable().await? {
                if usage <= target {
                    break;
                }
                if Some(task.id) == keep {
                    continue;
                }
                if self.evict_into(&task, &mut report).await {
                    usage = usage.saturating_sub(task.artifact_bytes);
                }
            }
            if usage > target {
                warn!(
                    "Storage usage {} still above target {} after eviction",
                    format_file_size(usage),
                    format_file_size(target)
                );
            }
        }

        report.usage_after = usage;
        Ok(report)
    }

    async fn evict_into(&self, task: &Task, report: &mut EvictionReport) -> bool {
        match self.evict(task).await {
            Ok(freed) => {
                report.evicted.push(task.id);
                report.freed_bytes += freed;
                true
            }
            Err(e) => {
                warn!("Failed to evict artifacts of task {}: {}", task.id, e);
                report.failures += 1;
                false
            }
        }
    }

    /// Deletes a task's artifact files, then marks the task evicted. Missing files are not an error.
    pub async fn evict(&self, task: &Task) -> Result<u64, EvictionError> {
        let mut freed = 0;
        let names = [task.audio_path.as_deref(), task.subtitle_path.as_deref()];
        for name in names.into_iter().flatten() {
            let Some(path) = self.resolve(name) else {
                warn!("Task {} references unsafe artifact path {:?}", task.id, name);
                continue;
            };
            let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => freed += size,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("Artifact {} already gone", path.display());
                }
                Err(source) => return Err(EvictionError::Remove { path, source }),
            }
        }

        if self.store.mark_evicted(task.id).await? {
            info!("Evicted artifacts of task {} ({})", task.id, format_file_size(freed));
        }
        Ok(freed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::types::TaskStatus;
    use crate::storage::task::SqliteTaskStore;
    use crate::test_helpers::{seed_completed, MB};
    use chrono::Duration;
    use tempfile::TempDir;

    async fn setup(budget: u64) -> (StorageManager, Arc<dyn TaskStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn TaskStore> =
            Arc::new(SqliteTaskStore::new(dir.path().join("tasks.db")).await.unwrap());
        let manager = StorageManager::new(store.clone(), dir.path(), budget);
        (manager, store, dir)
    }

    fn url(n: u32) -> String {
        format!("https://www.youtube.com/watch?v=video{}", n)
    }

    #[tokio::test]
    async fn test_reclaim_evicts_oldest_until_under_budget() {
        let (manager, store, dir) = setup(100 * MB).await;
        let oldest = seed_completed(&store, dir.path(), &url(1), 50 * MB).await;
        let older = seed_completed(&store, dir.path(), &url(2), 45 * MB).await;
        let newest = seed_completed(&store, dir.path(), &url(3), 20 * MB).await;
        assert_eq!(manager.usage().await.unwrap(), 115 * MB);

        let report = manager.reclaim(newest.id).await.unwrap();
        assert_eq!(report.evicted, vec![oldest.id]);
        assert_eq!(report.freed_bytes, 50 * MB);
        assert_eq!(report.usage_after, 65 * MB);

        assert!(!dir.path().join(oldest.audio_path.unwrap()).exists());
        assert!(dir.path().join(older.audio_path.unwrap()).exists());
        assert!(dir.path().join(newest.audio_path.as_deref().unwrap()).exists());

        let evicted = store.get(oldest.id).await.unwrap();
        assert_eq!(evicted.status, TaskStatus::Completed);
        assert!(evicted.evicted_at.is_some());
    }

    #[tokio::test]
    async fn test_reclaim_never_evicts_just_written() {
        let (manager, store, dir) = setup(10 * MB).await;
        let only = seed_completed(&store, dir.path(), &url(1), 20 * MB).await;

        let report = manager.reclaim(only.id).await.unwrap();
        assert!(report.evicted.is_empty());
        assert_eq!(report.usage_after, 20 * MB);
        assert!(store.get(only.id).await.unwrap().evicted_at.is_none());
    }

    #[tokio::test]
    async fn test_reserve_makes_room_ahead_of_download() {
        let (manager, store, dir) = setup(100 * MB).await;
        let first = seed_completed(&store, dir.path(), &url(1), 50 * MB).await;
        seed_completed(&store, dir.path(), &url(2), 45 * MB).await;

        let report = manager.reserve(20 * MB).await.unwrap();
        assert_eq!(report.evicted, vec![first.id]);
        assert_eq!(report.usage_after, 45 * MB);

        let report = manager.reserve(20 * MB).await.unwrap();
        assert!(report.evicted.is_empty());
    }

    #[tokio::test]
    async fn test_missing_files_still_mark_evicted() {
        let (manager, store, dir) = setup(MB).await;
        let task = seed_completed(&store, dir.path(), &url(1), 2 * MB).await;
        std::fs::remove_file(dir.path().join(task.audio_path.as_deref().unwrap())).unwrap();

        let report = manager.reserve(0).await.unwrap();
        assert_eq!(report.evicted, vec![task.id]);
        assert_eq!(report.freed_bytes, 0);
        assert_eq!(manager.usage().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expire_only_touches_old_completions() {
        let (manager, store, dir) = setup(u64::MAX).await;
        let task = seed_completed(&store, dir.path(), &url(1), MB).await;

        let report = manager.expire(Utc::now() - Duration::days(1)).await.unwrap();
        assert!(report.evicted.is_empty());

        let report = manager.expire(Utc::now() + Duration::seconds(1)).await.unwrap();
        assert_eq!(report.evicted, vec![task.id]);
        assert_eq!(report.usage_after, 0);
    }

    #[tokio::test]
    async fn test_resolve_rejects_paths() {
        let (manager, _store, dir) = setup(MB).await;
        assert_eq!(manager.resolve("1_20240101.mp3"), Some(dir.path().join("1_20240101.mp3")));
        for name in ["", "..", ".staging-x", "../tasks.db", "a/b.mp3", "a\\b.mp3", "/etc/passwd"] {
            assert_eq!(manager.resolve(name), None, "{}", name);
        }
    }

    #[tokio::test]
    async fn test_measure() {
        let (manager, _store, dir) = setup(MB).await;
        let a = dir.path().join("a.mp3");
        let b = dir.path().join("b.txt");
        crate::test_helpers::sparse_file(&a, 3000);
        std::fs::write(&b, "hello").unwrap();
        assert_eq!(manager.measure(&[a.as_path(), b.as_path()]).await.unwrap(), 3005);
    }
}
