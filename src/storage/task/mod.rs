use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::schedule::types::{Task, TaskChange, TaskId, TaskStatus};
use crate::web::Pagination;

pub mod entity;
pub mod mapping;
pub mod sqlite;

pub use sqlite::SqliteTaskStore;

/// Durable task records. Every status change goes through [`TaskStore::transition`].
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Inserts a pending task. Fails with `Duplicate` while another task for the url is active.
    async fn create(&self, url: &str) -> Result<Task, StoreError>;
    async fn get(&self, id: TaskId) -> Result<Task, StoreError>;
    /// Most recent first.
    async fn list(&self, pagination: &Pagination) -> Result<Vec<Task>, StoreError>;
    async fn count(&self) -> Result<u64, StoreError>;
    /// Applies `change` only if the stored status is still `expected`.
    async fn transition(
        &self,
        id: TaskId,
        expected: TaskStatus,
        change: TaskChange,
    ) -> Result<Task, StoreError>;
    /// Oldest pending task, by creation time then id.
    async fn next_pending(&self) -> Result<Option<Task>, StoreError>;
    async fn find_active(&self, url: &str) -> Result<Option<Task>, StoreError>;
    async fn stale_processing(&self, before: DateTime<Utc>) -> Result<Vec<Task>, StoreError>;
    /// Completed tasks whose artifacts are still on disk, oldest completion first.
    async fn evictable(&self) -> Result<Vec<Task>, StoreError>;
    /// Recorded bytes of every live artifact.
    async fn artifact_usage(&self) -> Result<u64, StoreError>;
    /// Returns false if the task was not a live completed task.
    async fn mark_evicted(&self, id: TaskId) -> Result<bool, StoreError>;
    async fn list_subtitled(&self, pagination: &Pagination) -> Result<Vec<Task>, StoreError>;
    async fn count_subtitled(&self) -> Result<u64, StoreError>;
}
