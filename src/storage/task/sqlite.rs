use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use super::TaskStore;
use crate::error::StoreError;
use crate::schedule::types::{Task, TaskChange, TaskId, TaskStatus};
use crate::storage::task::entity::Model as TaskModel;
use crate::web::Pagination;

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        claimed_by TEXT,
        title TEXT,
        description TEXT,
        audio_path TEXT,
        subtitle_path TEXT,
        artifact_bytes INTEGER NOT NULL DEFAULT 0,
        evicted_at TEXT,
        error_message TEXT,
        error_kind TEXT
    )
    "#,
    // at most one active task per url
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_active_url
        ON tasks(url) WHERE status IN ('pending', 'processing')
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_tasks_status_created
        ON tasks(status, created_at, id)
    "#,
];

pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!("Initializing SQLite task storage at {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self { pool })
    }

    async fn fetch_all(
        &self,
        sql: &str,
        pagination: Option<&Pagination>,
    ) -> Result<Vec<Task>, StoreError> {
        let mut query = sqlx::query_as::<_, TaskModel>(sql);
        if let Some(page) = pagination {
            query = query.bind(page.limit() as i64).bind(page.offset() as i64);
        }
        query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Task::try_from)
            .collect()
    }

    async fn insert_pending(&self, url: &str) -> Result<TaskModel, sqlx::Error> {
        sqlx::query_as::<_, TaskModel>(
            "INSERT INTO tasks (url, status, created_at) VALUES (?, ?, ?) RETURNING *",
        )
        .bind(url)
        .bind(TaskStatus::Pending.as_str())
        .bind(timestamp(Utc::now()))
        .fetch_one(&self.pool)
        .await
    }
}

/// Fixed-width RFC 3339 so that text ordering in SQL matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_i64(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, url: &str) -> Result<Task, StoreError> {
        // one retry: the active task can finish between a rejected insert and the lookup
        let mut retried = false;
        loop {
            match self.insert_pending(url).await {
                Ok(model) => return Task::try_from(model),
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    match self.find_active(url).await? {
                        Some(existing) => return Err(StoreError::Duplicate(existing.id)),
                        None if !retried => {
                            debug!("Active task for {} finished during insert, retrying", url);
                            retried = true;
                        }
                        None => return Err(StoreError::Database(sqlx::Error::Database(db))),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        sqlx::query_as::<_, TaskModel>("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))
            .and_then(Task::try_from)
    }

    async fn list(&self, pagination: &Pagination) -> Result<Vec<Task>, StoreError> {
        self.fetch_all(
            "SELECT * FROM tasks ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            Some(pagination),
        )
        .await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn transition(
        &self,
        id: TaskId,
        expected: TaskStatus,
        change: TaskChange,
    ) -> Result<Task, StoreError> {
        let target = change.target();
        if !expected.can_transition_to(target) {
            return Err(StoreError::InvalidTransition { from: expected, to: target });
        }

        let now = timestamp(Utc::now());
        let updated = match &change {
            TaskChange::Claim { worker_id } => {
                sqlx::query_as::<_, TaskModel>(
                    r#"
                    UPDATE tasks SET status = ?, started_at = ?, claimed_by = ?
                    WHERE id = ? AND status = ?
                    RETURNING *
                    "#,
                )
                .bind(target.as_str())
                .bind(&now)
                .bind(worker_id)
                .bind(id)
                .bind(expected.as_str())
                .fetch_optional(&self.pool)
                .await?
            }
            TaskChange::Complete(artifacts) => {
                sqlx::query_as::<_, TaskModel>(
                    r#"
                    UPDATE tasks SET status = ?, completed_at = ?, title = ?, description = ?,
                        audio_path = ?, subtitle_path = ?, artifact_bytes = ?,
                        error_message = NULL, error_kind = NULL
                    WHERE id = ? AND status = ?
                    RETURNING *
                    "#,
                )
                .bind(target.as_str())
                .bind(&now)
                .bind(&artifacts.title)
                .bind(&artifacts.description)
                .bind(&artifacts.audio_path)
                .bind(&artifacts.subtitle_path)
                .bind(to_i64(artifacts.bytes))
                .bind(id)
                .bind(expected.as_str())
                .fetch_optional(&self.pool)
                .await?
            }
            TaskChange::Fail { kind, message } => {
                sqlx::query_as::<_, TaskModel>(
                    r#"
                    UPDATE tasks SET status = ?, completed_at = ?, error_message = ?, error_kind = ?,
                        audio_path = NULL, subtitle_path = NULL, artifact_bytes = 0
                    WHERE id = ? AND status = ?
                    RETURNING *
                    "#,
                )
                .bind(target.as_str())
                .bind(&now)
                .bind(message)
                .bind(kind.as_str())
                .bind(id)
                .bind(expected.as_str())
                .fetch_optional(&self.pool)
                .await?
            }
        };

        match updated {
            Some(model) => {
                debug!("Task {} moved {} -> {}", id, expected, target);
                Task::try_from(model)
            }
            None => {
                let current = self.get(id).await?;
                Err(StoreError::Conflict {
                    id,
                    expected,
                    actual: current.status,
                })
            }
        }
    }

    async fn next_pending(&self) -> Result<Option<Task>, StoreError> {
        sqlx::query_as::<_, TaskModel>(
            "SELECT * FROM tasks WHERE status = ? ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .bind(TaskStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(Task::try_from)
        .transpose()
    }

    async fn find_active(&self, url: &str) -> Result<Option<Task>, StoreError> {
        sqlx::query_as::<_, TaskModel>(
            "SELECT * FROM tasks WHERE url = ? AND status IN ('pending', 'processing') LIMIT 1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?
        .map(Task::try_from)
        .transpose()
    }

    async fn stale_processing(&self, before: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        sqlx::query_as::<_, TaskModel>(
            "SELECT * FROM tasks WHERE status = 'processing' AND started_at < ? ORDER BY id",
        )
        .bind(timestamp(before))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Task::try_from)
        .collect()
    }

    async fn evictable(&self) -> Result<Vec<Task>, StoreError> {
        self.fetch_all(
            r#"
            SELECT * FROM tasks
            WHERE status = 'completed' AND evicted_at IS NULL
            ORDER BY completed_at ASC, id ASC
            "#,
            None,
        )
        .await
    }

    async fn artifact_usage(&self) -> Result<u64, StoreError> {
        let used: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(artifact_bytes), 0) FROM tasks
            WHERE status = 'completed' AND evicted_at IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(used.max(0) as u64)
    }

    async fn mark_evicted(&self, id: TaskId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET evicted_at = ?
            WHERE id = ? AND status = 'completed' AND evicted_at IS NULL
            "#,
        )
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_subtitled(&self, pagination: &Pagination) -> Result<Vec<Task>, StoreError> {
        self.fetch_all(
            r#"
            SELECT * FROM tasks
            WHERE status = 'completed' AND evicted_at IS NULL AND subtitle_path IS NOT NULL
            ORDER BY completed_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
            Some(pagination),
        )
        .await
    }

    async fn count_subtitled(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM tasks
            WHERE status = 'completed' AND evicted_at IS NULL AND subtitle_path IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }
}
