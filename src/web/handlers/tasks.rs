use axum::{
    extract::{
        rejection::{FormRejection, JsonRejection},
        Form, Json, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::schedule::types::{ErrorKind, Task, TaskId, TaskStatus};
use crate::schedule::TaskPage;
use crate::web::error::ApiError;
use crate::web::pagination::PageQuery;
use crate::AppContext;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn task_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/tasks/add", post(add_task))
        .route("/submit", post(submit_form))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/:task_id", get(get_task))
        .route("/api/subtitles", get(list_subtitles))
        .with_state(ctx)
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    youtube_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing: Option<bool>,
}

/// Public view of a task. Artifact URLs are present only while the files exist.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskView {
    pub id: TaskId,
    pub status: TaskStatus,
    pub youtube_url: String,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub audio_url: Option<String>,
    pub subtitle_url: Option<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        let download_url = |name: &str| format!("/download/{}", name);
        Self {
            id: task.id,
            status: task.status,
            youtube_url: task.url.clone(),
            created_at: task.created_at.format(TIMESTAMP_FORMAT).to_string(),
            completed_at: task.completed_at.map(|at| at.format(TIMESTAMP_FORMAT).to_string()),
            title: task.title.clone(),
            description: task.description.clone(),
            audio_url: task.live_audio().map(download_url),
            subtitle_url: task.live_subtitle().map(download_url),
            error_message: task.error_message.clone(),
            error_kind: task.error_kind,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub tasks: Vec<TaskView>,
}

impl From<TaskPage> for TaskListResponse {
    fn from(page: TaskPage) -> Self {
        Self {
            page: page.pagination.page,
            per_page: page.pagination.per_page,
            total: page.total,
            tasks: page.tasks.iter().map(TaskView::from).collect(),
        }
    }
}

async fn submit(ctx: &AppContext, url: &str) -> Result<Response, ApiError> {
    if ctx.submit_limiter.check().is_err() {
        warn!("Submission rate limit hit");
        return Err(ApiError::RateLimited);
    }

    let submission = ctx.task_manager.submit(url).await?;
    let response = if submission.created {
        (
            StatusCode::CREATED,
            Json(SubmitResponse { task_id: submission.task_id, existing: None }),
        )
    } else {
        (
            StatusCode::OK,
            Json(SubmitResponse { task_id: submission.task_id, existing: Some(true) }),
        )
    };
    Ok(response.into_response())
}

// POST /api/tasks/add
async fn add_task(
    State(ctx): State<Arc<AppContext>>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    submit(&ctx, &req.youtube_url).await
}

// POST /submit, the web form
async fn submit_form(
    State(ctx): State<Arc<AppContext>>,
    payload: Result<Form<SubmitRequest>, FormRejection>,
) -> Result<Response, ApiError> {
    let Form(req) = payload?;
    submit(&ctx, &req.youtube_url).await
}

async fn get_task(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<TaskView>, ApiError> {
    let task = ctx.task_manager.get_task(task_id).await?;
    Ok(Json(TaskView::from(&task)))
}

async fn list_tasks(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let page = ctx.task_manager.list_tasks(query.resolve(ctx.page_size)).await?;
    Ok(Json(page.into()))
}

async fn list_subtitles(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let page = ctx.task_manager.list_subtitles(query.resolve(ctx.page_size)).await?;
    Ok(Json(page.into()))
}
