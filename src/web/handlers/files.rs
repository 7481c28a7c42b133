use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::io;
use std::sync::Arc;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::web::error::ApiError;
use crate::AppContext;

pub fn file_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/download/:file_name", get(download))
        .with_state(ctx)
}

fn content_type(file_name: &str) -> &'static str {
    match file_name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("mp3") => "audio/mpeg",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

// Serves an artifact from the download directory as an attachment
async fn download(
    State(ctx): State<Arc<AppContext>>,
    Path(file_name): Path<String>,
) -> Result<Response, ApiError> {
    let not_found = || ApiError::NotFound(format!("file {} not found", file_name));

    let path = ctx.task_manager.storage().resolve(&file_name).ok_or_else(not_found)?;
    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(ApiError::Internal(format!("open {}: {}", path.display(), e))),
    };
    let length = file
        .metadata()
        .await
        .map_err(|e| ApiError::Internal(format!("stat {}: {}", path.display(), e)))?
        .len();
    debug!("Serving {} ({} bytes)", path.display(), length);

    let headers = [
        (header::CONTENT_TYPE, content_type(&file_name).to_string()),
        (header::CONTENT_LENGTH, length.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name),
        ),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}
