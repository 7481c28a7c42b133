use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppContext;

pub mod files;
pub mod tasks;


pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .merge(tasks::task_router(ctx.clone()))
        .merge(files::file_router(ctx))
        // the browser extension posts from other origins
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ping() -> &'static str {
    "ok"
}
