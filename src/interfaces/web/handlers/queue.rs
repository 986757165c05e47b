use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};

use super::super::AppState;
use super::internal_error;

pub async fn queue_stats_endpoint(State(state): State<AppState>) -> Response {
    match state.store.queue_stats().await {
        Ok(stats) => Json(serde_json::json!({ "success": true, "stats": stats })).into_response(),
        Err(e) => internal_error(e),
    }
}

pub async fn list_jobs_endpoint(State(state): State<AppState>) -> Response {
    match state.store.list_jobs().await {
        Ok(jobs) => Json(serde_json::json!({ "success": true, "jobs": jobs })).into_response(),
        Err(e) => internal_error(e),
    }
}
