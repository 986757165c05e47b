use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::super::AppState;
use super::{error_response, internal_error};

/// Fixture plus whatever has been generated for it so far.
pub async fn get_match_content_endpoint(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let fixture = match state.store.get_match(&id).await {
        Ok(Some(ctx)) => ctx,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, format!("Match '{}' not found", id));
        }
        Err(e) => return internal_error(e),
    };
    let preview = match state.store.get_preview(&id).await {
        Ok(p) => p,
        Err(e) => return internal_error(e),
    };
    let predictions = match state.store.predictions_for(&id).await {
        Ok(p) => p,
        Err(e) => return internal_error(e),
    };

    Json(serde_json::json!({
        "success": true,
        "match": fixture,
        "preview": preview,
        "predictions": predictions
    }))
    .into_response()
}
