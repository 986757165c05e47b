pub mod dead_letters;
pub mod matches;
pub mod queue;
pub mod trigger;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "success": false, "error": message.into() })),
    )
        .into_response()
}

pub(crate) fn internal_error(err: anyhow::Error) -> Response {
    tracing::error!("API request failed: {:#}", err);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
