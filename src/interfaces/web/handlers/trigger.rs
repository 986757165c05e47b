use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::super::AppState;
use super::{error_response, internal_error};
use crate::core::config::parse_kinds;
use crate::core::errors::ValidationError;
use crate::core::pipeline::trigger::Scope;

#[derive(serde::Deserialize)]
pub struct TriggerRequest {
    scope: String,
    #[serde(default)]
    kinds: Vec<String>,
}

pub async fn trigger_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<TriggerRequest>,
) -> Response {
    let scope = match Scope::parse(&payload.scope) {
        Ok(s) => s,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let kinds = match parse_kinds(&payload.kinds) {
        Ok(k) => k,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match state.trigger.enqueue(&scope, &kinds).await {
        Ok(report) => Json(serde_json::json!({
            "success": true,
            "scope": scope.to_string(),
            "matches": report.matches,
            "jobs_planned": report.jobs_planned,
            "jobs_created": report.jobs_created
        }))
        .into_response(),
        Err(e) => match e.downcast_ref::<ValidationError>() {
            Some(v @ ValidationError::UnknownMatch(_)) => {
                error_response(StatusCode::NOT_FOUND, v.to_string())
            }
            _ => internal_error(e),
        },
    }
}
