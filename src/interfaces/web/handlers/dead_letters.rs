use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::super::AppState;
use super::{error_response, internal_error};
use crate::core::store::{DeadLetterStatus, ReplayOutcome};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(serde::Deserialize)]
pub struct ListQuery {
    status: Option<String>,
    limit: Option<usize>,
}

pub async fn list_dead_letters_endpoint(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => match DeadLetterStatus::parse(raw) {
            Some(s) => Some(s),
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Unknown status '{}'. Use open or replayed", raw),
                );
            }
        },
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    match state.store.list_dead_letters(status, limit).await {
        Ok(entries) => Json(serde_json::json!({
            "success": true,
            "entries": entries
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

pub async fn get_dead_letter_endpoint(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.store.get_dead_letter(&id).await {
        Ok(Some(entry)) => {
            Json(serde_json::json!({ "success": true, "entry": entry })).into_response()
        }
        Ok(None) => not_found(&id),
        Err(e) => internal_error(e),
    }
}

pub async fn replay_dead_letter_endpoint(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.store.replay_dead_letter(&id).await {
        Ok(ReplayOutcome::NotFound) => not_found(&id),
        Ok(ReplayOutcome::AlreadyReplayed) => error_response(
            StatusCode::CONFLICT,
            format!("Dead letter '{}' was already replayed", id),
        ),
        Ok(outcome) => {
            Json(serde_json::json!({ "success": true, "replay": outcome })).into_response()
        }
        Err(e) => internal_error(e),
    }
}

pub async fn purge_dead_letter_endpoint(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.store.purge_dead_letter(&id).await {
        Ok(true) => Json(serde_json::json!({ "success": true })).into_response(),
        Ok(false) => not_found(&id),
        Err(e) => internal_error(e),
    }
}

fn not_found(id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        format!("Dead letter '{}' not found", id),
    )
}
