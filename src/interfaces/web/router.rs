use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};

use super::AppState;
use super::auth;
use super::handlers::{dead_letters, matches, queue, trigger};

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/trigger", post(trigger::trigger_endpoint))
        .route(
            "/api/dead-letters",
            get(dead_letters::list_dead_letters_endpoint),
        )
        .route(
            "/api/dead-letters/{id}",
            get(dead_letters::get_dead_letter_endpoint)
                .delete(dead_letters::purge_dead_letter_endpoint),
        )
        .route(
            "/api/dead-letters/{id}/replay",
            post(dead_letters::replay_dead_letter_endpoint),
        )
        .route("/api/queue/stats", get(queue::queue_stats_endpoint))
        .route("/api/queue/jobs", get(queue::list_jobs_endpoint))
        .route("/api/matches/{id}", get(matches::get_match_content_endpoint))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}
