use axum::{
    Json,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use super::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Largest request body the signature check will buffer.
pub(crate) const MAX_BODY_BYTES: usize = 64 * 1024;

pub(crate) const SIGNATURE_HEADER: &str = "x-signature";

/// Accepts `Authorization: Bearer <secret>` or an `X-Signature` HMAC-SHA256 hex
/// digest keyed by the shared secret over `"{METHOD}\n{path}\n"` followed by the
/// raw body. Anything else stops here, before any handler runs.
pub async fn require_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(_) => {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(serde_json::json!({ "error": "Request body too large" })),
            )
                .into_response();
        }
    };

    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    if !is_authorized(&parts.headers, parts.method.as_str(), target, &bytes, &state.secret) {
        warn!("Rejected unauthenticated {} {}", parts.method, parts.uri.path());
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "Missing or invalid credentials. Use: Bearer <secret> or X-Signature: <hmac-sha256 hex>"
            })),
        )
            .into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

fn is_authorized(
    headers: &HeaderMap,
    method: &str,
    target: &str,
    body: &Bytes,
    secret: &str,
) -> bool {
    if secret.is_empty() {
        return false;
    }

    if let Some(token) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
    {
        return constant_time_eq(token.trim().as_bytes(), secret.as_bytes());
    }

    if let Some(sig) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
        return verify_signature(sig, method, target, body, secret);
    }

    false
}

/// Accepts both bare hex and the `sha256=<hex>` form.
fn verify_signature(
    signature: &str,
    method: &str,
    target: &str,
    body: &[u8],
    secret: &str,
) -> bool {
    let hex_sig = signature.trim();
    let hex_sig = hex_sig.strip_prefix("sha256=").unwrap_or(hex_sig);
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Some(mac) = keyed_mac(method, target, body, secret) else {
        return false;
    };
    mac.verify_slice(&expected).is_ok()
}

fn keyed_mac(method: &str, target: &str, body: &[u8], secret: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(method.to_ascii_uppercase().as_bytes());
    mac.update(b"\n");
    mac.update(target.as_bytes());
    mac.update(b"\n");
    mac.update(body);
    Some(mac)
}

/// Signature for a request to `target` (path plus any query string).
pub(crate) fn sign(method: &str, target: &str, body: &[u8], secret: &str) -> Option<String> {
    let mac = keyed_mac(method, target, body, secret)?;
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
