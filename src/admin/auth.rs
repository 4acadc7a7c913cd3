//! Admin bearer-token authentication.
//!
//! Grounded on
//! `examples/sblanchard-SerialAgent/crates/gateway/src/api/admin/guard.rs`'s
//! `AdminGuard` extractor: SHA-256 the provided token, compare in constant
//! time against a digest computed once at startup. Absent configuration
//! means the surface is closed, not open — the opposite default from the
//! teacher's dev-mode fallback ("absence permitted only when
//! a debug flag is set, otherwise the surface is closed").

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::AppState;

/// Axum extractor enforcing the operator bearer token on protected routes.
pub struct AdminGuard;

fn unauthorized() -> Response {
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "invalid or missing admin token" })),
    )
        .into_response();
    response
        .headers_mut()
        .insert("WWW-Authenticate", HeaderValue::from_static("Bearer"));
    response
}

#[async_trait]
impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected_hash = match &state.admin_token_hash {
            Some(hash) => hash,
            None => {
                if state.allow_unauthenticated_admin {
                    return Ok(AdminGuard);
                }
                return Err((
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(serde_json::json!({ "error": "admin surface is closed: no operator token configured" })),
                )
                    .into_response());
            }
        };

        let provided = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");

        let provided_hash = Sha256::digest(provided.as_bytes());
        if !bool::from(provided_hash.as_slice().ct_eq(expected_hash.as_slice())) {
            return Err(unauthorized());
        }
        Ok(AdminGuard)
    }
}

/// Validates a path parameter against `[A-Za-z0-9_-]{1,64}`; rejects path
/// traversal in session/workflow identifiers.
pub fn valid_path_param(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 64
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
