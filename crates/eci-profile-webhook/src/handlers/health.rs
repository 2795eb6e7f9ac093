//! Liveness endpoint.

use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Liveness handler.
///
/// Always answers `200 OK` with an empty body.
///
/// ```text
/// GET /healthz
///
/// Response: 200 OK
/// ```
pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}
