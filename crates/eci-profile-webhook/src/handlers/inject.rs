//! Pod mutation endpoint.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::Json;

use crate::admission::{self, Review};
use crate::error::ApiError;
use crate::state::WebhookState;

const APPLICATION_JSON: &str = "application/json";

/// Mutate a Pod under admission.
///
/// ```text
/// POST /inject
/// Content-Type: application/json
///
/// {"apiVersion": "admission.k8s.io/v1", "kind": "AdmissionReview", "request": {...}}
///
/// Response: 200 OK
/// {"apiVersion": "admission.k8s.io/v1", "kind": "AdmissionReview",
///  "response": {"uid": "...", "allowed": true, "patchType": "JSONPatch", "patch": "..."}}
/// ```
///
/// # Errors
///
/// Returns 400 for an empty or malformed body and 415 for a non-JSON
/// content type.
pub async fn inject(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Review>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::EmptyBody);
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !is_json(content_type) {
        return Err(ApiError::UnsupportedMediaType(content_type.to_string()));
    }

    admission::review(&state.engine, &body).map(Json)
}

fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(APPLICATION_JSON))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_content_types() {
        assert!(is_json("application/json"));
        assert!(is_json("Application/JSON"));
        assert!(is_json("application/json; charset=utf-8"));
        assert!(!is_json(""));
        assert!(!is_json("text/plain"));
        assert!(!is_json("application/yaml"));
    }
}
