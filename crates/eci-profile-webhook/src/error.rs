//! Error types for the webhook server and its bootstrap.
//!
//! [`ApiError`] is a transport-level rejection: the API server sees a non-200
//! response and, under `failurePolicy=Ignore`, admits the Pod unmutated.
//! Policy failures are not `ApiError`s; they become `allowed: false` reviews.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Rejection of an admission request before any policy runs.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request carried no body.
    #[error("request body is empty")]
    EmptyBody,

    /// The request body is not JSON.
    #[error("contentType={0}, expect application/json")]
    UnsupportedMediaType(String),

    /// The body is not a decodable AdmissionReview.
    #[error("request could not be decoded: {0}")]
    Decode(String),

    /// The review's apiVersion/kind is not served.
    #[error("unsupported group version kind: {0}")]
    UnsupportedKind(String),

    /// The review carried no request.
    #[error("admission review has no request")]
    MissingRequest,

    /// The request targets something other than core/v1 pods.
    #[error("resource={0}, expect /v1, Resource=pods")]
    UnsupportedResource(String),

    /// The response could not be encoded.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

/// Error details.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::EmptyBody
            | Self::Decode(_)
            | Self::UnsupportedKind(_)
            | Self::MissingRequest
            | Self::UnsupportedResource(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error code string for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::EmptyBody => "empty_body",
            Self::UnsupportedMediaType(_) => "unsupported_media_type",
            Self::Decode(_) => "decode_error",
            Self::UnsupportedKind(_) => "unsupported_kind",
            Self::MissingRequest => "missing_request",
            Self::UnsupportedResource(_) => "unsupported_resource",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        tracing::warn!(status = status.as_u16(), code, error = %message, "admission request rejected");

        let body = ErrorResponse {
            error: ErrorBody { code, message },
        };

        (status, Json(body)).into_response()
    }
}

/// Startup failure. Every variant is fatal.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// CA material is missing or unusable.
    #[error("certificate authority: {0}")]
    Ca(String),

    /// Issuing or loading the serving certificate failed.
    #[error("tls: {0}")]
    Tls(#[from] openssl::error::ErrorStack),

    /// The kube client could not be configured.
    #[error("client configuration: {0}")]
    ClientConfig(String),

    /// A call to the API server failed.
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The API server reported a version that is not semver.
    #[error("parse server version {version:?}: {source}")]
    Version {
        /// The raw `gitVersion`.
        version: String,
        /// Parser failure.
        #[source]
        source: semver::Error,
    },

    /// Webhook registration failed.
    #[error("register mutating webhook {name:?}: {source}")]
    Registration {
        /// MutatingWebhookConfiguration name.
        name: String,
        /// Underlying API failure.
        #[source]
        source: kube::Error,
    },

    /// A registration object could not be built.
    #[error("build webhook configuration: {0}")]
    Encode(#[from] serde_json::Error),

    /// Informer caches never synced.
    #[error(transparent)]
    Controller(#[from] eci_profile_controller::ControllerError),

    /// Reading CA files or binding the listener failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for bootstrap operations.
pub type Result<T> = std::result::Result<T, BootstrapError>;
