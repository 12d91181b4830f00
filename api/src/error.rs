//! API error taxonomy (Exit/error codes): every reconciler
//! error variant has a transient/user/fatal counterpart here so a handler
//! can just `?` through `ApiError` and get the right status code for free.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("unsupported content type")]
    UnsupportedMediaType,

    #[error("upstream not ready: {0}")]
    Upstream(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Registry(#[from] automotive_build_registry::RegistryError),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
}

impl ApiError {
    /// Whether the runtime should advertise a retry hint alongside the 503.
    fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::Upstream(_) => Some(5),
            Self::Registry(err) if err.is_transient() => Some(5),
            Self::Kube(err) if is_transient_kube_error(err) => Some(5),
            _ => None,
        }
    }
}

fn is_transient_kube_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(resp) => resp.code >= 500 || resp.code == 429,
        kube::Error::Service(_) | kube::Error::HyperError(_) => true,
        _ => false,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Registry(err) if err.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Kube(err) if is_transient_kube_error(err) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Kube(kube::Error::Api(resp)) if resp.code == 404 => StatusCode::NOT_FOUND,
            Self::Kube(kube::Error::Api(resp)) if resp.code == 409 => StatusCode::CONFLICT,
            Self::Kube(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorBody {
            error: self.to_string(),
            retry_after_seconds: self.retry_after_seconds(),
        };
        (status, Json(body)).into_response()
    }
}
