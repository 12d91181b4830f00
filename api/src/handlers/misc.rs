//! Unauthenticated and near-static endpoints: health, the OpenAPI document,
//! the redacted operator config, and process metrics/version.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus::{Encoder, TextEncoder};

use crate::state::AppState;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

const OPENAPI_YAML: &str = include_str!("../../openapi.yaml");

pub async fn openapi() -> impl IntoResponse {
    ([("content-type", "application/yaml")], OPENAPI_YAML)
}

pub async fn config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(state.config().redacted())
}

pub async fn metrics(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(%err, "failed to encode prometheus metrics");
    }
    ([("content-type", encoder.format_type().to_string())], buffer)
}

pub async fn version() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
