//! `/v1/container-builds/...` handlers: create/list/get/uploads/logs for
//! Containerfile builds, mirroring
//! [`crate::handlers::builds`] but scoped to what a `ContainerBuild` has —
//! no template, progress, or artifact endpoint, since there is no manifest
//! and the output is a pushed image rather than a downloadable file.

use std::{sync::Arc, time::Duration};

use automotive_build_controller::upload_broker::{deliver_upload, find_waiter_container};
use automotive_build_types::{ContainerBuild, ContainerBuildPhase, ContainerBuildSpec};
use automotive_build_utils::constants::{ANNOTATION_REQUESTED_BY, LABEL_BUILDRUN_NAME};
use axum::{
    extract::{Extension, Path, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use k8s_openapi::{api::core::v1::Pod, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use kube::api::{Api, ListParams, PostParams};
use kube::ResourceExt;
use serde::Deserialize;
use tokio_util::compat::TokioAsyncReadCompatExt;

use crate::{auth::Identity, error::ApiError, state::AppState};

fn api(state: &AppState, namespace: &str) -> Api<ContainerBuild> {
    Api::namespaced(state.client.clone(), namespace)
}

fn not_found_or(name: &str) -> impl Fn(kube::Error) -> ApiError + '_ {
    move |err| match err {
        kube::Error::Api(ref resp) if resp.code == 404 => ApiError::NotFound(format!("container build {name} not found")),
        other => ApiError::Kube(other),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    namespace: Option<String>,
}

pub async fn list(State(state): State<Arc<AppState>>, Query(query): Query<ListQuery>) -> Result<Response, ApiError> {
    let items = match query.namespace {
        Some(namespace) => api(&state, &namespace).list(&ListParams::default()).await?,
        None => Api::<ContainerBuild>::all(state.client.clone()).list(&ListParams::default()).await?,
    };
    Ok(Json(items.items).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CreateContainerBuildRequest {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(flatten)]
    pub spec: ContainerBuildSpec,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<CreateContainerBuildRequest>,
) -> Result<Response, ApiError> {
    if body.spec.output.trim().is_empty() {
        return Err(ApiError::Validation("output is required".to_string()));
    }
    let namespace = body.namespace.unwrap_or_else(|| "default".to_string());
    let build = ContainerBuild {
        metadata: ObjectMeta {
            name: Some(body.name),
            namespace: Some(namespace.clone()),
            annotations: Some([(ANNOTATION_REQUESTED_BY.to_string(), identity.subject.clone())].into()),
            ..Default::default()
        },
        spec: body.spec,
        status: None,
    };
    let created = api(&state, &namespace).create(&PostParams::default(), &build).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let build = api(&state, &namespace).get(&name).await.map_err(not_found_or(&name))?;
    Ok(Json(build).into_response())
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    request: Request,
) -> Result<Response, ApiError> {
    let build = api(&state, &namespace).get(&name).await.map_err(not_found_or(&name))?;
    let phase = build.status.as_ref().map(|s| s.phase).unwrap_or_default();
    if !matches!(phase, ContainerBuildPhase::Uploading | ContainerBuildPhase::Pending) {
        return Err(ApiError::Conflict(format!("container build {name} is not in Uploading phase")));
    }

    let build_run_name = build
        .status
        .as_ref()
        .and_then(|s| s.build_run_name.clone())
        .ok_or_else(|| ApiError::Upstream("build pod not ready".to_string()))?;

    let pod_api: Api<Pod> = Api::namespaced(state.client.clone(), &namespace);
    let selector = format!("{LABEL_BUILDRUN_NAME}={build_run_name}");
    let pods = pod_api.list(&ListParams::default().labels(&selector)).await?;
    let pod = pods.items.into_iter().next().ok_or_else(|| ApiError::Upstream("build pod not ready".to_string()))?;
    let waiter = find_waiter_container(&pod).ok_or_else(|| ApiError::Upstream("build pod not ready".to_string()))?;

    let body_stream = request
        .into_body()
        .into_data_stream()
        .map(|chunk| chunk.map_err(|err| std::io::Error::other(err.to_string())));
    let reader = tokio_util::io::StreamReader::new(body_stream).compat();

    deliver_upload(&pod_api, &waiter, reader)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn logs(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let build = api(&state, &namespace).get(&name).await.map_err(not_found_or(&name))?;
    let Some(build_run_name) = build.status.as_ref().and_then(|s| s.build_run_name.clone()) else {
        return Ok(([("content-type", "text/plain; charset=utf-8")], "").into_response());
    };
    let phase = build.status.as_ref().map(|s| s.phase).unwrap_or_default();
    let max_duration = Duration::from_secs(u64::from(state.config().max_log_stream_duration_minutes) * 60);

    let body = crate::logs::stream_by_label(
        state.client.clone(),
        namespace,
        LABEL_BUILDRUN_NAME,
        build_run_name,
        phase.is_terminal(),
        max_duration,
    );
    Ok(([("content-type", "text/plain; charset=utf-8")], body).into_response())
}
