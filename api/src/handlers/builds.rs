//! `/v1/builds/...` handlers.

use std::{sync::Arc, time::Duration};

use automotive_build_controller::{
    image_build::{build_manifest_configmap, has_flash_task, has_push_task, manifest_configmap_name, upload_pod_name, artifact_pod_name},
    progress::{self, PodObservation},
    upload_broker::{deliver_upload, find_waiter_container},
};
use automotive_build_types::{ImageBuild, ImageBuildPhase};
use automotive_build_utils::constants::{ANNOTATION_PROGRESS, ANNOTATION_REQUESTED_BY, LABEL_MEMBER_OF, LABEL_MEMBER_OF_TASKS, LABEL_PIPELINE_RUN};
use axum::{
    extract::{Extension, Path, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use k8s_openapi::{
    api::core::v1::{ConfigMap, Pod},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::api::{Api, ListParams, PostParams};
use kube::ResourceExt;
use serde::Deserialize;
use tokio_util::compat::TokioAsyncReadCompatExt;

use crate::{
    auth::Identity,
    error::ApiError,
    internal_registry,
    state::AppState,
    validation::{apply_build_defaults, into_image_build_spec, validate_build_request, CreateImageBuildRequest},
};

fn api(state: &AppState, namespace: &str) -> Api<ImageBuild> {
    Api::namespaced(state.client.clone(), namespace)
}

fn not_found_or(name: &str) -> impl Fn(kube::Error) -> ApiError + '_ {
    move |err| match err {
        kube::Error::Api(ref resp) if resp.code == 404 => ApiError::NotFound(format!("build {name} not found")),
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
        None => Api::<ImageBuild>::all(state.client.clone()).list(&ListParams::default()).await?,
    };
    Ok(Json(items.items).into_response())
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateImageBuildRequestBody {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(flatten)]
    pub request: CreateImageBuildRequest,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<CreateImageBuildRequestBody>,
) -> Result<Response, ApiError> {
    let config = state.config();
    let mut req = apply_build_defaults(body.request);
    validate_build_request(&req, config.max_manifest_size_bytes)?;

    let namespace = body.namespace.unwrap_or_else(|| "default".to_string());
    let name = body.name;
    let use_internal_registry = req.use_internal_registry;

    if use_internal_registry {
        let tag = req.tag.clone().unwrap_or_else(|| "latest".to_string());
        let is_bootc = matches!(req.mode, automotive_build_types::BuildMode::Bootc);
        let wants_disk_export = req.build_disk_image || req.flash_enabled;
        let (push, export) =
            internal_registry::compose_destinations(&config, &namespace, &name, &tag, is_bootc, wants_disk_export);
        req.container_push = push;
        req.export_oci = export;
    }

    let spec = into_image_build_spec(req);
    let build = ImageBuild {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.clone()),
            annotations: Some([(ANNOTATION_REQUESTED_BY.to_string(), identity.subject.clone())].into()),
            ..Default::default()
        },
        spec,
        status: None,
    };

    let created = match api(&state, &namespace).create(&PostParams::default(), &build).await {
        Ok(created) => created,
        Err(err) => {
            if use_internal_registry {
                internal_registry::cleanup(&state.client, &namespace, &name).await;
            }
            return Err(err.into());
        }
    };

    let status = if use_internal_registry { StatusCode::ACCEPTED } else { StatusCode::CREATED };
    Ok((status, Json(external_view(&state, created))).into_response())
}

fn external_view(state: &AppState, mut build: ImageBuild) -> ImageBuild {
    let config = state.config();
    if let Some(push) = &mut build.spec.container_push {
        push.reference = internal_registry::to_external_display(&config, &push.reference);
    }
    if let Some(export) = &mut build.spec.export_oci {
        export.reference = internal_registry::to_external_display(&config, &export.reference);
    }
    build
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let build = api(&state, &namespace).get(&name).await.map_err(not_found_or(&name))?;
    Ok(Json(external_view(&state, build)).into_response())
}

pub async fn template(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let build = api(&state, &namespace).get(&name).await.map_err(not_found_or(&name))?;
    let cm_api: Api<ConfigMap> = Api::namespaced(state.client.clone(), &namespace);
    match cm_api.get(&manifest_configmap_name(&build.name_any())).await {
        Ok(cm) => Ok(Json(cm.data.unwrap_or_default()).into_response()),
        Err(kube::Error::Api(resp)) if resp.code == 404 => {
            Ok(Json(build_manifest_configmap(&build).data.unwrap_or_default()).into_response())
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    request: Request,
) -> Result<Response, ApiError> {
    let build = api(&state, &namespace).get(&name).await.map_err(not_found_or(&name))?;
    let phase = build.status.as_ref().map(|s| s.phase).unwrap_or_default();
    if !matches!(phase, ImageBuildPhase::Uploading | ImageBuildPhase::Pending) {
        return Err(ApiError::Conflict(format!("build {name} is not in Uploading phase")));
    }

    let pod_api: Api<Pod> = Api::namespaced(state.client.clone(), &namespace);
    let pod = pod_api
        .get(&upload_pod_name(&build.name_any()))
        .await
        .map_err(|_| ApiError::Upstream("upload pod not ready".to_string()))?;
    let waiter = find_waiter_container(&pod).ok_or_else(|| ApiError::Upstream("upload pod not ready".to_string()))?;

    let body_stream = request
        .into_body()
        .into_data_stream()
        .map(|chunk| chunk.map_err(|err| std::io::Error::other(err.to_string())));
    let reader = tokio_util::io::StreamReader::new(body_stream).compat();

    deliver_upload(&pod_api, &waiter, reader)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok((StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response())
}

pub async fn progress_handler(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let build = api(&state, &namespace).get(&name).await.map_err(not_found_or(&name))?;
    let phase = build.status.as_ref().map(|s| s.phase).unwrap_or_default();
    let pipeline_run_name = build.status.as_ref().and_then(|s| s.pipeline_run_name.clone());

    let markers = match &pipeline_run_name {
        Some(run_name) => match state.progress_cache.get(run_name) {
            Some(cached) => cached,
            None => {
                let fresh = fetch_markers(&state, &namespace, run_name).await?;
                state.progress_cache.insert(run_name.clone(), fresh.clone());
                fresh
            }
        },
        None => Vec::new(),
    };
    let observations = markers.into_iter().map(PodObservation::Marker).collect();

    let step = progress::aggregate(
        phase,
        &build.spec,
        observations,
        has_push_task(&build.spec),
        has_flash_task(&build.spec),
        state.config().internal_registry_external_route.is_some(),
    );

    Ok(Json(serde_json::json!({ "phase": phase, "step": step })).into_response())
}

async fn fetch_markers(
    state: &AppState,
    namespace: &str,
    pipeline_run_name: &str,
) -> Result<Vec<progress::TaskMarker>, ApiError> {
    let pods: Api<Pod> = Api::namespaced(state.client.clone(), namespace);
    let selector = format!("{LABEL_PIPELINE_RUN}={pipeline_run_name},{LABEL_MEMBER_OF}={LABEL_MEMBER_OF_TASKS}");
    let list = pods.list(&ListParams::default().labels(&selector)).await?;

    let mut markers = Vec::new();
    for pod in list.items {
        let Some(status) = &pod.status else { continue };
        let task_name = pod.labels().get("tekton.dev/pipelineTask").cloned().unwrap_or_else(|| pod.name_any());
        let start_time = status.start_time.clone().map(|t| t.0).unwrap_or_else(chrono::Utc::now);
        let annotation = pod.annotations().get(ANNOTATION_PROGRESS);
        if let Some((stage, done, total)) = annotation.and_then(|raw| progress::parse_marker_annotation(raw)) {
            markers.push(progress::TaskMarker { task_name, pod_start_time: start_time, stage, done, total });
        }
    }
    Ok(markers)
}

pub async fn logs(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let build = api(&state, &namespace).get(&name).await.map_err(not_found_or(&name))?;
    let phase = build.status.as_ref().map(|s| s.phase).unwrap_or_default();
    let pipeline_run_name = build.status.as_ref().and_then(|s| s.pipeline_run_name.clone());
    let max_duration = Duration::from_secs(u64::from(state.config().max_log_stream_duration_minutes) * 60);

    let body = crate::logs::stream(state.client.clone(), namespace, pipeline_run_name, phase, max_duration);
    Ok(([("content-type", "text/plain; charset=utf-8")], body).into_response())
}

pub async fn artifact(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let build = api(&state, &namespace).get(&name).await.map_err(not_found_or(&name))?;
    let status = build.status.clone().unwrap_or_default();
    if status.phase == ImageBuildPhase::Failed {
        return Err(ApiError::Upstream(format!("build {name} failed")));
    }
    let pod_api: Api<Pod> = Api::namespaced(state.client.clone(), &namespace);
    let pod_name = artifact_pod_name(&build.name_any());
    crate::artifact::stream(&pod_api, &pod_name, &status).await
}
