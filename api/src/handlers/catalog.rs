//! `/v1/catalog/...` handlers: paged/filtered catalog
//! browsing, publish-from-build, and forced re-verification.

use std::sync::Arc;

use automotive_build_types::{CatalogImage, CatalogImageMetadata, CatalogImagePhase, CatalogImageSpec, ImageBuild, ImageBuildPhase, TargetEntry};
use automotive_build_utils::constants::ANNOTATION_REQUESTED_BY;
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event as AuditEvent, EventType, Recorder, Reporter};
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};

use crate::{auth::Identity, error::ApiError, state::AppState};

fn api(state: &AppState, namespace: &str) -> Api<CatalogImage> {
    Api::namespaced(state.client.clone(), namespace)
}

fn not_found_or(name: &str) -> impl Fn(kube::Error) -> ApiError + '_ {
    move |err| match err {
        kube::Error::Api(ref resp) if resp.code == 404 => ApiError::NotFound(format!("catalog image {name} not found")),
        other => ApiError::Kube(other),
    }
}

const DEFAULT_PAGE_LIMIT: u32 = 20;
const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
    #[serde(rename = "continue", default)]
    continue_token: Option<String>,
    #[serde(default)]
    architecture: Option<String>,
    #[serde(default)]
    distro: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    phase: Option<CatalogImagePhase>,
    #[serde(default)]
    tags: Option<String>,
}

#[derive(Debug, Serialize)]
struct CatalogPage {
    items: Vec<CatalogImage>,
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    continue_token: Option<String>,
}

fn is_duplicate_registry_url(existing: &[CatalogImage], registry_url: &str) -> bool {
    existing.iter().any(|image| image.spec.registry_url == registry_url)
}

fn matches_filters(image: &CatalogImage, query: &ListQuery) -> bool {
    if let Some(arch) = &query.architecture {
        if image.spec.metadata.architecture.as_deref() != Some(arch.as_str()) {
            return false;
        }
    }
    if let Some(distro) = &query.distro {
        if image.spec.metadata.distro.as_deref() != Some(distro.as_str()) {
            return false;
        }
    }
    if let Some(target) = &query.target {
        if !image.spec.metadata.targets.iter().any(|t| &t.name == target) {
            return false;
        }
    }
    if let Some(phase) = query.phase {
        if image.status.as_ref().map(|s| s.phase).unwrap_or_default() != phase {
            return false;
        }
    }
    if let Some(tag) = &query.tags {
        if !image.spec.tags.iter().any(|t| t == tag) {
            return false;
        }
    }
    true
}

pub async fn list(State(state): State<Arc<AppState>>, Query(query): Query<ListQuery>) -> Result<Response, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT);
    let params = ListParams { limit: Some(limit), continue_token: query.continue_token.clone(), ..Default::default() };

    let list = match &query.namespace {
        Some(namespace) => api(&state, namespace).list(&params).await?,
        None => Api::<CatalogImage>::all(state.client.clone()).list(&params).await?,
    };

    let continue_token = list.metadata.continue_.clone().filter(|token| !token.is_empty());
    let items = list.items.into_iter().filter(|image| matches_filters(image, &query)).collect();
    Ok(Json(CatalogPage { items, continue_token }).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub image_build_name: String,
    #[serde(default)]
    pub image_build_namespace: Option<String>,
}

/// Publish a catalog entry from a completed `ImageBuild`'s push/export
/// destination, rejecting a duplicate `registryUrl` in the namespace. CRDs
/// have no native field index, so duplicate detection here is a
/// namespace-scoped list scan rather than an O(1) lookup.
pub async fn publish(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<PublishRequest>,
) -> Result<Response, ApiError> {
    let namespace = body.image_build_namespace.unwrap_or_else(|| "default".to_string());
    let builds: Api<ImageBuild> = Api::namespaced(state.client.clone(), &namespace);
    let build = builds
        .get(&body.image_build_name)
        .await
        .map_err(|_| ApiError::NotFound(format!("image build {} not found", body.image_build_name)))?;

    let status = build.status.clone().unwrap_or_default();
    if status.phase != ImageBuildPhase::Completed {
        return Err(ApiError::Conflict(format!(
            "image build {} has not completed (phase {:?})",
            body.image_build_name, status.phase
        )));
    }
    let registry_url = build
        .spec
        .container_push
        .as_ref()
        .or(build.spec.export_oci.as_ref())
        .map(|dest| dest.reference.clone())
        .ok_or_else(|| ApiError::Validation("completed build has no container push or OCI export destination".to_string()))?;

    let catalog_api = api(&state, &namespace);
    let existing = catalog_api.list(&ListParams::default()).await?;
    if is_duplicate_registry_url(&existing.items, &registry_url) {
        return Err(ApiError::Conflict(format!("a catalog entry for {registry_url} already exists in namespace {namespace}")));
    }

    let metadata = CatalogImageMetadata {
        architecture: build.spec.architecture.clone(),
        distro: Some(build.spec.distro.clone()),
        distro_version: None,
        targets: vec![TargetEntry { name: build.spec.target.clone(), verified: false, notes: None }],
        bootc: matches!(build.spec.mode, automotive_build_types::BuildMode::Bootc),
        build_mode: Some(format!("{:?}", build.spec.mode)),
        kernel_version: None,
    };

    let entry = CatalogImage {
        metadata: ObjectMeta {
            name: Some(body.image_build_name.clone()),
            namespace: Some(namespace.clone()),
            annotations: Some([(ANNOTATION_REQUESTED_BY.to_string(), identity.subject.clone())].into()),
            ..Default::default()
        },
        spec: CatalogImageSpec {
            registry_url,
            digest: None,
            tags: vec![],
            auth_secret_ref: None,
            metadata,
            verification_interval_secs: 3600,
            source_image_build: Some(body.image_build_name.clone()),
        },
        status: None,
    };

    let created = catalog_api.create(&PostParams::default(), &entry).await?;
    record_published_event(&state, &created).await;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn record_published_event(state: &AppState, image: &CatalogImage) {
    let reporter = Reporter { controller: "automotive-build-api".to_string(), instance: None };
    let recorder = Recorder::new(state.client.clone(), reporter, image.object_ref(&()));
    let event = AuditEvent {
        type_: EventType::Normal,
        reason: "Published".to_string(),
        note: Some(format!("catalog entry published for {}", image.spec.registry_url)),
        action: "Publish".to_string(),
        secondary: None,
    };
    if let Err(err) = recorder.publish(&event).await {
        tracing::warn!(%err, name = %image.name_any(), "failed to record catalog publish event");
    }
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let api = api(&state, &namespace);
    let image = api.get(&name).await.map_err(not_found_or(&name))?;

    // Best-effort access counter: a lost race against a concurrent
    // verification patch just undercounts by one.
    let bumped = image.status.as_ref().map(|s| s.access_count).unwrap_or_default() + 1;
    let patch = serde_json::json!({ "status": { "accessCount": bumped } });
    if let Err(err) = api.patch_status(&name, &PatchParams::apply("automotive-build-api"), &Patch::Merge(patch)).await {
        tracing::debug!(%err, name, "failed to bump catalog access count");
    }

    Ok(Json(image).into_response())
}

pub async fn verify(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let api = api(&state, &namespace);
    api.get(&name).await.map_err(not_found_or(&name))?;
    let patch = serde_json::json!({ "status": { "phase": CatalogImagePhase::Verifying } });
    api.patch_status(&name, &PatchParams::apply("automotive-build-api"), &Patch::Merge(patch)).await?;
    Ok(StatusCode::ACCEPTED.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(registry_url: &str, architecture: Option<&str>) -> CatalogImage {
        CatalogImage {
            metadata: ObjectMeta::default(),
            spec: CatalogImageSpec {
                registry_url: registry_url.to_string(),
                digest: None,
                tags: vec!["latest".to_string()],
                auth_secret_ref: None,
                metadata: CatalogImageMetadata {
                    architecture: architecture.map(str::to_string),
                    ..Default::default()
                },
                verification_interval_secs: 3600,
                source_image_build: None,
            },
            status: None,
        }
    }

    #[test]
    fn filters_by_architecture() {
        let query = ListQuery {
            namespace: None,
            limit: None,
            continue_token: None,
            architecture: Some("arm64".to_string()),
            distro: None,
            target: None,
            phase: None,
            tags: None,
        };
        assert!(matches_filters(&sample("quay.io/a:v1", Some("arm64")), &query));
        assert!(!matches_filters(&sample("quay.io/b:v1", Some("amd64")), &query));
    }

    #[test]
    fn filters_by_tag() {
        let query = ListQuery {
            namespace: None,
            limit: None,
            continue_token: None,
            architecture: None,
            distro: None,
            target: None,
            phase: None,
            tags: Some("latest".to_string()),
        };
        assert!(matches_filters(&sample("quay.io/a:v1", None), &query));
    }

    #[test]
    fn rejects_duplicate_registry_url_within_namespace() {
        let existing = vec![sample("quay.io/org/a:v1", None)];
        assert!(is_duplicate_registry_url(&existing, "quay.io/org/a:v1"));
        assert!(!is_duplicate_registry_url(&existing, "quay.io/org/b:v1"));
    }
}
