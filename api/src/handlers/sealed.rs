//! `/v1/sealed/...` handlers: create/list/get for the
//! secure-boot key lifecycle's `ImageSealed` operations.

use std::sync::Arc;

use automotive_build_types::{ImageSealed, ImageSealedSpec, SealedOperation};
use automotive_build_utils::constants::ANNOTATION_REQUESTED_BY;
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams, PostParams};
use serde::Deserialize;

use crate::{auth::Identity, error::ApiError, state::AppState};

fn api(state: &AppState, namespace: &str) -> Api<ImageSealed> {
    Api::namespaced(state.client.clone(), namespace)
}

fn not_found_or(name: &str) -> impl Fn(kube::Error) -> ApiError + '_ {
    move |err| match err {
        kube::Error::Api(ref resp) if resp.code == 404 => ApiError::NotFound(format!("sealed operation {name} not found")),
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
        None => Api::<ImageSealed>::all(state.client.clone()).list(&ListParams::default()).await?,
    };
    Ok(Json(items.items).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CreateImageSealedRequest {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(flatten)]
    pub spec: ImageSealedSpec,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<CreateImageSealedRequest>,
) -> Result<Response, ApiError> {
    validate(&body.spec)?;
    let namespace = body.namespace.unwrap_or_else(|| "default".to_string());
    let operation = ImageSealed {
        metadata: ObjectMeta {
            name: Some(body.name),
            namespace: Some(namespace.clone()),
            annotations: Some([(ANNOTATION_REQUESTED_BY.to_string(), identity.subject.clone())].into()),
            ..Default::default()
        },
        spec: body.spec,
        status: None,
    };
    let created = api(&state, &namespace).create(&PostParams::default(), &operation).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

/// Reject operations missing the secret a given step needs: reseal and
/// inject need a key, extract does not.
fn validate(spec: &ImageSealedSpec) -> Result<(), ApiError> {
    if spec.input_ref.trim().is_empty() {
        return Err(ApiError::Validation("inputRef is required".to_string()));
    }
    let needs_key = matches!(
        spec.operation,
        SealedOperation::Reseal | SealedOperation::PrepareReseal | SealedOperation::InjectSigned
    );
    if needs_key && spec.key_content.is_none() && spec.key_secret_ref.is_none() {
        return Err(ApiError::Validation(format!(
            "operation {:?} requires keyContent or keySecretRef",
            spec.operation
        )));
    }
    Ok(())
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let operation = api(&state, &namespace).get(&name).await.map_err(not_found_or(&name))?;
    Ok(Json(operation).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec() -> ImageSealedSpec {
        ImageSealedSpec {
            operation: SealedOperation::ExtractForSigning,
            input_ref: "quay.io/org/img:v1".to_string(),
            output_ref: None,
            signed_ref: None,
            aib_image: None,
            builder_image: None,
            architecture: None,
            secret_ref: None,
            key_content: None,
            key_password: None,
            key_secret_ref: None,
        }
    }

    #[test]
    fn extract_does_not_require_a_key() {
        assert!(validate(&base_spec()).is_ok());
    }

    #[test]
    fn reseal_requires_a_key() {
        let mut spec = base_spec();
        spec.operation = SealedOperation::Reseal;
        assert!(validate(&spec).is_err());
    }

    #[test]
    fn reseal_accepts_key_secret_ref() {
        let mut spec = base_spec();
        spec.operation = SealedOperation::Reseal;
        spec.key_secret_ref = Some("my-key".to_string());
        assert!(validate(&spec).is_ok());
    }
}
