//! Internal registry flow: mint a scoped push secret, ensure an
//! `ImageStream`, and compose the output destination(s) an `ImageBuild`
//! needs when the caller asked to push to the in-cluster registry rather
//! than naming an external one.
//!
//! `ImageStream` is an OpenShift kind with no `k8s-openapi` binding, so it
//! is addressed as a [`DynamicObject`] resolved from a bare
//! group/version/kind, the same idiom used elsewhere for kinds outside the
//! typed API.

use std::collections::BTreeMap;

use automotive_build_controller::labels::{owner_reference, standard_labels};
use automotive_build_types::{ImageBuild, OperatorConfig, RegistryDestination};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams},
    core::ApiResource,
    Client, ResourceExt,
};
use serde_json::json;

use crate::error::ApiError;

const IMAGE_STREAM_GVK: (&str, &str, &str) = ("image.openshift.io", "v1", "ImageStream");

fn image_stream_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk(IMAGE_STREAM_GVK.0, IMAGE_STREAM_GVK.1, IMAGE_STREAM_GVK.2);
    ApiResource::from_gvk(&gvk)
}

/// Ensure a push-auth `Secret` exists for this build (idempotent
/// get-or-create, same discipline as the reconcilers' derived resources).
/// `token` is the service-account token the caller's delegated REST config
/// resolved.
pub async fn ensure_push_secret(
    client: &Client,
    namespace: &str,
    name: &str,
    token: &str,
) -> Result<Secret, ApiError> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    if let Ok(existing) = api.get(name).await {
        return Ok(existing);
    }

    let mut string_data = BTreeMap::new();
    string_data.insert(".dockerconfigjson".to_string(), dockerconfigjson(token));

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(standard_labels("registry-auth")),
            ..Default::default()
        },
        type_: Some("kubernetes.io/dockerconfigjson".to_string()),
        string_data: Some(string_data),
        ..Default::default()
    };

    api.create(&Default::default(), &secret).await.map_err(ApiError::from)
}

fn dockerconfigjson(token: &str) -> String {
    json!({
        "auths": {
            "image-registry.openshift-image-registry.svc:5000": {
                "auth": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, format!("serviceaccount:{token}"))
            }
        }
    })
    .to_string()
}

/// Ensure the `ImageStream` named after the build exists, owned by it.
pub async fn ensure_image_stream(client: &Client, build: &ImageBuild) -> Result<(), ApiError> {
    let namespace = build.namespace().unwrap_or_default();
    let name = build.name_any();
    let ar = image_stream_resource();
    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), &namespace, &ar);

    if api.get(&name).await.is_ok() {
        return Ok(());
    }

    let mut object = DynamicObject::new(&name, &ar);
    object.metadata.labels = Some(standard_labels("image-stream"));
    object.metadata.owner_references = Some(vec![owner_reference(build)]);

    api.patch(&name, &PatchParams::apply("automotive-build-api"), &Patch::Apply(&object))
        .await
        .map_err(ApiError::from)?;
    Ok(())
}

/// Compose the destination(s) for an internal-registry build:
/// bootc gets `ContainerPush`; bootc with a disk export additionally gets an
/// `ExportOCI` with a `-disk` suffix; everything else gets only `ExportOCI`.
#[must_use]
pub fn compose_destinations(
    config: &OperatorConfig,
    namespace: &str,
    name: &str,
    tag: &str,
    is_bootc: bool,
    wants_disk_export: bool,
) -> (Option<RegistryDestination>, Option<RegistryDestination>) {
    let base = format!("{}/{namespace}/{name}:{tag}", config.internal_registry_host);
    let secret_ref = Some(push_secret_name(name));

    if is_bootc {
        let push = Some(RegistryDestination { reference: base.clone(), secret_ref: secret_ref.clone() });
        let export = wants_disk_export.then(|| RegistryDestination {
            reference: format!("{}/{namespace}/{name}-disk:{tag}", config.internal_registry_host),
            secret_ref,
        });
        (push, export)
    } else {
        (None, Some(RegistryDestination { reference: base, secret_ref }))
    }
}

#[must_use]
pub fn push_secret_name(build_name: &str) -> String {
    automotive_build_utils::derived_name(build_name, "push-auth")
}

/// Replace the internal-registry host with the discovered external route in
/// a user-visible reference. Internally stored references are never
/// rewritten.
#[must_use]
pub fn to_external_display(config: &OperatorConfig, reference: &str) -> String {
    match &config.internal_registry_external_route {
        Some(external) if reference.starts_with(&config.internal_registry_host) => {
            reference.replacen(&config.internal_registry_host, external, 1)
        }
        _ => reference.to_string(),
    }
}

/// Tear down any speculative resources this flow created, used when the
/// `ImageBuild` create itself then fails (Commit the
/// ImageBuild create; on failure, the deferred cleanup tears down...).
pub async fn cleanup(client: &Client, namespace: &str, build_name: &str) {
    let secret_name = push_secret_name(build_name);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    if let Err(err) = secrets.delete(&secret_name, &Default::default()).await {
        tracing::warn!(%err, secret_name, "failed to clean up minted push secret after a failed build create");
    }

    let ar = image_stream_resource();
    let streams: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &ar);
    if let Err(err) = streams.delete(build_name, &Default::default()).await {
        tracing::warn!(%err, build_name, "failed to clean up minted ImageStream after a failed build create");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> OperatorConfig {
        OperatorConfig { internal_registry_host: "image-registry.openshift-image-registry.svc:5000".to_string(), ..Default::default() }
    }

    #[test]
    fn bootc_disk_build_gets_push_and_export_destinations() {
        let config = sample_config();
        let (push, export) = compose_destinations(&config, "ns", "my-build", "latest", true, true);
        assert!(push.is_some());
        assert!(export.unwrap().reference.ends_with("my-build-disk:latest"));
    }

    #[test]
    fn non_bootc_build_gets_only_export() {
        let config = sample_config();
        let (push, export) = compose_destinations(&config, "ns", "my-build", "latest", false, false);
        assert!(push.is_none());
        assert!(export.is_some());
    }

    #[test]
    fn external_display_rewrites_internal_host_only() {
        let mut config = sample_config();
        config.internal_registry_external_route = Some("registry.apps.example.com".to_string());
        let internal = format!("{}/ns/my-build:latest", config.internal_registry_host);
        assert_eq!(to_external_display(&config, &internal), "registry.apps.example.com/ns/my-build:latest");

        let external_already = "quay.io/org/img:v1";
        assert_eq!(to_external_display(&config, external_already), external_already);
    }
}
