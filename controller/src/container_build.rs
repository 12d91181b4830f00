//! `ContainerBuild` reconciler: drive a Containerfile build
//! through a BuildRun, watching the source-upload container before the
//! build strategy itself starts.
//!
//! Shipwright's `BuildRun` has no `k8s-openapi` binding, so it is addressed
//! the same way the API's internal registry flow reaches for OpenShift's
//! `ImageStream`: a [`DynamicObject`] resolved from a bare group/version/kind.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::core::ApiResource;
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use serde_json::json;

use automotive_build_types::{ContainerBuild, ContainerBuildPhase, ContainerBuildSpec};
use automotive_build_utils::constants::LABEL_BUILDRUN_NAME;
use automotive_build_utils::derived_name;

use crate::error::ReconcileError;
use crate::labels::{owner_reference, standard_labels};

const BUILD_RUN_POLL: Duration = Duration::from_secs(5);

/// Everything the reconciler needs besides the object itself.
pub struct Context {
    pub client: Client,
}

const BUILD_RUN_GVK: (&str, &str, &str) = ("shipwright.io", "v1beta1", "BuildRun");

fn build_run_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk(BUILD_RUN_GVK.0, BUILD_RUN_GVK.1, BUILD_RUN_GVK.2);
    ApiResource::from_gvk(&gvk)
}

/// Name of the derived `BuildRun` for a given container build.
#[must_use]
pub fn build_run_name(build_name: &str) -> String {
    derived_name(build_name, "run")
}

/// One `--build-arg`-equivalent entry, plus the synthetic `TARGETARCH` the
/// reconciler always appends.
#[must_use]
pub fn build_run_param_values(spec: &ContainerBuildSpec) -> BTreeMap<String, String> {
    let mut params = spec.build_args.clone();
    if spec.containerfile != "Containerfile" {
        params.insert("dockerfile".to_string(), spec.containerfile.clone());
    }
    if let Some(arch) = &spec.architecture {
        params.insert("TARGETARCH".to_string(), arch.clone());
    }
    params
}

/// Compose the `BuildRun` object the reconciler submits: an inline `Build`
/// spec naming the caller's strategy, a local source, and the param values
/// above.
#[must_use]
pub fn build_run_object(build: &ContainerBuild) -> DynamicObject {
    let ar = build_run_resource();
    let name = build_run_name(&build.name_any());
    let mut object = DynamicObject::new(&name, &ar);
    object.metadata.namespace = build.namespace();
    object.metadata.labels = Some(standard_labels("build-run"));
    object.metadata.owner_references = Some(vec![owner_reference(build)]);

    let params: Vec<_> = build_run_param_values(&build.spec)
        .into_iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    let mut output = json!({ "image": build.spec.output });
    if let Some(secret) = &build.spec.push_secret_ref {
        output["pushSecret"] = json!(secret);
    }

    object.data = json!({
        "spec": {
            "build": {
                "spec": {
                    "source": {
                        "type": "Local",
                        "local": { "name": "source-local", "timeout": format!("{}m", build.spec.timeout_minutes) },
                    },
                    "strategy": { "name": build.spec.strategy, "kind": build.spec.strategy_kind },
                    "paramValues": params,
                    "output": output,
                }
            }
        }
    });
    object
}

/// Outcome of watching the build pod's `source-local` container while the
/// request sits in `Uploading`: poll until it terminates with exit 0 or a
/// non-zero code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLocalOutcome {
    StillWaiting,
    Succeeded,
    Failed(i32),
}

#[must_use]
pub fn classify_source_local_exit(exit_code: Option<i32>) -> SourceLocalOutcome {
    match exit_code {
        None => SourceLocalOutcome::StillWaiting,
        Some(0) => SourceLocalOutcome::Succeeded,
        Some(code) => SourceLocalOutcome::Failed(code),
    }
}

fn source_local_exit_code(pod: &Pod) -> Option<i32> {
    let status = pod.status.as_ref()?;
    status
        .container_statuses
        .iter()
        .flatten()
        .find(|c| c.name.contains(automotive_build_utils::constants::SOURCE_LOCAL_CONTAINER_SUBSTR))
        .and_then(|c| c.state.as_ref())
        .and_then(|s| s.terminated.as_ref())
        .map(|t| t.exit_code)
}

/// Decide the next phase from the BuildRun's `Succeeded` condition
/// (In `Building`, poll the BuildRun's `Succeeded`
/// condition).
#[must_use]
pub fn next_phase_from_build_run_condition(succeeded: Option<bool>) -> Option<ContainerBuildPhase> {
    match succeeded {
        Some(true) => Some(ContainerBuildPhase::Completed),
        Some(false) => Some(ContainerBuildPhase::Failed),
        None => None,
    }
}

fn build_run_succeeded_condition(object: &DynamicObject) -> Option<bool> {
    object
        .data
        .get("status")?
        .get("conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(serde_json::Value::as_str) == Some("Succeeded"))
        .and_then(|c| c.get("status"))
        .and_then(serde_json::Value::as_str)
        .map(|status| status == "True")
}

fn build_run_output_digest(object: &DynamicObject) -> Option<String> {
    object
        .data
        .get("status")?
        .get("output")?
        .get("digest")?
        .as_str()
        .map(str::to_string)
}

async fn transition_phase(
    api: &Api<ContainerBuild>,
    build: &ContainerBuild,
    next: ContainerBuildPhase,
    message: Option<String>,
) -> Result<(), ReconcileError> {
    let current = build.status.as_ref().map(|s| s.phase).unwrap_or_default();
    if current.is_terminal() {
        return Ok(());
    }

    tracing::info!(name = %build.name_any(), from = ?current, to = ?next, "container build phase transition");

    let mut status = json!({
        "phase": next,
        "observedGeneration": build.meta().generation.unwrap_or_default(),
    });
    if let Some(msg) = message {
        status["conditions"] = json!([{
            "type": "Ready",
            "status": if matches!(next, ContainerBuildPhase::Completed) { "True" } else { "False" },
            "reason": format!("{next:?}"),
            "message": msg,
            "lastTransitionTime": chrono::Utc::now().to_rfc3339(),
        }]);
    }

    api.patch_status(&build.name_any(), &PatchParams::apply("automotive-build-operator"), &Patch::Merge(json!({ "status": status })))
        .await?;
    Ok(())
}

async fn record_build_run_name(api: &Api<ContainerBuild>, build: &ContainerBuild, run_name: &str) -> Result<(), ReconcileError> {
    api.patch_status(
        &build.name_any(),
        &PatchParams::apply("automotive-build-operator"),
        &Patch::Merge(json!({ "status": { "buildRunName": run_name } })),
    )
    .await?;
    Ok(())
}

/// Top-level reconcile entry point, dispatching on the current phase.
pub async fn reconcile(build: Arc<ContainerBuild>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let namespace = build.namespace().unwrap_or_default();
    let api: Api<ContainerBuild> = Api::namespaced(ctx.client.clone(), &namespace);
    let phase = build.status.as_ref().map(|s| s.phase).unwrap_or_default();

    match phase {
        ContainerBuildPhase::Pending => reconcile_pending(&build, &ctx, &api).await,
        ContainerBuildPhase::Uploading => reconcile_uploading(&build, &ctx, &api).await,
        ContainerBuildPhase::Building => reconcile_building(&build, &ctx, &api).await,
        ContainerBuildPhase::Completed | ContainerBuildPhase::Failed => Ok(Action::await_change()),
    }
}

async fn reconcile_pending(build: &ContainerBuild, ctx: &Context, api: &Api<ContainerBuild>) -> Result<Action, ReconcileError> {
    let namespace = build.namespace().unwrap_or_default();
    let ar = build_run_resource();
    let runs: Api<DynamicObject> = Api::namespaced_with(ctx.client.clone(), &namespace, &ar);

    let desired = build_run_object(build);
    let name = desired.name_any();
    if runs.get(&name).await.is_err() {
        runs.create(&Default::default(), &desired).await?;
    }

    record_build_run_name(api, build, &name).await?;
    transition_phase(api, build, ContainerBuildPhase::Uploading, None).await?;
    Ok(Action::requeue(BUILD_RUN_POLL))
}

async fn reconcile_uploading(build: &ContainerBuild, ctx: &Context, api: &Api<ContainerBuild>) -> Result<Action, ReconcileError> {
    let namespace = build.namespace().unwrap_or_default();
    let Some(run_name) = build.status.as_ref().and_then(|s| s.build_run_name.clone()) else {
        return Ok(Action::requeue(BUILD_RUN_POLL));
    };

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);
    let selector = format!("{LABEL_BUILDRUN_NAME}={run_name}");
    let found = pods.list(&ListParams::default().labels(&selector)).await?;
    let Some(pod) = found.items.into_iter().next() else {
        return Ok(Action::requeue(BUILD_RUN_POLL));
    };

    match classify_source_local_exit(source_local_exit_code(&pod)) {
        SourceLocalOutcome::StillWaiting => Ok(Action::requeue(Duration::from_secs(3))),
        SourceLocalOutcome::Succeeded => {
            transition_phase(api, build, ContainerBuildPhase::Building, None).await?;
            Ok(Action::requeue(BUILD_RUN_POLL))
        }
        SourceLocalOutcome::Failed(code) => {
            transition_phase(api, build, ContainerBuildPhase::Failed, Some(format!("source upload container exited {code}"))).await?;
            Ok(Action::await_change())
        }
    }
}

async fn reconcile_building(build: &ContainerBuild, ctx: &Context, api: &Api<ContainerBuild>) -> Result<Action, ReconcileError> {
    let namespace = build.namespace().unwrap_or_default();
    let Some(run_name) = build.status.as_ref().and_then(|s| s.build_run_name.clone()) else {
        return Ok(Action::requeue(BUILD_RUN_POLL));
    };

    let ar = build_run_resource();
    let runs: Api<DynamicObject> = Api::namespaced_with(ctx.client.clone(), &namespace, &ar);
    let run = runs.get(&run_name).await?;

    match next_phase_from_build_run_condition(build_run_succeeded_condition(&run)) {
        Some(ContainerBuildPhase::Completed) => {
            if let Some(digest) = build_run_output_digest(&run) {
                api.patch_status(
                    &build.name_any(),
                    &PatchParams::apply("automotive-build-operator"),
                    &Patch::Merge(json!({ "status": { "imageDigest": digest } })),
                )
                .await?;
            }
            transition_phase(api, build, ContainerBuildPhase::Completed, None).await?;
            Ok(Action::await_change())
        }
        Some(ContainerBuildPhase::Failed) => {
            transition_phase(api, build, ContainerBuildPhase::Failed, Some("build run did not succeed".to_string())).await?;
            Ok(Action::await_change())
        }
        _ => Ok(Action::requeue(BUILD_RUN_POLL)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> ContainerBuildSpec {
        ContainerBuildSpec {
            output: "quay.io/org/app:v1".to_string(),
            containerfile: "Containerfile".to_string(),
            strategy: "buildah".to_string(),
            strategy_kind: "ClusterBuildStrategy".to_string(),
            build_args: BTreeMap::from([("FOO".to_string(), "bar".to_string())]),
            architecture: Some("arm64".to_string()),
            timeout_minutes: 30,
            push_secret_ref: None,
            use_service_account_auth: false,
            use_internal_registry: false,
        }
    }

    #[test]
    fn appends_synthetic_targetarch() {
        let params = build_run_param_values(&sample_spec());
        assert_eq!(params.get("TARGETARCH"), Some(&"arm64".to_string()));
        assert_eq!(params.get("FOO"), Some(&"bar".to_string()));
    }

    #[test]
    fn omits_dockerfile_param_when_default() {
        let params = build_run_param_values(&sample_spec());
        assert!(!params.contains_key("dockerfile"));
    }

    #[test]
    fn includes_dockerfile_param_when_nondefault() {
        let mut spec = sample_spec();
        spec.containerfile = "custom/Containerfile".to_string();
        let params = build_run_param_values(&spec);
        assert_eq!(params.get("dockerfile"), Some(&"custom/Containerfile".to_string()));
    }

    #[rstest::rstest]
    #[case(None, SourceLocalOutcome::StillWaiting)]
    #[case(Some(0), SourceLocalOutcome::Succeeded)]
    #[case(Some(1), SourceLocalOutcome::Failed(1))]
    #[case(Some(137), SourceLocalOutcome::Failed(137))]
    fn classifies_exit_codes(#[case] exit_code: Option<i32>, #[case] expected: SourceLocalOutcome) {
        assert_eq!(classify_source_local_exit(exit_code), expected);
    }

    #[test]
    fn build_run_condition_maps_to_phase() {
        assert_eq!(next_phase_from_build_run_condition(Some(true)), Some(ContainerBuildPhase::Completed));
        assert_eq!(next_phase_from_build_run_condition(Some(false)), Some(ContainerBuildPhase::Failed));
        assert_eq!(next_phase_from_build_run_condition(None), None);
    }

    #[test]
    fn build_run_name_is_deterministic() {
        assert_eq!(build_run_name("my-build"), "my-build-run");
    }

    #[test]
    fn succeeded_condition_reads_true_status() {
        let mut object = DynamicObject::new("t1-run", &build_run_resource());
        object.data = json!({ "status": { "conditions": [{ "type": "Succeeded", "status": "True" }] } });
        assert_eq!(build_run_succeeded_condition(&object), Some(true));
    }

    #[test]
    fn output_digest_reads_nested_path() {
        let mut object = DynamicObject::new("t1-run", &build_run_resource());
        object.data = json!({ "status": { "output": { "digest": "sha256:abc" } } });
        assert_eq!(build_run_output_digest(&object), Some("sha256:abc".to_string()));
    }
}
