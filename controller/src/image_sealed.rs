//! `ImageSealed` reconciler: a one-shot TaskRun per bootc
//! secure-boot key lifecycle step, sharing a single managed Task definition
//! across every `ImageSealed` in the cluster.
//!
//! Tekton's `Task`/`TaskRun` kinds have no `k8s-openapi` binding, so both
//! are addressed as [`DynamicObject`]s, the same idiom the API's internal
//! registry flow uses for OpenShift's `ImageStream`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::core::ApiResource;
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use serde_json::json;

use automotive_build_types::{ImageSealed, ImageSealedPhase, ImageSealedSpec};
use automotive_build_utils::constants::LABEL_TASK_MANAGED_BY;
use automotive_build_utils::derived_name;

use crate::error::ReconcileError;
use crate::labels::{owner_reference, standard_labels};

const TASK_RUN_POLL: Duration = Duration::from_secs(5);
const MANAGED_BY_VALUE: &str = "automotive-build-operator";

/// The cluster-wide shared Task name every `ImageSealed` references.
pub const SHARED_TASK_NAME: &str = "automotive-image-seal";

const TASK_GVK: (&str, &str, &str) = ("tekton.dev", "v1", "Task");
const TASK_RUN_GVK: (&str, &str, &str) = ("tekton.dev", "v1", "TaskRun");

fn task_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(TASK_GVK.0, TASK_GVK.1, TASK_GVK.2))
}

fn task_run_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(TASK_RUN_GVK.0, TASK_RUN_GVK.1, TASK_RUN_GVK.2))
}

/// Name of the derived TaskRun for a given `ImageSealed`.
#[must_use]
pub fn task_run_name(sealed_name: &str) -> String {
    derived_name(sealed_name, "seal")
}

/// Params mapped one-to-one from the request spec onto the TaskRun.
#[must_use]
pub fn task_run_params(spec: &ImageSealedSpec) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("operation".to_string(), operation_str(spec).to_string());
    params.insert("input-ref".to_string(), spec.input_ref.clone());
    insert_optional(&mut params, "output-ref", &spec.output_ref);
    insert_optional(&mut params, "signed-ref", &spec.signed_ref);
    insert_optional(&mut params, "aib-image", &spec.aib_image);
    insert_optional(&mut params, "builder-image", &spec.builder_image);
    insert_optional(&mut params, "architecture", &spec.architecture);
    params
}

fn insert_optional(params: &mut BTreeMap<String, String>, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        params.insert(key.to_string(), value.clone());
    }
}

fn operation_str(spec: &ImageSealedSpec) -> &'static str {
    use automotive_build_types::SealedOperation as Op;
    match spec.operation {
        Op::PrepareReseal => "prepare-reseal",
        Op::Reseal => "reseal",
        Op::ExtractForSigning => "extract-for-signing",
        Op::InjectSigned => "inject-signed",
    }
}

/// Whether the reconciler may (re)write the shared sealed Task definition:
/// only when it either doesn't exist yet, or already carries the
/// operator's managed-by label, so an unmanaged Task of the same name is
/// never overwritten.
#[must_use]
pub fn may_write_shared_task(existing_labels: Option<&BTreeMap<String, String>>) -> bool {
    match existing_labels {
        None => true,
        Some(labels) => labels.get(LABEL_TASK_MANAGED_BY).is_some(),
    }
}

/// Compose the shared sealed Task definition: one step whose image is the
/// caller's `BuilderImage` (falling back to `AibImage`), driven entirely by
/// its params.
#[must_use]
pub fn shared_task_object(namespace: &str) -> DynamicObject {
    let ar = task_resource();
    let mut object = DynamicObject::new(SHARED_TASK_NAME, &ar);
    object.metadata.namespace = Some(namespace.to_string());
    let mut labels = standard_labels("sealed-task");
    labels.insert(LABEL_TASK_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());
    object.metadata.labels = Some(labels);

    let param_names = ["operation", "input-ref", "output-ref", "signed-ref", "aib-image", "builder-image", "architecture"];
    object.data = json!({
        "spec": {
            "params": param_names.iter().map(|name| json!({ "name": name, "type": "string", "default": "" })).collect::<Vec<_>>(),
            "workspaces": [
                { "name": "shared" },
                { "name": "registry-auth", "optional": true },
            ],
            "steps": [{
                "name": "seal",
                "image": "$(params.builder-image)",
                "script": "exec automotive-image-seal \"$(params.operation)\" \"$(params.input-ref)\"",
            }],
        }
    });
    object
}

/// Compose the TaskRun for an `ImageSealed`: params mapped
/// one-to-one, a shared empty workspace, and an optional registry-auth
/// workspace bound to `SecretRef`.
#[must_use]
pub fn build_task_run_object(sealed: &ImageSealed) -> DynamicObject {
    let ar = task_run_resource();
    let name = task_run_name(&sealed.name_any());
    let mut object = DynamicObject::new(&name, &ar);
    object.metadata.namespace = sealed.namespace();
    object.metadata.labels = Some(standard_labels("task-run"));
    object.metadata.owner_references = Some(vec![owner_reference(sealed)]);

    let params: Vec<_> = task_run_params(&sealed.spec)
        .into_iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    let mut workspaces = vec![json!({ "name": "shared", "emptyDir": {} })];
    if let Some(secret) = &sealed.spec.secret_ref {
        workspaces.push(json!({ "name": "registry-auth", "secret": { "secretName": secret } }));
    }

    object.data = json!({
        "spec": {
            "taskRef": { "name": SHARED_TASK_NAME },
            "params": params,
            "workspaces": workspaces,
        }
    });
    object
}

fn task_run_succeeded_condition(object: &DynamicObject) -> Option<bool> {
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

/// Everything the reconciler needs besides the object itself.
pub struct Context {
    pub client: Client,
}

async fn transition_phase(
    api: &Api<ImageSealed>,
    sealed: &ImageSealed,
    next: ImageSealedPhase,
    message: Option<String>,
) -> Result<(), ReconcileError> {
    let current = sealed.status.as_ref().map(|s| s.phase).unwrap_or_default();
    if matches!(current, ImageSealedPhase::Completed | ImageSealedPhase::Failed) {
        return Ok(());
    }

    tracing::info!(name = %sealed.name_any(), from = ?current, to = ?next, "image sealed phase transition");

    api.patch_status(
        &sealed.name_any(),
        &PatchParams::apply("automotive-build-operator"),
        &Patch::Merge(json!({
            "status": {
                "phase": next,
                "message": message,
                "observedGeneration": sealed.meta().generation.unwrap_or_default(),
            }
        })),
    )
    .await?;
    Ok(())
}

/// Top-level reconcile entry point, dispatching on the current phase
/// (One-shot).
pub async fn reconcile(sealed: Arc<ImageSealed>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let namespace = sealed.namespace().unwrap_or_default();
    let api: Api<ImageSealed> = Api::namespaced(ctx.client.clone(), &namespace);
    let phase = sealed.status.as_ref().map(|s| s.phase).unwrap_or_default();

    match phase {
        ImageSealedPhase::Pending => reconcile_pending(&sealed, &ctx, &api).await,
        ImageSealedPhase::Running => reconcile_running(&sealed, &ctx, &api).await,
        ImageSealedPhase::Completed | ImageSealedPhase::Failed => Ok(Action::await_change()),
    }
}

async fn reconcile_pending(sealed: &ImageSealed, ctx: &Context, api: &Api<ImageSealed>) -> Result<Action, ReconcileError> {
    let namespace = sealed.namespace().unwrap_or_default();
    let ar = task_resource();
    let tasks: Api<DynamicObject> = Api::namespaced_with(ctx.client.clone(), &namespace, &ar);

    let existing_labels = tasks.get(SHARED_TASK_NAME).await.ok().and_then(|t| t.metadata.labels);
    if !may_write_shared_task(existing_labels.as_ref()) {
        transition_phase(api, sealed, ImageSealedPhase::Failed, Some("sealed task exists but is not operator-managed".to_string())).await?;
        return Ok(Action::await_change());
    }
    if existing_labels.is_none() {
        tasks
            .patch(SHARED_TASK_NAME, &PatchParams::apply("automotive-build-operator"), &Patch::Apply(&shared_task_object(&namespace)))
            .await?;
    }

    let ar = task_run_resource();
    let runs: Api<DynamicObject> = Api::namespaced_with(ctx.client.clone(), &namespace, &ar);
    let desired = build_task_run_object(sealed);
    let name = desired.name_any();
    if runs.get(&name).await.is_err() {
        runs.create(&Default::default(), &desired).await?;
    }

    api.patch_status(
        &sealed.name_any(),
        &PatchParams::apply("automotive-build-operator"),
        &Patch::Merge(json!({ "status": { "taskRunName": name } })),
    )
    .await?;
    transition_phase(api, sealed, ImageSealedPhase::Running, None).await?;
    Ok(Action::requeue(TASK_RUN_POLL))
}

async fn reconcile_running(sealed: &ImageSealed, ctx: &Context, api: &Api<ImageSealed>) -> Result<Action, ReconcileError> {
    let namespace = sealed.namespace().unwrap_or_default();
    let Some(run_name) = sealed.status.as_ref().and_then(|s| s.task_run_name.clone()) else {
        return Ok(Action::requeue(TASK_RUN_POLL));
    };

    let ar = task_run_resource();
    let runs: Api<DynamicObject> = Api::namespaced_with(ctx.client.clone(), &namespace, &ar);
    let run = runs.get(&run_name).await?;

    match task_run_succeeded_condition(&run) {
        Some(true) => {
            api.patch_status(
                &sealed.name_any(),
                &PatchParams::apply("automotive-build-operator"),
                &Patch::Merge(json!({ "status": { "outputRef": sealed.spec.output_ref } })),
            )
            .await?;
            transition_phase(api, sealed, ImageSealedPhase::Completed, None).await?;
            Ok(Action::await_change())
        }
        Some(false) => {
            transition_phase(api, sealed, ImageSealedPhase::Failed, Some("task run did not succeed".to_string())).await?;
            Ok(Action::await_change())
        }
        None => Ok(Action::requeue(TASK_RUN_POLL)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automotive_build_types::SealedOperation;

    fn sample_spec() -> ImageSealedSpec {
        ImageSealedSpec {
            operation: SealedOperation::Reseal,
            input_ref: "quay.io/org/img:v1".to_string(),
            output_ref: Some("quay.io/org/img:v2".to_string()),
            signed_ref: None,
            aib_image: None,
            builder_image: None,
            architecture: Some("amd64".to_string()),
            secret_ref: Some("registry-auth".to_string()),
            key_content: None,
            key_password: None,
            key_secret_ref: None,
        }
    }

    #[test]
    fn maps_operation_to_kebab_case() {
        let params = task_run_params(&sample_spec());
        assert_eq!(params.get("operation"), Some(&"reseal".to_string()));
    }

    #[test]
    fn omits_absent_optional_fields() {
        let params = task_run_params(&sample_spec());
        assert!(!params.contains_key("signed-ref"));
        assert_eq!(params.get("output-ref"), Some(&"quay.io/org/img:v2".to_string()));
    }

    #[test]
    fn refuses_to_overwrite_unmanaged_task() {
        let foreign = BTreeMap::from([("owner".to_string(), "someone-else".to_string())]);
        assert!(!may_write_shared_task(Some(&foreign)));
    }

    #[test]
    fn writes_when_absent_or_self_managed() {
        assert!(may_write_shared_task(None));
        let managed = BTreeMap::from([(LABEL_TASK_MANAGED_BY.to_string(), "automotive-build-operator".to_string())]);
        assert!(may_write_shared_task(Some(&managed)));
    }

    #[test]
    fn task_run_name_is_deterministic() {
        assert_eq!(task_run_name("my-reseal"), "my-reseal-seal");
    }

    #[test]
    fn task_run_workspaces_include_registry_auth_when_secret_ref_set() {
        let sealed = ImageSealed {
            metadata: Default::default(),
            spec: sample_spec(),
            status: None,
        };
        let run = build_task_run_object(&sealed);
        let workspaces = run.data["spec"]["workspaces"].as_array().unwrap();
        assert_eq!(workspaces.len(), 2);
    }

    #[test]
    fn succeeded_condition_reads_true_status() {
        let mut object = DynamicObject::new("t1-seal", &task_run_resource());
        object.data = json!({ "status": { "conditions": [{ "type": "Succeeded", "status": "True" }] } });
        assert_eq!(task_run_succeeded_condition(&object), Some(true));
    }
}
