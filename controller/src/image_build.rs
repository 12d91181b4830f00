//! `ImageBuild` reconciler: derive workspace resources,
//! drive the build through a pipeline run, and harvest its outcome.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, PersistentVolumeClaimSpec, Pod, PodSpec, Container, ResourceRequirements, VolumeResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams, PostParams};
use kube::core::ApiResource;
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use serde_json::json;

use automotive_build_types::{BuildMode, ImageBuild, ImageBuildPhase, ImageBuildSpec, OperatorConfig};
use automotive_build_utils::derived_name;

use crate::error::ReconcileError;
use crate::labels::{owner_reference, standard_labels};

const UPLOAD_POD_READY_TIMEOUT: Duration = Duration::from_secs(120);

/// Everything the reconciler needs besides the object itself. `config` sits
/// behind a pointer swap so a ConfigMap update takes effect without
/// restarting the watch loop.
pub struct Context {
    pub client: Client,
    pub config: RwLock<Arc<OperatorConfig>>,
}

impl Context {
    #[must_use]
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        Self { client, config: RwLock::new(Arc::new(config)) }
    }

    #[must_use]
    pub fn config(&self) -> Arc<OperatorConfig> {
        self.config.read().expect("config lock poisoned").clone()
    }

    pub fn reload_config(&self, config: OperatorConfig) {
        *self.config.write().expect("config lock poisoned") = Arc::new(config);
    }
}

/// Name of the derived workspace PVC for a given build.
#[must_use]
pub fn workspace_pvc_name(build_name: &str) -> String {
    derived_name(build_name, "workspace")
}

/// Name of the derived manifest `ConfigMap`.
#[must_use]
pub fn manifest_configmap_name(build_name: &str) -> String {
    derived_name(build_name, "manifest")
}

/// Name of the upload pod created while `Status.Phase == Uploading`.
#[must_use]
pub fn upload_pod_name(build_name: &str) -> String {
    derived_name(build_name, "upload")
}

/// Name of the artifact pod created on completion when `ServeArtifact` is set.
#[must_use]
pub fn artifact_pod_name(build_name: &str) -> String {
    derived_name(build_name, "artifact")
}

/// Build the workspace PVC created on entry into `Pending`.
#[must_use]
pub fn build_workspace_pvc(build: &ImageBuild, default_size: &str) -> PersistentVolumeClaim {
    let mut requests = BTreeMap::new();
    let size = build
        .spec
        .storage_class
        .as_ref()
        .map(|_| default_size.to_string())
        .unwrap_or_else(|| default_size.to_string());
    requests.insert("storage".to_string(), Quantity(size));

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(workspace_pvc_name(&build.name_any())),
            namespace: build.namespace(),
            labels: Some(standard_labels("workspace")),
            owner_references: Some(vec![owner_reference(build)]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: build.spec.storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}

/// Build the manifest `ConfigMap`: the manifest content under its file name,
/// plus `custom-definitions.env` and `aib-extra-args.txt`.
#[must_use]
pub fn build_manifest_configmap(build: &ImageBuild) -> ConfigMap {
    let manifest_file_name = build
        .spec
        .manifest_file_name
        .clone()
        .unwrap_or_else(|| "manifest.aib.yml".to_string());

    let mut data = BTreeMap::new();
    if let Some(manifest) = &build.spec.manifest {
        data.insert(manifest_file_name, manifest.clone());
    }
    data.insert("custom-definitions.env".to_string(), build.spec.custom_defs.join("\n"));
    data.insert("aib-extra-args.txt".to_string(), build.spec.aib_extra_args.join("\n"));

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(manifest_configmap_name(&build.name_any())),
            namespace: build.namespace(),
            labels: Some(standard_labels("manifest")),
            owner_references: Some(vec![owner_reference(build)]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

const WAITER_IMAGE: &str = "registry.access.redhat.com/ubi9/ubi-minimal:latest";

/// Build the sleep-forever upload pod mounting the workspace PVC
/// read-write.
#[must_use]
pub fn build_upload_pod(build: &ImageBuild) -> Pod {
    sleep_forever_pod(build, &upload_pod_name(&build.name_any()), "upload-pod", false)
}

/// Build the sleep-forever artifact pod mounting the workspace PVC
/// read-only.
#[must_use]
pub fn build_artifact_pod(build: &ImageBuild) -> Pod {
    sleep_forever_pod(build, &artifact_pod_name(&build.name_any()), "artifact-pod", true)
}

fn sleep_forever_pod(build: &ImageBuild, pod_name: &str, resource_type: &str, read_only: bool) -> Pod {
    use k8s_openapi::api::core::v1::{PersistentVolumeClaimVolumeSource, Volume, VolumeMount};

    let pvc_name = workspace_pvc_name(&build.name_any());
    Pod {
        metadata: ObjectMeta {
            name: Some(pod_name.to_string()),
            namespace: build.namespace(),
            labels: Some(standard_labels(resource_type)),
            owner_references: Some(vec![owner_reference(build)]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name: "waiter".to_string(),
                image: Some(WAITER_IMAGE.to_string()),
                command: Some(vec!["sleep".to_string(), "infinity".to_string()]),
                volume_mounts: Some(vec![VolumeMount {
                    name: "workspace".to_string(),
                    mount_path: "/workspace/source".to_string(),
                    read_only: Some(read_only),
                    ..Default::default()
                }]),
                resources: Some(ResourceRequirements::default()),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: "workspace".to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: pvc_name,
                    read_only: Some(read_only),
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// The export extension used for `ArtifactFileName` on completion: `raw`
/// for `image` mode, `qcow2` for `qcow2` export, otherwise the export
/// format verbatim.
#[must_use]
pub fn artifact_extension(mode: BuildMode, export_format: &str) -> String {
    match mode {
        BuildMode::Image => "raw".to_string(),
        _ if export_format == "qcow2" => "qcow2".to_string(),
        _ => export_format.to_string(),
    }
}

#[must_use]
pub fn derive_artifact_file_name(spec: &ImageBuildSpec) -> String {
    format!(
        "{}-{}.{}",
        spec.distro,
        spec.target,
        artifact_extension(spec.mode, &spec.export_format)
    )
}

/// Whether the build has a push task, counted toward progress aggregation
/// alongside the flash task.
#[must_use]
pub fn has_push_task(spec: &ImageBuildSpec) -> bool {
    spec.container_push.is_some() || spec.export_oci.is_some()
}

#[must_use]
pub fn has_flash_task(spec: &ImageBuildSpec) -> bool {
    spec.flash_enabled
}

const PIPELINE_RUN_GVK: (&str, &str, &str) = ("tekton.dev", "v1", "PipelineRun");
const PIPELINE_RUN_POLL: Duration = Duration::from_secs(5);
const PUSH_TASK_NAME: &str = "push-disk-artifact";
const FLASH_TASK_NAME: &str = "flash-image";

fn pipeline_run_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk(PIPELINE_RUN_GVK.0, PIPELINE_RUN_GVK.1, PIPELINE_RUN_GVK.2);
    ApiResource::from_gvk(&gvk)
}

/// Name of the derived Tekton `PipelineRun` for a given build.
#[must_use]
pub fn pipeline_run_name(build_name: &str) -> String {
    derived_name(build_name, "run")
}

/// The cluster `Pipeline` to reference: disk builds go through the
/// flash-capable pipeline, everything else through the general one.
#[must_use]
pub fn pipeline_name_for(spec: &ImageBuildSpec) -> &'static str {
    match spec.mode {
        BuildMode::Disk => "automotive-image-builder-disk",
        _ => "automotive-image-builder",
    }
}

/// Compose the `PipelineRun` object the reconciler submits on entering
/// `Building`: the manifest `ConfigMap` and workspace PVC built earlier are
/// threaded through as a param and a workspace binding.
#[must_use]
pub fn build_pipeline_run_object(build: &ImageBuild) -> DynamicObject {
    let ar = pipeline_run_resource();
    let name = pipeline_run_name(&build.name_any());
    let mut object = DynamicObject::new(&name, &ar);
    object.metadata.namespace = build.namespace();
    object.metadata.labels = Some(standard_labels("pipeline-run"));
    object.metadata.owner_references = Some(vec![owner_reference(build)]);

    let params = vec![
        json!({ "name": "distro", "value": build.spec.distro }),
        json!({ "name": "target", "value": build.spec.target }),
        json!({ "name": "export-format", "value": build.spec.export_format }),
        json!({ "name": "manifest-config-map", "value": manifest_configmap_name(&build.name_any()) }),
    ];

    object.data = json!({
        "spec": {
            "pipelineRef": { "name": pipeline_name_for(&build.spec) },
            "params": params,
            "workspaces": [
                { "name": "source", "persistentVolumeClaim": { "claimName": workspace_pvc_name(&build.name_any()) } }
            ],
        }
    });
    object
}

fn pipeline_run_succeeded_condition(object: &DynamicObject) -> Option<(String, String)> {
    object
        .data
        .get("status")?
        .get("conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(serde_json::Value::as_str) == Some("Succeeded"))
        .map(|c| {
            let status = c.get("status").and_then(serde_json::Value::as_str).unwrap_or("Unknown").to_string();
            let message = c.get("message").and_then(serde_json::Value::as_str).unwrap_or_default().to_string();
            (status, message)
        })
}

/// Names of the pipeline's child tasks that have already succeeded, read
/// from `status.childReferences`.
fn completed_task_names(object: &DynamicObject) -> Vec<String> {
    object
        .data
        .get("status")
        .and_then(|s| s.get("childReferences"))
        .and_then(serde_json::Value::as_array)
        .map(|refs| {
            refs.iter()
                .filter(|r| r.get("reason").and_then(serde_json::Value::as_str) == Some("Succeeded"))
                .filter_map(|r| r.get("pipelineTaskName").and_then(serde_json::Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Advance through the non-terminal sub-phases while the pipeline run's
/// `Succeeded` condition is still `Unknown`: `Running` holds until the push
/// task (if any) completes, then `Pushing` holds until the flash task (if
/// any) completes, skipping whichever stage the build doesn't need.
#[must_use]
pub fn next_running_phase(current: ImageBuildPhase, spec: &ImageBuildSpec, completed_tasks: &[String]) -> ImageBuildPhase {
    let push_done = completed_tasks.iter().any(|t| t == PUSH_TASK_NAME);
    let flash_done = completed_tasks.iter().any(|t| t == FLASH_TASK_NAME);

    if matches!(current, ImageBuildPhase::Running) && has_push_task(spec) && push_done {
        return ImageBuildPhase::Pushing;
    }
    if matches!(current, ImageBuildPhase::Running | ImageBuildPhase::Pushing) && has_flash_task(spec) && (!has_push_task(spec) || push_done) && flash_done {
        return ImageBuildPhase::Flashing;
    }
    current
}

/// Idempotently ensure a namespaced object exists, creating it if absent.
async fn ensure_exists<K>(api: &Api<K>, name: &str, desired: &K) -> Result<(), ReconcileError>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + serde::Serialize + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(resp)) if resp.code == 404 => {
            api.create(&PostParams::default(), desired).await?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Patch `status.phase`, checking that the phase never regresses out of a
/// terminal state before writing.
pub async fn transition_phase(
    api: &Api<ImageBuild>,
    build: &ImageBuild,
    next: ImageBuildPhase,
    message: Option<String>,
) -> Result<(), ReconcileError> {
    let current = build.status.as_ref().map(|s| s.phase).unwrap_or_default();
    if !current.can_transition_to(next) {
        return Ok(());
    }

    tracing::info!(
        name = %build.name_any(),
        from = ?current,
        to = ?next,
        "image build phase transition"
    );

    let patch = serde_json::json!({
        "status": {
            "phase": next,
            "message": message,
            "observedGeneration": build.meta().generation.unwrap_or_default(),
        }
    });
    api.patch_status(
        &build.name_any(),
        &PatchParams::apply("automotive-build-operator"),
        &Patch::Merge(patch),
    )
    .await?;
    Ok(())
}

/// Top-level reconcile entry point, dispatching on the current phase.
pub async fn reconcile(build: Arc<ImageBuild>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    if let Err(reason) = build.spec.validate_source() {
        let api: Api<ImageBuild> =
            Api::namespaced(ctx.client.clone(), &build.namespace().unwrap_or_default());
        transition_phase(&api, &build, ImageBuildPhase::Failed, Some(reason)).await?;
        return Ok(Action::await_change());
    }

    let phase = build.status.as_ref().map(|s| s.phase).unwrap_or_default();
    let api: Api<ImageBuild> = Api::namespaced(ctx.client.clone(), &build.namespace().unwrap_or_default());

    match phase {
        ImageBuildPhase::Empty | ImageBuildPhase::Pending => reconcile_pending(&build, &ctx, &api).await,
        ImageBuildPhase::Uploading => reconcile_uploading(&build, &ctx, &api).await,
        ImageBuildPhase::Building => reconcile_building(&build, &ctx, &api).await,
        ImageBuildPhase::Running | ImageBuildPhase::Pushing | ImageBuildPhase::Flashing => {
            reconcile_pipeline_progress(&build, &ctx, &api).await
        }
        ImageBuildPhase::Completed | ImageBuildPhase::Failed => Ok(Action::await_change()),
    }
}

async fn reconcile_pending(
    build: &ImageBuild,
    ctx: &Context,
    api: &Api<ImageBuild>,
) -> Result<Action, ReconcileError> {
    let namespace = build.namespace().unwrap_or_default();
    let pvc_api: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), &namespace);
    let cm_api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &namespace);

    let pvc = build_workspace_pvc(build, &ctx.config().pvc_size);
    ensure_exists(&pvc_api, &pvc.name_any(), &pvc).await?;

    let cm = build_manifest_configmap(build);
    ensure_exists(&cm_api, &cm.name_any(), &cm).await?;

    if build.spec.input_files_server {
        transition_phase(api, build, ImageBuildPhase::Uploading, None).await?;
    } else {
        transition_phase(api, build, ImageBuildPhase::Building, None).await?;
    }
    Ok(Action::requeue(Duration::from_secs(5)))
}

async fn reconcile_uploading(
    build: &ImageBuild,
    ctx: &Context,
    api: &Api<ImageBuild>,
) -> Result<Action, ReconcileError> {
    let namespace = build.namespace().unwrap_or_default();
    let pod_api: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);
    let pod = build_upload_pod(build);
    ensure_exists(&pod_api, &pod.name_any(), &pod).await?;

    let uploads_complete = build
        .annotations()
        .get(automotive_build_utils::constants::ANNOTATION_UPLOADS_COMPLETE)
        .is_some();

    if uploads_complete {
        transition_phase(api, build, ImageBuildPhase::Building, None).await?;
        return Ok(Action::requeue(Duration::from_secs(5)));
    }

    let started_at = build
        .status
        .as_ref()
        .and_then(|s| s.start_time)
        .unwrap_or_else(chrono::Utc::now);
    if (chrono::Utc::now() - started_at).to_std().unwrap_or_default() > UPLOAD_POD_READY_TIMEOUT {
        transition_phase(
            api,
            build,
            ImageBuildPhase::Failed,
            Some("upload pod did not become ready within 2 minutes".to_string()),
        )
        .await?;
        return Ok(Action::await_change());
    }

    Ok(Action::requeue(Duration::from_secs(3)))
}

/// Entry into `Building`: construct the pipeline run, create it, and record
/// its name and start time before moving on to watch it run.
async fn reconcile_building(build: &ImageBuild, ctx: &Context, api: &Api<ImageBuild>) -> Result<Action, ReconcileError> {
    let namespace = build.namespace().unwrap_or_default();
    let ar = pipeline_run_resource();
    let runs: Api<DynamicObject> = Api::namespaced_with(ctx.client.clone(), &namespace, &ar);

    let desired = build_pipeline_run_object(build);
    let name = desired.name_any();
    ensure_exists(&runs, &name, &desired).await?;

    api.patch_status(
        &build.name_any(),
        &PatchParams::apply("automotive-build-operator"),
        &Patch::Merge(json!({
            "status": {
                "pipelineRunName": name,
                "startTime": chrono::Utc::now(),
            }
        })),
    )
    .await?;
    transition_phase(api, build, ImageBuildPhase::Running, None).await?;
    Ok(Action::requeue(PIPELINE_RUN_POLL))
}

/// Watch the pipeline run while in `Running`/`Pushing`/`Flashing`: step
/// through the sub-phases as tasks complete, and harvest the terminal
/// outcome once the `Succeeded` condition resolves.
async fn reconcile_pipeline_progress(build: &ImageBuild, ctx: &Context, api: &Api<ImageBuild>) -> Result<Action, ReconcileError> {
    let namespace = build.namespace().unwrap_or_default();
    let Some(run_name) = build.status.as_ref().and_then(|s| s.pipeline_run_name.clone()) else {
        return Ok(Action::requeue(PIPELINE_RUN_POLL));
    };

    let ar = pipeline_run_resource();
    let runs: Api<DynamicObject> = Api::namespaced_with(ctx.client.clone(), &namespace, &ar);
    let run = runs.get(&run_name).await?;

    let current = build.status.as_ref().map(|s| s.phase).unwrap_or_default();
    match pipeline_run_succeeded_condition(&run) {
        Some((status, _)) if status == "True" => finalize_completed(ctx, build, api).await,
        Some((status, message)) if status == "False" => {
            transition_phase(api, build, ImageBuildPhase::Failed, Some(message)).await?;
            Ok(Action::await_change())
        }
        _ => {
            let completed_tasks = completed_task_names(&run);
            let next = next_running_phase(current, &build.spec, &completed_tasks);
            if next != current {
                transition_phase(api, build, next, None).await?;
            }
            Ok(Action::requeue(PIPELINE_RUN_POLL))
        }
    }
}

async fn finalize_completed(ctx: &Context, build: &ImageBuild, api: &Api<ImageBuild>) -> Result<Action, ReconcileError> {
    let current = build.status.as_ref().map(|s| s.phase).unwrap_or_default();
    if !current.can_transition_to(ImageBuildPhase::Completed) {
        return Ok(Action::await_change());
    }

    tracing::info!(name = %build.name_any(), from = ?current, to = ?ImageBuildPhase::Completed, "image build phase transition");
    api.patch_status(
        &build.name_any(),
        &PatchParams::apply("automotive-build-operator"),
        &Patch::Merge(json!({
            "status": {
                "phase": ImageBuildPhase::Completed,
                "completionTime": chrono::Utc::now(),
                "artifactFileName": derive_artifact_file_name(&build.spec),
                "observedGeneration": build.meta().generation.unwrap_or_default(),
            }
        })),
    )
    .await?;

    if build.spec.serve_artifact {
        let namespace = build.namespace().unwrap_or_default();
        let pod_api: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);
        let pod = build_artifact_pod(build);
        ensure_exists(&pod_api, &pod.name_any(), &pod).await?;
    }

    Ok(Action::await_change())
}

#[cfg(test)]
mod tests {
    use super::*;
    use automotive_build_types::{ImageBuildSpec, ImageBuildStatus};

    fn sample_build(phase: ImageBuildPhase) -> ImageBuild {
        ImageBuild {
            metadata: ObjectMeta {
                name: Some("t1".to_string()),
                namespace: Some("ns".to_string()),
                uid: Some("abc-123".to_string()),
                generation: Some(1),
                ..Default::default()
            },
            spec: ImageBuildSpec {
                mode: BuildMode::Bootc,
                distro: "autosd".to_string(),
                target: "qemu".to_string(),
                architecture: Some("amd64".to_string()),
                export_format: "qcow2".to_string(),
                manifest: Some("content: {}".to_string()),
                manifest_file_name: None,
                container_ref: None,
                container_push: None,
                export_oci: None,
                build_disk_image: false,
                builder_image: None,
                storage_class: None,
                custom_defs: vec!["FOO=bar".to_string()],
                aib_extra_args: vec!["--verbose".to_string()],
                publishers: vec![],
                serve_artifact: false,
                input_files_server: false,
                flash_enabled: false,
            },
            status: Some(ImageBuildStatus {
                phase,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn workspace_pvc_is_owned_and_named_deterministically() {
        let build = sample_build(ImageBuildPhase::Pending);
        let pvc = build_workspace_pvc(&build, "8Gi");
        assert_eq!(pvc.metadata.name.as_deref(), Some("t1-workspace"));
        assert_eq!(pvc.metadata.owner_references.unwrap()[0].name, "t1");
    }

    #[test]
    fn manifest_configmap_joins_custom_defs_and_extra_args() {
        let build = sample_build(ImageBuildPhase::Pending);
        let cm = build_manifest_configmap(&build);
        let data = cm.data.unwrap();
        assert_eq!(data.get("custom-definitions.env").unwrap(), "FOO=bar");
        assert_eq!(data.get("aib-extra-args.txt").unwrap(), "--verbose");
        assert!(data.contains_key("manifest.aib.yml"));
    }

    #[test]
    fn artifact_file_name_uses_raw_for_image_mode() {
        let mut build = sample_build(ImageBuildPhase::Pending);
        build.spec.mode = BuildMode::Image;
        assert_eq!(derive_artifact_file_name(&build.spec), "autosd-qemu.raw");
    }

    #[test]
    fn artifact_file_name_uses_export_format_otherwise() {
        let mut build = sample_build(ImageBuildPhase::Pending);
        build.spec.export_format = "tar.gz".to_string();
        assert_eq!(derive_artifact_file_name(&build.spec), "autosd-qemu.tar.gz");
    }

    #[test]
    fn pipeline_run_object_references_workspace_and_manifest() {
        let build = sample_build(ImageBuildPhase::Building);
        let run = build_pipeline_run_object(&build);
        assert_eq!(run.name_any(), "t1-run");
        let workspaces = run.data["spec"]["workspaces"].as_array().unwrap();
        assert_eq!(workspaces[0]["persistentVolumeClaim"]["claimName"], "t1-workspace");
    }

    #[test]
    fn disk_mode_selects_the_flash_capable_pipeline() {
        let mut build = sample_build(ImageBuildPhase::Building);
        build.spec.mode = BuildMode::Disk;
        assert_eq!(pipeline_name_for(&build.spec), "automotive-image-builder-disk");
    }

    #[test]
    fn running_advances_to_pushing_once_push_task_completes() {
        let mut spec = sample_build(ImageBuildPhase::Running).spec;
        spec.container_push = Some(automotive_build_types::RegistryDestination {
            reference: "quay.io/org/img:v1".to_string(),
            secret_ref: None,
        });
        let completed = vec![PUSH_TASK_NAME.to_string()];
        assert_eq!(next_running_phase(ImageBuildPhase::Running, &spec, &completed), ImageBuildPhase::Pushing);
    }

    #[test]
    fn running_skips_straight_to_flashing_without_a_push_task() {
        let mut spec = sample_build(ImageBuildPhase::Running).spec;
        spec.flash_enabled = true;
        let completed = vec![FLASH_TASK_NAME.to_string()];
        assert_eq!(next_running_phase(ImageBuildPhase::Running, &spec, &completed), ImageBuildPhase::Flashing);
    }

    #[test]
    fn running_holds_until_its_task_completes() {
        let spec = sample_build(ImageBuildPhase::Running).spec;
        assert_eq!(next_running_phase(ImageBuildPhase::Running, &spec, &[]), ImageBuildPhase::Running);
    }

    #[test]
    fn succeeded_condition_reads_status_and_message() {
        let mut object = DynamicObject::new("t1-run", &pipeline_run_resource());
        object.data = json!({ "status": { "conditions": [{ "type": "Succeeded", "status": "False", "message": "task push-disk-artifact failed" }] } });
        assert_eq!(
            pipeline_run_succeeded_condition(&object),
            Some(("False".to_string(), "task push-disk-artifact failed".to_string()))
        );
    }

    #[test]
    fn completed_task_names_reads_succeeded_child_references() {
        let mut object = DynamicObject::new("t1-run", &pipeline_run_resource());
        object.data = json!({
            "status": {
                "childReferences": [
                    { "pipelineTaskName": "build-image", "reason": "Succeeded" },
                    { "pipelineTaskName": "push-disk-artifact", "reason": "Running" },
                ]
            }
        });
        assert_eq!(completed_task_names(&object), vec!["build-image".to_string()]);
    }
}
