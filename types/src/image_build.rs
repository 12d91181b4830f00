//! `ImageBuild` — a request to build an automotive OS image: bootc, raw
//! disk image, package set, or flashable disk.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::{Publisher, RegistryDestination};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Bootc,
    Image,
    Package,
    Disk,
}

impl BuildMode {
    #[must_use]
    pub fn requires_container_ref(self) -> bool {
        matches!(self, Self::Disk)
    }
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "automotive.sdv.cloud.redhat.com",
    version = "v1alpha1",
    kind = "ImageBuild",
    plural = "imagebuilds",
    namespaced,
    status = "ImageBuildStatus",
    shortname = "ib"
)]
#[serde(rename_all = "camelCase")]
pub struct ImageBuildSpec {
    pub mode: BuildMode,
    #[serde(default = "default_distro")]
    pub distro: String,
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default = "default_export_format")]
    pub export_format: String,
    /// Inline manifest content. Mutually exclusive with `container_ref`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    /// Name of the manifest file placed in the derived `ConfigMap`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_file_name: Option<String>,
    /// Container image to use as the build input. Required when
    /// `mode == Disk`, forbidden otherwise (`manifest` XOR `container_ref`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_push: Option<RegistryDestination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_oci: Option<RegistryDestination>,
    #[serde(default)]
    pub build_disk_image: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(default)]
    pub custom_defs: Vec<String>,
    #[serde(default)]
    pub aib_extra_args: Vec<String>,
    #[serde(default)]
    pub publishers: Vec<Publisher>,
    #[serde(default)]
    pub serve_artifact: bool,
    #[serde(default)]
    pub input_files_server: bool,
    #[serde(default)]
    pub flash_enabled: bool,
}

fn default_distro() -> String {
    "autosd".to_string()
}

fn default_target() -> String {
    "qemu".to_string()
}

fn default_export_format() -> String {
    "qcow2".to_string()
}

impl ImageBuildSpec {
    /// Enforce the `Manifest` XOR `ContainerRef` invariant, and that
    /// `container_ref` is present whenever the mode requires it.
    pub fn validate_source(&self) -> Result<(), String> {
        let has_manifest = self.manifest.is_some();
        let has_container_ref = self.container_ref.is_some();

        if self.mode.requires_container_ref() && !has_container_ref {
            return Err("mode \"disk\" requires containerRef".to_string());
        }
        if has_manifest == has_container_ref {
            return Err("exactly one of manifest or containerRef must be set".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ImageBuildPhase {
    #[default]
    #[serde(rename = "")]
    Empty,
    Pending,
    Uploading,
    Building,
    Running,
    Pushing,
    Flashing,
    Completed,
    Failed,
}

impl ImageBuildPhase {
    /// A build that has reached a terminal phase never leaves it except via
    /// an explicit client-initiated retry that resets `status.phase` back to
    /// `Pending` out of band.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The ordinal used to check forward-only transitions. `Failed` is
    /// reachable from any non-terminal phase and is handled separately by
    /// callers, so it is excluded from the total order.
    fn rank(self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Pending => 1,
            Self::Uploading => 2,
            Self::Building => 3,
            Self::Running => 4,
            Self::Pushing => 5,
            Self::Flashing => 6,
            Self::Completed => 7,
            Self::Failed => 8,
        }
    }

    /// Whether transitioning from `self` to `next` respects phase
    /// monotonicity: never leave a terminal phase, and `Failed` is always a
    /// legal destination from a non-terminal phase.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        next.rank() >= self.rank()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageBuildStatus {
    #[serde(default)]
    pub phase: ImageBuildPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_run_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_pod_name: Option<String>,
    #[serde(default)]
    pub observed_generation: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_xor_container_ref() {
        let mut spec = ImageBuildSpec {
            mode: BuildMode::Bootc,
            distro: default_distro(),
            target: default_target(),
            architecture: None,
            export_format: default_export_format(),
            manifest: None,
            manifest_file_name: None,
            container_ref: None,
            container_push: None,
            export_oci: None,
            build_disk_image: false,
            builder_image: None,
            storage_class: None,
            custom_defs: vec![],
            aib_extra_args: vec![],
            publishers: vec![],
            serve_artifact: false,
            input_files_server: false,
            flash_enabled: false,
        };
        assert!(spec.validate_source().is_err());
        spec.manifest = Some("content: {}".to_string());
        assert!(spec.validate_source().is_ok());
        spec.container_ref = Some("quay.io/org/base:latest".to_string());
        assert!(spec.validate_source().is_err());
    }

    #[test]
    fn disk_mode_requires_container_ref() {
        let spec = ImageBuildSpec {
            mode: BuildMode::Disk,
            distro: default_distro(),
            target: default_target(),
            architecture: None,
            export_format: default_export_format(),
            manifest: Some("content: {}".to_string()),
            manifest_file_name: None,
            container_ref: None,
            container_push: None,
            export_oci: None,
            build_disk_image: false,
            builder_image: None,
            storage_class: None,
            custom_defs: vec![],
            aib_extra_args: vec![],
            publishers: vec![],
            serve_artifact: false,
            input_files_server: false,
            flash_enabled: false,
        };
        assert!(spec.validate_source().is_err());
    }

    #[test]
    fn phase_never_leaves_terminal() {
        assert!(!ImageBuildPhase::Completed.can_transition_to(ImageBuildPhase::Building));
        assert!(!ImageBuildPhase::Failed.can_transition_to(ImageBuildPhase::Pending));
    }

    #[test]
    fn failed_reachable_from_any_non_terminal_phase() {
        assert!(ImageBuildPhase::Building.can_transition_to(ImageBuildPhase::Failed));
        assert!(ImageBuildPhase::Uploading.can_transition_to(ImageBuildPhase::Failed));
    }

    #[test]
    fn forward_progress_is_monotonic() {
        assert!(ImageBuildPhase::Pending.can_transition_to(ImageBuildPhase::Building));
        assert!(!ImageBuildPhase::Building.can_transition_to(ImageBuildPhase::Pending));
    }
}
