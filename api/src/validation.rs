//! Request validation and defaulting for build creation. The wire body
//! carries a few
//! transient fields (`use_internal_registry`, `tag`) that never land on the
//! CRD spec itself — the internal-registry flow resolves them into a
//! concrete `ContainerPush`/`ExportOCI` destination before the `ImageBuild`
//! is created.

use automotive_build_types::{BuildMode, ImageBuildSpec, Publisher, RegistryDestination};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateImageBuildRequest {
    pub mode: BuildMode,
    #[serde(default)]
    pub distro: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub export_format: Option<String>,
    #[serde(default)]
    pub manifest: Option<String>,
    #[serde(default)]
    pub manifest_file_name: Option<String>,
    #[serde(default)]
    pub container_ref: Option<String>,
    #[serde(default)]
    pub container_push: Option<RegistryDestination>,
    #[serde(default)]
    pub export_oci: Option<RegistryDestination>,
    #[serde(default)]
    pub build_disk_image: bool,
    #[serde(default)]
    pub builder_image: Option<String>,
    #[serde(default)]
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
    /// Transient: resolved into concrete push/export destinations by the
    /// internal-registry flow, never stored on the `ImageBuild` spec as-is.
    #[serde(default)]
    pub use_internal_registry: bool,
    #[serde(default)]
    pub tag: Option<String>,
}

const VALID_EXPORT_FORMATS: &[&str] = &["qcow2", "raw", "ami", "vhd", "gce", "vmdk", "none"];

/// Reject oversized manifests, illegal mode/export-format pairs, and a
/// conflicting `UseInternalRegistry` + explicit push/export destination.
pub fn validate_build_request(req: &CreateImageBuildRequest, max_manifest_size: usize) -> Result<(), ApiError> {
    if let Some(manifest) = &req.manifest {
        if manifest.len() > max_manifest_size {
            return Err(ApiError::Validation(format!(
                "manifest body of {} bytes exceeds the {max_manifest_size}-byte limit",
                manifest.len()
            )));
        }
    }

    if req.mode.requires_container_ref() && req.container_ref.is_none() {
        return Err(ApiError::Validation("mode \"disk\" requires containerRef".to_string()));
    }
    if req.manifest.is_some() == req.container_ref.is_some() {
        return Err(ApiError::Validation(
            "exactly one of manifest or containerRef must be set".to_string(),
        ));
    }

    if let Some(format) = &req.export_format {
        if matches!(req.mode, BuildMode::Package) && format != "none" {
            return Err(ApiError::Validation(format!(
                "mode \"package\" does not produce an exportable disk image (got exportFormat {format:?})"
            )));
        }
        if !matches!(req.mode, BuildMode::Package) && !VALID_EXPORT_FORMATS.contains(&format.as_str()) {
            return Err(ApiError::Validation(format!("unrecognized exportFormat {format:?}")));
        }
    }

    if req.use_internal_registry && (req.container_push.is_some() || req.export_oci.is_some()) {
        return Err(ApiError::Validation(
            "useInternalRegistry is mutually exclusive with an explicit containerPush or exportOci destination".to_string(),
        ));
    }

    Ok(())
}

/// Fill in the request defaults: `Distro=autosd`, `Target=qemu`,
/// host-arch-normalized `Architecture`, `Mode` is left as given (always
/// required on the wire), `ExportFormat=qcow2`, and timeout defaults live on
/// the derived resources rather than this request.
pub fn apply_build_defaults(mut req: CreateImageBuildRequest) -> CreateImageBuildRequest {
    req.distro.get_or_insert_with(|| "autosd".to_string());
    req.target.get_or_insert_with(|| "qemu".to_string());
    req.architecture.get_or_insert_with(normalized_host_arch);
    if !matches!(req.mode, BuildMode::Package) {
        req.export_format.get_or_insert_with(|| "qcow2".to_string());
    }
    req
}

fn normalized_host_arch() -> String {
    match std::env::consts::ARCH {
        "aarch64" => "arm64".to_string(),
        _ => "amd64".to_string(),
    }
}

/// Build the concrete `ImageBuildSpec` from a validated, defaulted request.
/// The internal-registry flow (see `crate::internal_registry`) has already
/// resolved `container_push`/`export_oci` by the time this runs when
/// `use_internal_registry` was set.
#[must_use]
pub fn into_image_build_spec(req: CreateImageBuildRequest) -> ImageBuildSpec {
    ImageBuildSpec {
        mode: req.mode,
        distro: req.distro.unwrap_or_else(|| "autosd".to_string()),
        target: req.target.unwrap_or_else(|| "qemu".to_string()),
        architecture: req.architecture,
        export_format: req.export_format.unwrap_or_else(|| "qcow2".to_string()),
        manifest: req.manifest,
        manifest_file_name: req.manifest_file_name,
        container_ref: req.container_ref,
        container_push: req.container_push,
        export_oci: req.export_oci,
        build_disk_image: req.build_disk_image,
        builder_image: req.builder_image,
        storage_class: req.storage_class,
        custom_defs: req.custom_defs,
        aib_extra_args: req.aib_extra_args,
        publishers: req.publishers,
        serve_artifact: req.serve_artifact,
        input_files_server: req.input_files_server,
        flash_enabled: req.flash_enabled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_request() -> CreateImageBuildRequest {
        CreateImageBuildRequest {
            mode: BuildMode::Bootc,
            distro: None,
            target: None,
            architecture: None,
            export_format: None,
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
            use_internal_registry: false,
            tag: None,
        }
    }

    #[test]
    fn rejects_oversized_manifest() {
        let mut req = minimal_request();
        req.manifest = Some("x".repeat(100));
        assert!(validate_build_request(&req, 10).is_err());
    }

    #[test]
    fn rejects_package_mode_with_disk_export_format() {
        let mut req = minimal_request();
        req.mode = BuildMode::Package;
        req.manifest = Some("content: {}".to_string());
        req.export_format = Some("qcow2".to_string());
        assert!(validate_build_request(&req, 1024).is_err());
    }

    #[test]
    fn rejects_internal_registry_with_explicit_push() {
        let mut req = minimal_request();
        req.use_internal_registry = true;
        req.container_push = Some(RegistryDestination { reference: "quay.io/org/img:v1".to_string(), secret_ref: None });
        assert!(validate_build_request(&req, 1024).is_err());
    }

    #[test]
    fn defaults_fill_distro_target_and_export_format() {
        let req = apply_build_defaults(minimal_request());
        assert_eq!(req.distro.as_deref(), Some("autosd"));
        assert_eq!(req.target.as_deref(), Some("qemu"));
        assert_eq!(req.export_format.as_deref(), Some("qcow2"));
    }

    #[test]
    fn defaults_do_not_set_export_format_for_package_mode() {
        let mut req = minimal_request();
        req.mode = BuildMode::Package;
        let req = apply_build_defaults(req);
        assert_eq!(req.export_format, None);
    }
}
