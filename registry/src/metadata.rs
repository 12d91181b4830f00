//! Manifest-shape dispatch: discriminate by explicit media type, never by
//! structural guessing.

use automotive_build_types::{PlatformVariant, RegistryMetadata};
use oci_client::manifest::{OciImageIndex, OciManifest};
use sha2::{Digest, Sha256};

use crate::error::RegistryError;

const SCHEMA2_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
const SCHEMA2_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Build [`RegistryMetadata`] from a parsed manifest plus its raw bytes, the
/// latter used only to compute `resolved_digest` from the raw manifest
/// bytes rather than a re-serialized copy.
pub fn extract(manifest: &OciManifest, raw: &[u8]) -> Result<RegistryMetadata, RegistryError> {
    let resolved_digest = format!("sha256:{}", hex::encode(Sha256::digest(raw)));

    match manifest {
        OciManifest::Image(image) => {
            let media_type = image
                .media_type
                .clone()
                .unwrap_or_else(|| guess_single_manifest_media_type(raw));
            let size_bytes: u64 = image.layers.iter().map(|l| l.size as u64).sum();
            Ok(RegistryMetadata {
                size_bytes,
                layer_count: image.layers.len() as u32,
                media_type: Some(media_type),
                resolved_digest: Some(resolved_digest),
                is_multi_arch: false,
                platform_variants: Vec::new(),
            })
        }
        OciManifest::ImageIndex(index) => {
            let media_type = index
                .media_type
                .clone()
                .unwrap_or_else(|| guess_index_media_type(raw));
            Ok(RegistryMetadata {
                size_bytes: 0,
                layer_count: index.manifests.len() as u32,
                media_type: Some(media_type),
                resolved_digest: Some(resolved_digest),
                is_multi_arch: true,
                platform_variants: platform_variants(index),
            })
        }
    }
}

fn platform_variants(index: &OciImageIndex) -> Vec<PlatformVariant> {
    index
        .manifests
        .iter()
        .map(|entry| PlatformVariant {
            architecture: entry.platform.as_ref().map(|p| p.architecture.clone()),
            os: entry.platform.as_ref().map(|p| p.os.clone()),
            variant: entry.platform.as_ref().and_then(|p| p.variant.clone()),
            digest: entry.digest.clone(),
            size_bytes: entry.size as u64,
        })
        .collect()
}

// Registries occasionally omit the top-level `mediaType` field even though
// it's required by spec; fall back to sniffing the raw JSON so a missing
// field doesn't turn into a hard error for an otherwise-valid manifest.
fn guess_single_manifest_media_type(raw: &[u8]) -> String {
    if std::str::from_utf8(raw)
        .map(|s| s.contains("vnd.oci.image"))
        .unwrap_or(false)
    {
        OCI_MANIFEST.to_string()
    } else {
        SCHEMA2_MANIFEST.to_string()
    }
}

fn guess_index_media_type(raw: &[u8]) -> String {
    if std::str::from_utf8(raw)
        .map(|s| s.contains("vnd.oci.image"))
        .unwrap_or(false)
    {
        OCI_INDEX.to_string()
    } else {
        SCHEMA2_LIST.to_string()
    }
}
