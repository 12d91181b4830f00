//! Registry client: "is this image accessible, what does its
//! manifest say, does its digest match" — a small trait so the circuit
//! breaker can wrap it by composition rather than inheritance.

use async_trait::async_trait;
use automotive_build_types::RegistryMetadata;
use oci_client::{
    Client, Reference,
    client::{ClientConfig, ClientProtocol},
    errors::OciDistributionError,
    manifest::OciManifest,
    secrets::RegistryAuth,
};
use sha2::Digest;

use crate::{error::RegistryError, metadata};

const ACCEPTED_MANIFEST_MEDIA_TYPES: &[&str] = &[
    "application/vnd.docker.distribution.manifest.v2+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.oci.image.index.v1+json",
];

#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn verify_image_accessible(
        &self,
        reference: &str,
        auth: &RegistryAuth,
    ) -> Result<bool, RegistryError>;

    async fn get_image_metadata(
        &self,
        reference: &str,
        auth: &RegistryAuth,
    ) -> Result<RegistryMetadata, RegistryError>;

    async fn verify_digest(
        &self,
        reference: &str,
        expected: &str,
        auth: &RegistryAuth,
    ) -> Result<(bool, String), RegistryError>;
}

/// The real registry client, backed by `oci-client`.
pub struct OciRegistryClient {
    client: Client,
}

impl Default for OciRegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OciRegistryClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Client::new(ClientConfig {
                protocol: ClientProtocol::Https,
                ..ClientConfig::default()
            }),
        }
    }

    fn parse_reference(reference: &str) -> Result<Reference, RegistryError> {
        reference
            .parse::<Reference>()
            .map_err(|source| RegistryError::InvalidReference {
                reference: reference.to_string(),
                source,
            })
    }

    async fn fetch_raw_manifest(
        &self,
        image: &Reference,
        auth: &RegistryAuth,
    ) -> Result<(Vec<u8>, OciManifest), RegistryError> {
        let (raw, _content_digest) = self
            .client
            .pull_manifest_raw(image, auth, ACCEPTED_MANIFEST_MEDIA_TYPES)
            .await
            .map_err(|source| RegistryError::Transport {
                host: image.registry().to_string(),
                source,
            })?;

        let manifest: OciManifest =
            serde_json::from_slice(&raw).map_err(|_| RegistryError::UnknownMediaType(
                "manifest body did not parse as a Docker v2 or OCI manifest".to_string(),
            ))?;

        Ok((raw, manifest))
    }
}

#[async_trait]
impl RegistryClient for OciRegistryClient {
    async fn verify_image_accessible(
        &self,
        reference: &str,
        auth: &RegistryAuth,
    ) -> Result<bool, RegistryError> {
        let image = Self::parse_reference(reference)?;
        match self.fetch_raw_manifest(&image, auth).await {
            Ok(_) => Ok(true),
            Err(RegistryError::Transport { source, .. }) if is_not_found(&source) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn get_image_metadata(
        &self,
        reference: &str,
        auth: &RegistryAuth,
    ) -> Result<RegistryMetadata, RegistryError> {
        let image = Self::parse_reference(reference)?;
        let (raw, manifest) = self.fetch_raw_manifest(&image, auth).await?;
        metadata::extract(&manifest, &raw)
    }

    async fn verify_digest(
        &self,
        reference: &str,
        expected: &str,
        auth: &RegistryAuth,
    ) -> Result<(bool, String), RegistryError> {
        if expected.is_empty() {
            let image = Self::parse_reference(reference)?;
            let (raw, _manifest) = self.fetch_raw_manifest(&image, auth).await?;
            let actual = format!("sha256:{}", hex::encode(sha2::Sha256::digest(&raw)));
            return Ok((true, actual));
        }

        let meta = self.get_image_metadata(reference, auth).await?;
        let actual = meta.resolved_digest.unwrap_or_default();
        Ok((actual == expected, actual))
    }
}

fn is_not_found(err: &OciDistributionError) -> bool {
    matches!(err, OciDistributionError::ImageManifestNotFoundError(_))
        || err.to_string().contains("404")
}
