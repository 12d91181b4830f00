//! `CatalogImage` — a searchable entry in the published-image catalog
//!.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::Condition;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetEntry {
    pub name: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogImageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distro: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distro_version: Option<String>,
    #[serde(default)]
    pub targets: Vec<TargetEntry>,
    #[serde(default)]
    pub bootc: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_version: Option<String>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "automotive.sdv.cloud.redhat.com",
    version = "v1alpha1",
    kind = "CatalogImage",
    plural = "catalogimages",
    namespaced,
    status = "CatalogImageStatus",
    shortname = "ci"
)]
#[serde(rename_all = "camelCase")]
pub struct CatalogImageSpec {
    /// Unique per namespace; enforced by the publish handler scanning
    /// existing entries before create.
    pub registry_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_secret_ref: Option<String>,
    #[serde(default)]
    pub metadata: CatalogImageMetadata,
    /// Re-verification cadence in seconds; defaults to 1 hour.
    #[serde(default = "default_verification_interval_secs")]
    pub verification_interval_secs: u64,
    /// Weak back-reference; never an owner-reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image_build: Option<String>,
}

const fn default_verification_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum CatalogImagePhase {
    #[default]
    Pending,
    Verifying,
    Available,
    Unavailable,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlatformVariant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub digest: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMetadata {
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub layer_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_digest: Option<String>,
    #[serde(default)]
    pub is_multi_arch: bool,
    #[serde(default)]
    pub platform_variants: Vec<PlatformVariant>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogImageStatus {
    #[serde(default)]
    pub phase: CatalogImagePhase,
    #[serde(default)]
    pub registry_metadata: RegistryMetadata,
    #[serde(default)]
    pub artifact_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verification_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image_build: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: i64,
}

pub const FINALIZER: &str = "catalogimage.finalizer";
