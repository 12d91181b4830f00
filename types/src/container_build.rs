//! `ContainerBuild` — a Containerfile build driven by a source upload
//!.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::Condition;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "automotive.sdv.cloud.redhat.com",
    version = "v1alpha1",
    kind = "ContainerBuild",
    plural = "containerbuilds",
    namespaced,
    status = "ContainerBuildStatus",
    shortname = "cb"
)]
#[serde(rename_all = "camelCase")]
pub struct ContainerBuildSpec {
    /// Registry reference the built image is pushed to. Required.
    pub output: String,
    #[serde(default = "default_containerfile")]
    pub containerfile: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_strategy_kind")]
    pub strategy_kind: String,
    #[serde(default)]
    pub build_args: std::collections::BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_secret_ref: Option<String>,
    #[serde(default)]
    pub use_service_account_auth: bool,
    #[serde(default)]
    pub use_internal_registry: bool,
}

fn default_containerfile() -> String {
    "Containerfile".to_string()
}

fn default_strategy() -> String {
    "buildah".to_string()
}

fn default_strategy_kind() -> String {
    "ClusterBuildStrategy".to_string()
}

const fn default_timeout_minutes() -> u32 {
    30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ContainerBuildPhase {
    #[default]
    Pending,
    Uploading,
    Building,
    Completed,
    Failed,
}

impl ContainerBuildPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerBuildStatus {
    #[serde(default)]
    pub phase: ContainerBuildPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_run_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: i64,
}
