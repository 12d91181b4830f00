//! Small shared value types referenced from more than one CRD's `spec`.

use serde::{Deserialize, Serialize};

pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;

/// A push/export destination for a build's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct RegistryDestination {
    /// Fully qualified `registry/namespace/name:tag` reference.
    pub reference: String,
    /// Name of a secret (type `DockerConfigJson` or generic) granting push access.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
}

/// A named downstream publisher invoked after a successful build
/// (e.g. a flashing target or a signing pipeline). Kept intentionally
/// opaque: publishers are configured cluster-wide and only referenced here.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Publisher {
    pub name: String,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub params: std::collections::BTreeMap<String, String>,
}
