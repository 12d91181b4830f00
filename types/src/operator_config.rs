//! Process-wide, hot-reloadable configuration shared by the operator and
//! the API server. Treated as a read-mostly value behind a pointer swap.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcIssuer {
    pub issuer_url: String,
    #[serde(default)]
    pub audiences: Vec<String>,
    pub username_claim: String,
    #[serde(default)]
    pub username_prefix: Option<String>,
    #[serde(default)]
    pub ca_pem: Option<String>,
    #[serde(default)]
    pub ca_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JumpstarterTarget {
    pub name: String,
    pub selector: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    #[serde(default = "default_pvc_size")]
    pub pvc_size: String,
    #[serde(default)]
    pub oidc_issuers: Vec<OidcIssuer>,
    #[serde(default = "default_internal_registry_host")]
    pub internal_registry_host: String,
    #[serde(default)]
    pub internal_registry_external_route: Option<String>,
    #[serde(default)]
    pub jumpstarter_targets: Vec<JumpstarterTarget>,
    #[serde(default = "default_catalog_verification_interval_secs")]
    pub catalog_verification_interval_secs: u64,
    #[serde(default = "default_catalog_unavailable_retry_secs")]
    pub catalog_unavailable_retry_secs: u64,
    #[serde(default = "default_upload_timeout_minutes")]
    pub upload_timeout_minutes: u32,
    #[serde(default = "default_max_log_stream_duration_minutes")]
    pub max_log_stream_duration_minutes: u32,
    #[serde(default = "default_max_manifest_size_bytes")]
    pub max_manifest_size_bytes: usize,
    #[serde(default = "default_artifact_deadline_minutes")]
    pub artifact_deadline_minutes: u32,
}

fn default_pvc_size() -> String {
    "8Gi".to_string()
}

fn default_internal_registry_host() -> String {
    automotive_build_utils_host()
}

// Kept as a free function (rather than a re-export) so this crate does not
// need to depend on automotive-build-utils for a single string constant.
fn automotive_build_utils_host() -> String {
    "image-registry.openshift-image-registry.svc:5000".to_string()
}

const fn default_catalog_verification_interval_secs() -> u64 {
    3600
}

const fn default_catalog_unavailable_retry_secs() -> u64 {
    300
}

const fn default_upload_timeout_minutes() -> u32 {
    30
}

const fn default_max_log_stream_duration_minutes() -> u32 {
    120
}

const fn default_max_manifest_size_bytes() -> usize {
    1024 * 1024
}

const fn default_artifact_deadline_minutes() -> u32 {
    30
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            pvc_size: default_pvc_size(),
            oidc_issuers: Vec::new(),
            internal_registry_host: default_internal_registry_host(),
            internal_registry_external_route: None,
            jumpstarter_targets: Vec::new(),
            catalog_verification_interval_secs: default_catalog_verification_interval_secs(),
            catalog_unavailable_retry_secs: default_catalog_unavailable_retry_secs(),
            upload_timeout_minutes: default_upload_timeout_minutes(),
            max_log_stream_duration_minutes: default_max_log_stream_duration_minutes(),
            max_manifest_size_bytes: default_max_manifest_size_bytes(),
            artifact_deadline_minutes: default_artifact_deadline_minutes(),
        }
    }
}

impl OperatorConfig {
    /// A view of the config safe to hand back from `GET /v1/config`: strips
    /// nothing secret today (no credentials live here), but keeps a
    /// redaction seam open for when a field does need hiding.
    #[must_use]
    pub fn redacted(&self) -> Self {
        self.clone()
    }
}
