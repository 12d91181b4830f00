//! Registry error taxonomy: every variant here is either
//! transient (reconcilers requeue, the API returns 503) or a fatal
//! auth/parse failure the caller should not retry blindly.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry {host} is unavailable: {source}")]
    Transport {
        host: String,
        #[source]
        source: oci_client::errors::OciDistributionError,
    },

    #[error("could not parse image reference {reference:?}: {source}")]
    InvalidReference {
        reference: String,
        #[source]
        source: oci_client::ParseError,
    },

    #[error("registry credentials could not be resolved: {0}")]
    Auth(String),

    #[error("circuit open for registry host {host}, retry after the recovery timeout")]
    CircuitOpen { host: String },

    #[error("manifest had an unrecognized media type: {0}")]
    UnknownMediaType(String),
}

impl RegistryError {
    /// Whether a reconciler should requeue on this error rather than
    /// transition the owning resource straight to `Failed`.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::CircuitOpen { .. })
    }
}
