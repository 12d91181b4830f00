//! Bridges the resolved [`automotive_build_utils::secret::RegistryCredential`]
//! (already fetched from the orchestrator's secret API by the caller) into
//! the wire-level auth type the OCI client understands.

use automotive_build_utils::secret::RegistryCredential;
use oci_client::secrets::RegistryAuth;

#[must_use]
pub fn to_registry_auth(credential: &RegistryCredential) -> RegistryAuth {
    match credential {
        RegistryCredential::Basic { username, password } => {
            RegistryAuth::Basic(username.clone(), password.expose().to_string())
        }
        RegistryCredential::Token(token) => RegistryAuth::Bearer(token.expose().to_string()),
        RegistryCredential::Anonymous => RegistryAuth::Anonymous,
    }
}

/// The host key used by the circuit breaker and by credential lookup: the
/// segment of the reference before the first `/`.
#[must_use]
pub fn host_key(reference: &str) -> &str {
    reference.split('/').next().unwrap_or(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_key_is_pre_first_slash_segment() {
        assert_eq!(host_key("quay.io/org/img:v1"), "quay.io");
        assert_eq!(host_key("localhost:5000/org/img"), "localhost:5000");
        assert_eq!(host_key("img"), "img");
    }
}
