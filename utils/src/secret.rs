//! Registry credential parsing shared by the registry client and the API
//! server's internal-registry flow. Values are wrapped in [`SecretValue`] so
//! `Debug`/`Display` never leak them into logs by accident.

use base64::Engine;
use serde::Deserialize;
use zeroize::Zeroize;

/// A secret scalar that redacts itself in `Debug`/`Display`.
#[derive(Clone, Deserialize)]
pub struct SecretValue(String);

impl Zeroize for SecretValue {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl Drop for SecretValue {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl<S: Into<String>> From<S> for SecretValue {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

impl SecretValue {
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Resolved registry credential, independent of how the underlying secret
/// encoded it.
#[derive(Clone)]
pub enum RegistryCredential {
    Basic {
        username: String,
        password: SecretValue,
    },
    Token(SecretValue),
    Anonymous,
}

#[derive(Debug, thiserror::Error)]
pub enum SecretParseError {
    #[error("secret has neither a valid dockerconfigjson nor username/password/token keys")]
    NoUsableCredential,
    #[error("failed to parse .dockerconfigjson: {0}")]
    InvalidDockerConfigJson(#[from] serde_json::Error),
    #[error("auth entry for {0} is not valid base64/UTF-8")]
    InvalidAuthEncoding(String),
}

#[derive(Deserialize)]
struct DockerConfigJson {
    auths: std::collections::BTreeMap<String, DockerConfigAuth>,
}

#[derive(Deserialize)]
struct DockerConfigAuth {
    username: Option<String>,
    password: Option<String>,
    auth: Option<String>,
}

/// Parse a `kubernetes.io/dockerconfigjson` secret's `.dockerconfigjson`
/// payload, using the first entry under `auths` that yields a usable
/// username/password.
pub fn parse_docker_config_json(raw: &[u8]) -> Result<RegistryCredential, SecretParseError> {
    let parsed: DockerConfigJson = serde_json::from_slice(raw)?;
    for (registry, entry) in parsed.auths {
        if let (Some(username), Some(password)) = (entry.username.clone(), entry.password.clone())
        {
            return Ok(RegistryCredential::Basic {
                username,
                password: password.into(),
            });
        }
        if let Some(auth) = entry.auth {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(auth.trim())
                .map_err(|_| SecretParseError::InvalidAuthEncoding(registry.clone()))?;
            let decoded = String::from_utf8(decoded)
                .map_err(|_| SecretParseError::InvalidAuthEncoding(registry.clone()))?;
            if let Some((username, password)) = decoded.split_once(':') {
                return Ok(RegistryCredential::Basic {
                    username: username.to_string(),
                    password: password.to_string().into(),
                });
            }
        }
    }
    Err(SecretParseError::NoUsableCredential)
}

/// Parse a generic opaque secret carrying `username`/`password` or `token`
/// keys (raw bytes as stored by the orchestrator's secret API).
pub fn parse_generic_secret(
    data: &std::collections::BTreeMap<String, Vec<u8>>,
) -> Result<RegistryCredential, SecretParseError> {
    let get = |key: &str| {
        data.get(key)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    };

    if let (Some(username), Some(password)) = (get("username"), get("password")) {
        return Ok(RegistryCredential::Basic {
            username,
            password: password.into(),
        });
    }
    if let Some(token) = get("token") {
        return Ok(RegistryCredential::Token(token.into()));
    }
    Err(SecretParseError::NoUsableCredential)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_username_password_entry() {
        let raw = br#"{"auths":{"quay.io":{"username":"bob","password":"hunter2"}}}"#;
        let cred = parse_docker_config_json(raw).unwrap();
        match cred {
            RegistryCredential::Basic { username, password } => {
                assert_eq!(username, "bob");
                assert_eq!(password.expose(), "hunter2");
            }
            _ => panic!("expected basic credential"),
        }
    }

    #[test]
    fn parses_base64_auth_entry() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("bob:hunter2");
        let raw = format!(r#"{{"auths":{{"quay.io":{{"auth":"{encoded}"}}}}}}"#);
        let cred = parse_docker_config_json(raw.as_bytes()).unwrap();
        match cred {
            RegistryCredential::Basic { username, password } => {
                assert_eq!(username, "bob");
                assert_eq!(password.expose(), "hunter2");
            }
            _ => panic!("expected basic credential"),
        }
    }

    #[test]
    fn generic_secret_token() {
        let mut data = std::collections::BTreeMap::new();
        data.insert("token".to_string(), b"abc123".to_vec());
        let cred = parse_generic_secret(&data).unwrap();
        match cred {
            RegistryCredential::Token(t) => assert_eq!(t.expose(), "abc123"),
            _ => panic!("expected token credential"),
        }
    }

    #[test]
    fn debug_and_display_redact() {
        let secret = SecretValue::from("hunter2");
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(format!("{secret}"), "[REDACTED]");
    }
}
