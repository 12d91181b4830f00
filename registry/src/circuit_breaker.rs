//! Per-registry-host circuit breaker.
//!
//! `CircuitBreakerClient` wraps any [`RegistryClient`] by composition: every
//! call first consults the breaker for the target host, then records success
//! or failure against it.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use automotive_build_types::RegistryMetadata;
use oci_client::secrets::RegistryAuth;
use parking_lot::RwLock;

use crate::{auth::host_key, client::RegistryClient, error::RegistryError};

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_retries: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(5 * 60),
            half_open_max_retries: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct HostState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    half_open_probes: u32,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            half_open_probes: 0,
        }
    }
}

/// Per-host breaker state, guarded by a short-critical-section `RwLock`.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    hosts: RwLock<HashMap<String, HostState>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// Decide whether a call against `host` should be admitted right now,
    /// transitioning `Open -> HalfOpen` if the recovery timeout elapsed.
    fn admit(&self, host: &str) -> Result<(), RegistryError> {
        let mut hosts = self.hosts.write();
        let entry = hosts.entry(host.to_string()).or_default();

        match entry.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                if entry.half_open_probes < self.config.half_open_max_retries {
                    entry.half_open_probes += 1;
                    Ok(())
                } else {
                    Err(RegistryError::CircuitOpen {
                        host: host.to_string(),
                    })
                }
            }
            CircuitState::Open => {
                let elapsed = entry
                    .last_failure_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.recovery_timeout {
                    entry.state = CircuitState::HalfOpen;
                    entry.half_open_probes = 1;
                    tracing::debug!(host, "circuit half-open, admitting probe");
                    Ok(())
                } else {
                    Err(RegistryError::CircuitOpen {
                        host: host.to_string(),
                    })
                }
            }
        }
    }

    fn record_success(&self, host: &str) {
        let mut hosts = self.hosts.write();
        let entry = hosts.entry(host.to_string()).or_default();
        if entry.state != CircuitState::Closed {
            tracing::debug!(host, from = ?entry.state, "circuit recovered, closing");
        }
        entry.state = CircuitState::Closed;
        entry.consecutive_failures = 0;
        entry.half_open_probes = 0;
    }

    fn record_failure(&self, host: &str) {
        let mut hosts = self.hosts.write();
        let entry = hosts.entry(host.to_string()).or_default();
        entry.last_failure_at = Some(Instant::now());

        match entry.state {
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.half_open_probes = 0;
                tracing::warn!(host, "probe failed, circuit re-opened");
            }
            CircuitState::Closed => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= self.config.failure_threshold {
                    entry.state = CircuitState::Open;
                    tracing::warn!(host, failures = entry.consecutive_failures, "circuit opened");
                }
            }
            CircuitState::Open => {}
        }
    }

    #[must_use]
    pub fn state_of(&self, host: &str) -> CircuitState {
        self.hosts
            .read()
            .get(host)
            .map_or(CircuitState::Closed, |s| s.state)
    }
}

pub struct CircuitBreakerClient<C> {
    inner: C,
    breaker: Arc<CircuitBreaker>,
}

impl<C: RegistryClient> CircuitBreakerClient<C> {
    pub fn new(inner: C, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    async fn guarded<T>(
        &self,
        reference: &str,
        call: impl std::future::Future<Output = Result<T, RegistryError>>,
    ) -> Result<T, RegistryError> {
        let host = host_key(reference).to_string();
        self.breaker.admit(&host)?;

        match call.await {
            Ok(value) => {
                self.breaker.record_success(&host);
                Ok(value)
            }
            Err(err) => {
                if err.is_transient() {
                    self.breaker.record_failure(&host);
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl<C: RegistryClient> RegistryClient for CircuitBreakerClient<C> {
    async fn verify_image_accessible(
        &self,
        reference: &str,
        auth: &RegistryAuth,
    ) -> Result<bool, RegistryError> {
        self.guarded(reference, self.inner.verify_image_accessible(reference, auth))
            .await
    }

    async fn get_image_metadata(
        &self,
        reference: &str,
        auth: &RegistryAuth,
    ) -> Result<RegistryMetadata, RegistryError> {
        self.guarded(reference, self.inner.get_image_metadata(reference, auth))
            .await
    }

    async fn verify_digest(
        &self,
        reference: &str,
        expected: &str,
        auth: &RegistryAuth,
    ) -> Result<(bool, String), RegistryError> {
        self.guarded(reference, self.inner.verify_digest(reference, expected, auth))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automotive_build_types::RegistryMetadata;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyClient {
        calls: AtomicU32,
        succeed_after: u32,
    }

    #[async_trait]
    impl RegistryClient for FlakyClient {
        async fn verify_image_accessible(
            &self,
            _reference: &str,
            _auth: &RegistryAuth,
        ) -> Result<bool, RegistryError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.succeed_after {
                Err(RegistryError::Transport {
                    host: "bad.example".to_string(),
                    source: oci_client::errors::OciDistributionError::GenericError(Some(
                        "boom".to_string(),
                    )),
                })
            } else {
                Ok(true)
            }
        }

        async fn get_image_metadata(
            &self,
            _reference: &str,
            _auth: &RegistryAuth,
        ) -> Result<RegistryMetadata, RegistryError> {
            unimplemented!()
        }

        async fn verify_digest(
            &self,
            _reference: &str,
            _expected: &str,
            _auth: &RegistryAuth,
        ) -> Result<(bool, String), RegistryError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn opens_after_failure_threshold() {
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(300),
            half_open_max_retries: 1,
        }));
        let client = CircuitBreakerClient::new(
            FlakyClient {
                calls: AtomicU32::new(0),
                succeed_after: u32::MAX,
            },
            breaker.clone(),
        );

        for _ in 0..5 {
            let result = client
                .verify_image_accessible("bad.example/org/img:v1", &RegistryAuth::Anonymous)
                .await;
            assert!(result.is_err());
        }

        // Sixth call trips the breaker and must not reach the inner client.
        let result = client
            .verify_image_accessible("bad.example/org/img:v1", &RegistryAuth::Anonymous)
            .await;
        assert!(matches!(result, Err(RegistryError::CircuitOpen { .. })));
        assert_eq!(breaker.state_of("bad.example"), CircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_admits_one_probe_after_recovery_timeout() {
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(10),
            half_open_max_retries: 1,
        }));
        let client = CircuitBreakerClient::new(
            FlakyClient {
                calls: AtomicU32::new(0),
                succeed_after: 1,
            },
            breaker.clone(),
        );

        assert!(client
            .verify_image_accessible("flaky.example/org/img:v1", &RegistryAuth::Anonymous)
            .await
            .is_err());
        assert_eq!(breaker.state_of("flaky.example"), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = client
            .verify_image_accessible("flaky.example/org/img:v1", &RegistryAuth::Anonymous)
            .await;
        assert!(result.is_ok());
        assert_eq!(breaker.state_of("flaky.example"), CircuitState::Closed);
    }
}
