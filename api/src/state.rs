//! Process-wide shared state for the API server: a read-mostly
//! `OperatorConfig`/auth-chain snapshot behind a pointer swap, and a
//! progress cache behind its own RW mutex.

use std::sync::Arc;

use automotive_build_controller::progress::ProgressCache;
use automotive_build_registry::{CircuitBreaker, CircuitBreakerConfig, OciRegistryClient};
use automotive_build_types::OperatorConfig;
use parking_lot::RwLock;

use crate::auth::AuthChain;

struct ConfigSnapshot {
    config: Arc<OperatorConfig>,
    auth_chain: Arc<AuthChain>,
}

pub struct AppState {
    pub client: kube::Client,
    pub registry: OciRegistryClient,
    pub circuit_breaker: CircuitBreaker,
    snapshot: RwLock<ConfigSnapshot>,
    pub progress_cache: ProgressCache,
}

impl AppState {
    #[must_use]
    pub fn new(client: kube::Client, config: OperatorConfig) -> Self {
        let auth_chain = AuthChain::from_operator_config(&config);
        Self {
            client,
            registry: OciRegistryClient::new(),
            circuit_breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            snapshot: RwLock::new(ConfigSnapshot {
                config: Arc::new(config),
                auth_chain: Arc::new(auth_chain),
            }),
            progress_cache: ProgressCache::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> Arc<OperatorConfig> {
        self.snapshot.read().config.clone()
    }

    #[must_use]
    pub fn auth_chain(&self) -> Arc<AuthChain> {
        self.snapshot.read().auth_chain.clone()
    }

    /// Swap in a freshly loaded config (and its derived auth chain). Readers
    /// mid-request keep the `Arc` they already cloned, so a reload never
    /// blocks an in-flight authentication check.
    pub fn reload(&self, config: OperatorConfig) {
        let auth_chain = AuthChain::from_operator_config(&config);
        *self.snapshot.write() = ConfigSnapshot {
            config: Arc::new(config),
            auth_chain: Arc::new(auth_chain),
        };
    }
}
