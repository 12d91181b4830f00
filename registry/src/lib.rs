//! Outbound OCI registry access: verifying image
//! accessibility, extracting manifest metadata, and confirming digests,
//! guarded per-host by a circuit breaker.

pub mod auth;
pub mod circuit_breaker;
pub mod client;
pub mod error;
pub mod metadata;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerClient, CircuitBreakerConfig, CircuitState};
pub use client::{OciRegistryClient, RegistryClient};
pub use error::RegistryError;

pub use oci_client::secrets::RegistryAuth;
