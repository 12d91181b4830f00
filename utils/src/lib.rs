//! Shared, dependency-light helpers used by every control-plane crate:
//! deterministic derived naming, registry-secret parsing, and telemetry
//! bootstrapping. Nothing in here talks to the orchestrator or a registry
//! directly — that belongs to `automotive-build-controller` and
//! `automotive-build-registry`.

pub mod constants;
pub mod naming;
pub mod secret;
pub mod telemetry;

pub use naming::derived_name;
