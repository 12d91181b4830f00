//! `tracing` bootstrap shared by both binaries: an env-var-driven filter
//! cascading down to a sensible default, emitting structured output since
//! this process runs headless in a cluster rather than interactively in a
//! terminal.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the global `tracing` subscriber.
///
/// Honors `RUST_LOG` (defaulting to `info`) for verbosity, and emits JSON
/// when `LOG_FORMAT=json` is set (the shape a cluster log pipeline expects);
/// otherwise emits a compact human-readable line per event for local runs.
pub fn init(service_name: &'static str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).compact())
            .init();
    }

    tracing::info!(service = service_name, "telemetry initialized");
}
