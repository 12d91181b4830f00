//! The control-plane HTTP surface: build requests,
//! uploads, progress, logs, artifact downloads, and the published-image
//! catalog, fronting the same CRDs the reconcilers in
//! `automotive-build-controller` drive.

pub mod artifact;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod internal_registry;
pub mod logs;
pub mod routes;
pub mod state;
pub mod validation;

use std::{net::SocketAddr, sync::Arc};

pub use state::AppState;

/// Bind and run the API server until the process is cancelled, the same
/// lifecycle as the reconcilers running in the other binary.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = routes::build(state);
    tracing::info!(%addr, "api server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
