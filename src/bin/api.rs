//! `automotive-build-api`: the stateless Build API server binary. Boots the
//! same `OperatorConfig` load as the operator binary, then hands off to
//! `automotive_build_api::serve`.

use std::net::SocketAddr;
use std::sync::Arc;

use automotive_build_api::AppState;
use automotive_build_types::OperatorConfig;
use kube::Client;

shadow_rs::shadow!(build);

fn load_operator_config() -> OperatorConfig {
    let path = std::env::var("OPERATOR_CONFIG_PATH").unwrap_or_else(|_| "/etc/automotive-build-operator/config.yaml".to_string());
    match std::fs::read_to_string(&path) {
        Ok(raw) => serde_yaml::from_str(&raw).unwrap_or_else(|err| {
            tracing::warn!(%err, path, "failed to parse operator config file, falling back to defaults");
            OperatorConfig::default()
        }),
        Err(err) => {
            tracing::info!(%err, path, "no operator config file found, using defaults");
            OperatorConfig::default()
        }
    }
}

/// Re-read the mounted config file on a fixed interval and swap it into
/// `state`, so a ConfigMap update takes effect without a pod restart.
fn spawn_config_reloader(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            state.reload(load_operator_config());
            tracing::debug!("operator config reloaded");
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    automotive_build_utils::telemetry::init("automotive-build-api");
    tracing::info!(version = build::PKG_VERSION, commit = build::SHORT_COMMIT, "starting");

    let client = Client::try_default().await?;
    let config = load_operator_config();
    let state = Arc::new(AppState::new(client, config));
    spawn_config_reloader(state.clone());

    let addr: SocketAddr = std::env::var("LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;

    automotive_build_api::serve(addr, state).await
}
