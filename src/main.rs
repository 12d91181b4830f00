//! `automotive-build-operator`: the reconciler binary. Runs the three
//! lifecycle controllers (ImageBuild, ContainerBuild, ImageSealed) plus the
//! catalog controller as independent `kube::runtime::Controller` watch
//! loops inside one multi-threaded `tokio` runtime.

use std::sync::Arc;
use std::time::Duration;

use automotive_build_controller::{catalog, container_build, image_build, image_sealed};
use automotive_build_registry::{CircuitBreaker, CircuitBreakerClient, CircuitBreakerConfig, OciRegistryClient};
use automotive_build_types::{CatalogImage, ContainerBuild, ImageBuild, ImageSealed, OperatorConfig};
use futures::StreamExt;
use kube::runtime::{controller::Action, watcher, Controller};
use kube::{Api, Client, ResourceExt};

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
/// `ctx`, so a ConfigMap update takes effect without restarting the process.
fn spawn_config_reloader(ctx: Arc<image_build::Context>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            ctx.reload_config(load_operator_config());
            tracing::debug!("operator config reloaded");
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    automotive_build_utils::telemetry::init("automotive-build-operator");
    tracing::info!(version = build::PKG_VERSION, commit = build::SHORT_COMMIT, "starting");

    let client = Client::try_default().await?;
    let config = load_operator_config();

    let registry = Arc::new(CircuitBreakerClient::new(OciRegistryClient::new(), Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()))));
    let catalog_metrics = Arc::new(catalog::CatalogMetrics::register(prometheus::default_registry())?);

    let image_build_ctx = Arc::new(image_build::Context::new(client.clone(), config));
    let container_build_ctx = Arc::new(container_build::Context { client: client.clone() });
    let image_sealed_ctx = Arc::new(image_sealed::Context { client: client.clone() });
    let catalog_ctx = Arc::new(catalog::Context { client: client.clone(), registry, metrics: catalog_metrics });

    spawn_config_reloader(image_build_ctx.clone());

    let image_builds: Api<ImageBuild> = Api::all(client.clone());
    let container_builds: Api<ContainerBuild> = Api::all(client.clone());
    let image_sealeds: Api<ImageSealed> = Api::all(client.clone());
    let catalog_images: Api<CatalogImage> = Api::all(client.clone());

    let image_build_loop = Controller::new(image_builds, watcher::Config::default())
        .run(image_build::reconcile, |obj, err, _| log_and_requeue(obj.name_any(), err), image_build_ctx)
        .for_each(|_| futures::future::ready(()));

    let container_build_loop = Controller::new(container_builds, watcher::Config::default())
        .run(container_build::reconcile, |obj, err, _| log_and_requeue(obj.name_any(), err), container_build_ctx)
        .for_each(|_| futures::future::ready(()));

    let image_sealed_loop = Controller::new(image_sealeds, watcher::Config::default())
        .run(image_sealed::reconcile, |obj, err, _| log_and_requeue(obj.name_any(), err), image_sealed_ctx)
        .for_each(|_| futures::future::ready(()));

    let catalog_loop = Controller::new(catalog_images, watcher::Config::default())
        .run(catalog::reconcile, |obj, err, _| log_and_requeue(obj.name_any(), err), catalog_ctx)
        .for_each(|_| futures::future::ready(()));

    tracing::info!("all controllers started");
    tokio::join!(image_build_loop, container_build_loop, image_sealed_loop, catalog_loop);
    Ok(())
}

fn log_and_requeue(name: String, err: &automotive_build_controller::ReconcileError) -> Action {
    tracing::error!(name, error = %err, "reconcile failed");
    if err.is_transient() {
        Action::requeue(Duration::from_secs(5))
    } else {
        Action::requeue(Duration::from_secs(60))
    }
}
