//! Router assembly: `/v1/healthz` and `/v1/openapi.yaml` are open; everything
//! else sits behind [`auth::require_auth`].

use std::{sync::Arc, time::Duration};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::{auth, handlers, state::AppState};

#[must_use]
pub fn build(state: Arc<AppState>) -> Router {
    let public = Router::new()
        .route("/v1/healthz", get(handlers::misc::healthz))
        .route("/v1/openapi.yaml", get(handlers::misc::openapi));

    let protected = Router::new()
        .route("/v1/config", get(handlers::misc::config))
        .route("/v1/metrics", get(handlers::misc::metrics))
        .route("/v1/version", get(handlers::misc::version))
        .route("/v1/builds", get(handlers::builds::list).post(handlers::builds::create))
        .route("/v1/builds/:namespace/:name", get(handlers::builds::get))
        .route("/v1/builds/:namespace/:name/template", get(handlers::builds::template))
        .route("/v1/builds/:namespace/:name/uploads", post(handlers::builds::upload))
        .route("/v1/builds/:namespace/:name/logs", get(handlers::builds::logs))
        .route("/v1/builds/:namespace/:name/progress", get(handlers::builds::progress_handler))
        .route("/v1/builds/:namespace/:name/artifact", get(handlers::builds::artifact))
        .route(
            "/v1/container-builds",
            get(handlers::container_builds::list).post(handlers::container_builds::create),
        )
        .route("/v1/container-builds/:namespace/:name", get(handlers::container_builds::get))
        .route("/v1/container-builds/:namespace/:name/uploads", post(handlers::container_builds::upload))
        .route("/v1/container-builds/:namespace/:name/logs", get(handlers::container_builds::logs))
        .route("/v1/sealed", get(handlers::sealed::list).post(handlers::sealed::create))
        .route("/v1/sealed/:namespace/:name", get(handlers::sealed::get))
        .route("/v1/catalog/images", get(handlers::catalog::list).post(handlers::catalog::publish))
        .route("/v1/catalog/images/:namespace/:name", get(handlers::catalog::get))
        .route("/v1/catalog/images/:namespace/:name/verify", post(handlers::catalog::verify))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_auth));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TimeoutLayer::new(Duration::from_secs(600)))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
