// fleetops-gateway: admin HTTP entry point hosting the disable saga engine.

pub mod api;
pub mod config;
pub mod cors;
pub mod error;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use fleetops_common::http::middleware::{catch_panic, healthz, request_context};
use fleetops_saga::engine::SagaEngine;
use tokio::net::TcpListener;

pub use fleetops_common::http::middleware::shutdown_signal;

const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub engine: SagaEngine,
}

pub fn build_router(engine: SagaEngine, cors_origins: &str) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .route("/disable_robot", post(api::disable_robot))
            .route("/workflows/{workflow_id}", get(api::workflow_status))
            .with_state(AppState { engine }),
        cors_origins,
    )
}

fn apply_middleware(router: Router, cors_origins: &str) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context))
        .layer(cors::cors_layer(cors_origins))
        .layer(middleware::from_fn(catch_panic))
}

/// Serve the gateway on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    engine: SagaEngine,
    cors_origins: &str,
    shutdown: F,
) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router(engine, cors_origins)).with_graceful_shutdown(shutdown).await
}
