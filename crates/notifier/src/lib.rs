// fleetops-notifier: routes notifications to the live WebSocket of one operator.

pub mod api;
pub mod config;
pub mod error;
pub mod registry;
pub mod ws;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use fleetops_common::http::middleware::{catch_panic, healthz, request_context};
use tokio::net::TcpListener;

use crate::{registry::ConnectionRegistry, ws::Heartbeat};

pub use fleetops_common::http::middleware::shutdown_signal;

const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub heartbeat: Heartbeat,
}

pub fn build_router(registry: Arc<ConnectionRegistry>) -> Router {
    build_router_with_heartbeat(registry, Heartbeat::default())
}

pub fn build_router_with_heartbeat(registry: Arc<ConnectionRegistry>, heartbeat: Heartbeat) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .route("/ws", get(ws::ws_upgrade))
            .route("/notify", post(api::send_notification))
            .with_state(AppState { registry, heartbeat }),
    )
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context))
        .layer(middleware::from_fn(catch_panic))
}

/// Serve the notifier on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    serve_with_heartbeat(listener, registry, Heartbeat::default(), shutdown).await
}

pub async fn serve_with_heartbeat<F>(
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    heartbeat: Heartbeat,
    shutdown: F,
) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router_with_heartbeat(registry, heartbeat))
        .with_graceful_shutdown(shutdown)
        .await
}
