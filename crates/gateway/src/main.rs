// fleetops-gateway: admin gateway entry point.

use std::sync::Arc;

use anyhow::Context;
use fleetops_gateway::config::GatewayConfig;
use fleetops_saga::{
    engine::SagaEngine,
    journal::SagaJournal,
    steps::{HttpNotificationSender, SimulatedFleetControl},
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env();
    init_tracing(&config);

    let journal = SagaJournal::open(&config.saga_db_path)?;
    let sender = HttpNotificationSender::new(&config.notify_server, config.step_timeout)
        .context("failed to configure notification sender")?;
    let engine = SagaEngine::new(
        journal,
        Arc::new(SimulatedFleetControl::new(config.disable_latency)),
        Arc::new(sender),
        config.saga_options(),
    );

    let resumed = engine.recover().context("failed to resume unfinished sagas")?;

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind gateway listener on {}", config.listen_addr))?;

    info!(
        listen_addr = %config.listen_addr,
        notify_server = %config.notify_server,
        saga_db_path = %config.saga_db_path.display(),
        resumed_sagas = resumed.len(),
        "starting admin gateway"
    );

    fleetops_gateway::serve(listener, engine, &config.cors_origins, fleetops_gateway::shutdown_signal())
        .await
        .context("admin gateway exited unexpectedly")
}

fn init_tracing(config: &GatewayConfig) {
    let builder = tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&config.log_filter));
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}
