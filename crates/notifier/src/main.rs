// fleetops-notifier: notification service entry point.

use std::sync::Arc;

use anyhow::Context;
use fleetops_notifier::{config::NotifierConfig, registry::ConnectionRegistry};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NotifierConfig::from_env();
    init_tracing(&config);

    let registry = Arc::new(ConnectionRegistry::new(config.write_timeout));
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind notifier listener on {}", config.listen_addr))?;

    info!(
        listen_addr = %config.listen_addr,
        write_timeout_ms = config.write_timeout.as_millis() as u64,
        heartbeat_interval_ms = config.heartbeat.interval.as_millis() as u64,
        "starting notification service"
    );

    fleetops_notifier::serve_with_heartbeat(
        listener,
        registry,
        config.heartbeat,
        fleetops_notifier::shutdown_signal(),
    )
    .await
    .context("notification service exited unexpectedly")
}

fn init_tracing(config: &NotifierConfig) {
    let builder = tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&config.log_filter));
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}
