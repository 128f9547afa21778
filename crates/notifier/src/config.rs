// Notification service configuration.
//
// Environment variables with development defaults, parsed through a lookup
// function so tests never touch the process environment.

use std::{net::SocketAddr, time::Duration};

use crate::{registry::DEFAULT_WRITE_TIMEOUT, ws::Heartbeat};

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Upper bound on a single notification write to a socket.
    pub write_timeout: Duration,
    /// Ping cadence and pong deadline for operator sockets.
    pub heartbeat: Heartbeat,
    /// Log filter directive (e.g. `info`, `fleetops_notifier=debug`).
    pub log_filter: String,
    /// Emit logs as JSON lines instead of the human-readable format.
    pub log_json: bool,
}

impl NotifierConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `FLEETOPS_NOTIFIER_HOST` | `0.0.0.0` |
    /// | `FLEETOPS_NOTIFIER_PORT` | `8082` |
    /// | `FLEETOPS_NOTIFIER_WRITE_TIMEOUT_MS` | `5000` |
    /// | `FLEETOPS_NOTIFIER_HEARTBEAT_INTERVAL_MS` | `15000` |
    /// | `FLEETOPS_NOTIFIER_HEARTBEAT_TIMEOUT_MS` | `10000` |
    /// | `FLEETOPS_NOTIFIER_LOG_FILTER` | `info` |
    /// | `FLEETOPS_LOG_FORMAT` | `text` (`json` for JSON lines) |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("FLEETOPS_NOTIFIER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("FLEETOPS_NOTIFIER_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8082);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let millis = |key: &str| {
            env(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
        };

        let write_timeout = millis("FLEETOPS_NOTIFIER_WRITE_TIMEOUT_MS").unwrap_or(DEFAULT_WRITE_TIMEOUT);
        let defaults = Heartbeat::default();
        let heartbeat = Heartbeat {
            interval: millis("FLEETOPS_NOTIFIER_HEARTBEAT_INTERVAL_MS").unwrap_or(defaults.interval),
            timeout: millis("FLEETOPS_NOTIFIER_HEARTBEAT_TIMEOUT_MS").unwrap_or(defaults.timeout),
        };

        let log_filter = env("FLEETOPS_NOTIFIER_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_json = env("FLEETOPS_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

        Self { listen_addr, write_timeout, heartbeat, log_filter, log_json }
    }
}
