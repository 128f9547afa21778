// Admin gateway configuration.
//
// Covers the HTTP surface and the in-process saga engine it hosts.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use fleetops_saga::{
    retry::{
        RetryPolicy, SagaOptions, StepOptions, DEFAULT_MAXIMUM_ATTEMPTS,
        DEFAULT_START_TO_CLOSE_TIMEOUT,
    },
    steps::{disable::DEFAULT_DISABLE_LATENCY, notify::DEFAULT_NOTIFY_ENDPOINT},
};

use crate::cors::DEFAULT_CLIENT_ORIGIN;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Notification service `/notify` URL used by the notify step.
    pub notify_server: String,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: String,
    /// SQLite file holding the saga journal.
    pub saga_db_path: PathBuf,
    /// Per-attempt timeout for both saga steps.
    pub step_timeout: Duration,
    /// Total attempts per step, first attempt included.
    pub retry_max_attempts: u32,
    /// Simulated latency of the fleet disable call.
    pub disable_latency: Duration,
    pub log_filter: String,
    pub log_json: bool,
}

impl GatewayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `FLEETOPS_GATEWAY_HOST` | `0.0.0.0` |
    /// | `FLEETOPS_GATEWAY_PORT` | `8081` |
    /// | `FLEETOPS_NOTIFY_SERVER` | `http://localhost:8082/notify` |
    /// | `FLEETOPS_CLIENT_CORS` | `http://localhost:8083` |
    /// | `FLEETOPS_SAGA_DB_PATH` | `fleetops-sagas.db` |
    /// | `FLEETOPS_STEP_TIMEOUT_SECS` | `60` |
    /// | `FLEETOPS_RETRY_MAX_ATTEMPTS` | `5` |
    /// | `FLEETOPS_DISABLE_LATENCY_MS` | `2000` |
    /// | `FLEETOPS_GATEWAY_LOG_FILTER` | `info` |
    /// | `FLEETOPS_LOG_FORMAT` | `text` (`json` for JSON lines) |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("FLEETOPS_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("FLEETOPS_GATEWAY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8081);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let notify_server =
            env("FLEETOPS_NOTIFY_SERVER").unwrap_or_else(|_| DEFAULT_NOTIFY_ENDPOINT.into());
        let cors_origins =
            env("FLEETOPS_CLIENT_CORS").unwrap_or_else(|_| DEFAULT_CLIENT_ORIGIN.into());
        let saga_db_path = env("FLEETOPS_SAGA_DB_PATH")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("fleetops-sagas.db"));

        let step_timeout = env("FLEETOPS_STEP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_START_TO_CLOSE_TIMEOUT);
        let retry_max_attempts = env("FLEETOPS_RETRY_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|attempts| *attempts > 0)
            .unwrap_or(DEFAULT_MAXIMUM_ATTEMPTS);
        let disable_latency = env("FLEETOPS_DISABLE_LATENCY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_DISABLE_LATENCY);

        let log_filter = env("FLEETOPS_GATEWAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_json = env("FLEETOPS_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

        Self {
            listen_addr,
            notify_server,
            cors_origins,
            saga_db_path,
            step_timeout,
            retry_max_attempts,
            disable_latency,
            log_filter,
            log_json,
        }
    }

    pub fn saga_options(&self) -> SagaOptions {
        SagaOptions::uniform(StepOptions {
            start_to_close_timeout: self.step_timeout,
            retry: RetryPolicy::default().with_maximum_attempts(self.retry_max_attempts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| map.get(key).map(|v| v.to_string()).ok_or(std::env::VarError::NotPresent)
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = GatewayConfig::from_env_fn(env_from_map(HashMap::new()));
        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:8081");
        assert_eq!(cfg.notify_server, "http://localhost:8082/notify");
        assert_eq!(cfg.cors_origins, "http://localhost:8083");
        assert_eq!(cfg.saga_db_path, PathBuf::from("fleetops-sagas.db"));
        assert_eq!(cfg.step_timeout, Duration::from_secs(60));
        assert_eq!(cfg.retry_max_attempts, 5);
        assert_eq!(cfg.disable_latency, Duration::from_secs(2));
        assert_eq!(cfg.log_filter, "info");
        assert!(!cfg.log_json);
    }

    #[test]
    fn overrides_are_applied() {
        let mut m = HashMap::new();
        m.insert("FLEETOPS_GATEWAY_HOST", "127.0.0.1");
        m.insert("FLEETOPS_GATEWAY_PORT", "9081");
        m.insert("FLEETOPS_NOTIFY_SERVER", "http://notifier:8082/notify");
        m.insert("FLEETOPS_CLIENT_CORS", "*");
        m.insert("FLEETOPS_SAGA_DB_PATH", "/var/lib/fleetops/sagas.db");
        m.insert("FLEETOPS_STEP_TIMEOUT_SECS", "5");
        m.insert("FLEETOPS_RETRY_MAX_ATTEMPTS", "2");
        m.insert("FLEETOPS_DISABLE_LATENCY_MS", "0");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));

        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:9081");
        assert_eq!(cfg.notify_server, "http://notifier:8082/notify");
        assert_eq!(cfg.cors_origins, "*");
        assert_eq!(cfg.saga_db_path, PathBuf::from("/var/lib/fleetops/sagas.db"));
        assert_eq!(cfg.disable_latency, Duration::ZERO);

        let options = cfg.saga_options();
        assert_eq!(options.disable.start_to_close_timeout, Duration::from_secs(5));
        assert_eq!(options.notify.retry.maximum_attempts, 2);
    }

    #[test]
    fn invalid_numbers_use_defaults() {
        let mut m = HashMap::new();
        m.insert("FLEETOPS_GATEWAY_PORT", "not_a_number");
        m.insert("FLEETOPS_STEP_TIMEOUT_SECS", "0");
        m.insert("FLEETOPS_RETRY_MAX_ATTEMPTS", "-1");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.port(), 8081);
        assert_eq!(cfg.step_timeout, Duration::from_secs(60));
        assert_eq!(cfg.retry_max_attempts, 5);
    }
}
