//! Application configuration loaded from environment variables.

use std::time::Duration;

use message_bus::nats::DEFAULT_STREAM;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Message broker backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerKind {
    /// In-process queues; unprocessed messages are lost on restart.
    #[default]
    Memory,
    /// NATS JetStream.
    Nats,
}

impl BrokerKind {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("nats") {
            BrokerKind::Nats
        } else {
            BrokerKind::Memory
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `8080`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `SAGA_DB_URL`: SQLite database URL (default: `"sqlite://saga.db"`)
/// - `BROKER`: `memory` or `nats` (default: `memory`)
/// - `NATS_URL`: NATS server URL (default: `"nats://localhost:4222"`)
/// - `NATS_STREAM`: JetStream stream name (default: `"SAGA"`)
/// - `FAIL_PAYMENT`, `FAIL_INVENTORY`, `FAIL_SHIPPING`: force the matching
///   worker to fail every forward step (default: unset)
/// - `WORKER_DELAY_MS`: simulated step latency (default: `150`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: String,
    pub broker: BrokerKind,
    pub nats_url: String,
    pub nats_stream: String,
    pub fail_payment: bool,
    pub fail_inventory: bool,
    pub fail_shipping: bool,
    pub worker_delay_ms: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or(defaults.log_format),
            database_url: lookup("SAGA_DB_URL").unwrap_or(defaults.database_url),
            broker: lookup("BROKER")
                .map(|b| BrokerKind::parse(&b))
                .unwrap_or(defaults.broker),
            nats_url: lookup("NATS_URL").unwrap_or(defaults.nats_url),
            nats_stream: lookup("NATS_STREAM").unwrap_or(defaults.nats_stream),
            fail_payment: lookup("FAIL_PAYMENT").is_some_and(|v| is_truthy(&v)),
            fail_inventory: lookup("FAIL_INVENTORY").is_some_and(|v| is_truthy(&v)),
            fail_shipping: lookup("FAIL_SHIPPING").is_some_and(|v| is_truthy(&v)),
            worker_delay_ms: lookup("WORKER_DELAY_MS")
                .and_then(|d| d.parse().ok())
                .unwrap_or(defaults.worker_delay_ms),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Simulated latency of a forward step.
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.worker_delay_ms)
    }

    /// Simulated latency of a compensation, two thirds of a forward step.
    pub fn compensation_delay(&self) -> Duration {
        Duration::from_millis(self.worker_delay_ms * 2 / 3)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: "sqlite://saga.db".to_string(),
            broker: BrokerKind::Memory,
            nats_url: "nats://localhost:4222".to_string(),
            nats_stream: DEFAULT_STREAM.to_string(),
            fail_payment: false,
            fail_inventory: false,
            fail_shipping: false,
            worker_delay_ms: 150,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
