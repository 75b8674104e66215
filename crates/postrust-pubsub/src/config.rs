//! Configuration for the pub/sub client.

use serde::{Deserialize, Serialize};

/// Main client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PubSubConfig {
    /// PostgreSQL connection string, passed through to `tokio_postgres::Config`.
    pub conn: String,

    /// Milliseconds between reconnection attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Maximum reconnection attempts before emitting a terminal error.
    /// `None` means retry forever.
    #[serde(default)]
    pub retry_limit: Option<u32>,

    /// Milliseconds between periodic lock re-acquire attempts.
    #[serde(default = "default_acquire_interval_ms")]
    pub acquire_interval_ms: u64,

    /// Enable the inter-process single-listener lock.
    #[serde(default = "default_true")]
    pub single_listener: bool,

    /// Drop notifications this connection itself produced.
    #[serde(default)]
    pub filtered: bool,

    /// Listener-everywhere, execute-once variant: never drop messages in the
    /// demux based on lock ownership, just expose lock state.
    #[serde(default)]
    pub execution_lock: bool,

    /// Schema holding the lock table/functions.
    #[serde(default = "default_schema_name")]
    pub schema_name: String,

    /// Milliseconds of grace given to the shutdown coordinator.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            conn: default_conn(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_limit: None,
            acquire_interval_ms: default_acquire_interval_ms(),
            single_listener: true,
            filtered: false,
            execution_lock: false,
            schema_name: default_schema_name(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl PubSubConfig {
    /// Build a config for the given connection string, with all other
    /// options at their defaults.
    pub fn new(conn: impl Into<String>) -> Self {
        Self {
            conn: conn.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// Recognized variables: `DATABASE_URL`, `PUBSUB_RETRY_DELAY_MS`,
    /// `PUBSUB_RETRY_LIMIT`, `PUBSUB_ACQUIRE_INTERVAL_MS`,
    /// `PUBSUB_SINGLE_LISTENER`, `PUBSUB_FILTERED`, `PUBSUB_EXECUTION_LOCK`,
    /// `SCHEMA_NAME`, `SHUTDOWN_TIMEOUT`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(conn) = std::env::var("DATABASE_URL") {
            config.conn = conn;
        }
        if let Ok(v) = std::env::var("PUBSUB_RETRY_DELAY_MS") {
            if let Ok(n) = v.parse() {
                config.retry_delay_ms = n;
            }
        }
        if let Ok(v) = std::env::var("PUBSUB_RETRY_LIMIT") {
            if let Ok(n) = v.parse() {
                config.retry_limit = Some(n);
            }
        }
        if let Ok(v) = std::env::var("PUBSUB_ACQUIRE_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                config.acquire_interval_ms = n;
            }
        }
        if let Ok(v) = std::env::var("PUBSUB_SINGLE_LISTENER") {
            config.single_listener = parse_bool(&v, config.single_listener);
        }
        if let Ok(v) = std::env::var("PUBSUB_FILTERED") {
            config.filtered = parse_bool(&v, config.filtered);
        }
        if let Ok(v) = std::env::var("PUBSUB_EXECUTION_LOCK") {
            config.execution_lock = parse_bool(&v, config.execution_lock);
        }
        if let Ok(v) = std::env::var("SCHEMA_NAME") {
            config.schema_name = v;
        }
        if let Ok(v) = std::env::var("SHUTDOWN_TIMEOUT") {
            if let Ok(n) = v.parse() {
                config.shutdown_timeout_ms = n;
            }
        }

        config
    }
}

fn parse_bool(raw: &str, fallback: bool) -> bool {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => fallback,
    }
}

fn default_conn() -> String {
    "postgresql://localhost/postgres".to_string()
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_acquire_interval_ms() -> u64 {
    30_000
}

fn default_schema_name() -> String {
    "pgip_lock".to_string()
}

fn default_shutdown_timeout_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}
