//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the relay can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use parley_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_OUTBOUND_BUFFER};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5600`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: unset (platform data directory).
    pub database_path: Option<PathBuf>,

    /// Human-readable name for this relay instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Parley Relay"`
    pub instance_name: String,

    /// Maximum number of concurrent WebSocket connections (0 = unlimited).
    /// Env: `MAX_CONNECTIONS`
    /// Default: `0`
    pub max_connections: usize,

    /// Events queued per connection before new ones are dropped.
    /// Env: `OUTBOUND_BUFFER`
    /// Default: `256`
    pub outbound_buffer: usize,

    /// Sustained requests (HTTP, per IP) or events (WebSocket, per
    /// connection) per second.
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: `20`
    pub rate_limit_per_sec: f64,

    /// Burst allowance on top of the sustained rate.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: `60`
    pub rate_limit_burst: f64,

    /// Seconds between WebSocket pings.
    /// Env: `WS_PING_INTERVAL_SECS`
    /// Default: `30`
    pub ws_ping_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            instance_name: "Parley Relay".to_string(),
            max_connections: 0,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            rate_limit_per_sec: 20.0,
            rate_limit_burst: 60.0,
            ws_ping_interval_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        parse_into(&lookup, "MAX_CONNECTIONS", &mut config.max_connections);
        parse_into(&lookup, "OUTBOUND_BUFFER", &mut config.outbound_buffer);
        parse_into(&lookup, "RATE_LIMIT_PER_SEC", &mut config.rate_limit_per_sec);
        parse_into(&lookup, "RATE_LIMIT_BURST", &mut config.rate_limit_burst);
        parse_into(&lookup, "WS_PING_INTERVAL_SECS", &mut config.ws_ping_interval_secs);

        if config.outbound_buffer == 0 {
            tracing::warn!("OUTBOUND_BUFFER must be positive, using default");
            config.outbound_buffer = DEFAULT_OUTBOUND_BUFFER;
        }
        if config.ws_ping_interval_secs == 0 {
            tracing::warn!("WS_PING_INTERVAL_SECS must be positive, using default");
            config.ws_ping_interval_secs = 30;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}
