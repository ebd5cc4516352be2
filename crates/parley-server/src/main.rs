//! # parley-server
//!
//! Relay server for parley contacts, groups and messages.
//!
//! This binary provides:
//! - **WebSocket endpoint** (`/ws`) carrying the JSON event protocol between
//!   clients and the relay core
//! - **REST API** (axum) for history, contacts, invites and group management
//! - **SQLite persistence** for contacts, groups and messages
//! - **Rate limiting** per IP for HTTP and per connection for socket events

mod api;
mod config;
mod error;
mod rate_limit;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use parley_core::{Relay, SqliteGateway};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug,parley_core=debug")),
        )
        .init();

    info!("Starting parley relay server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let gateway = SqliteGateway::open(config.database_path.as_deref())?;
    let relay = Relay::new(Arc::new(gateway));

    let http_addr = config.http_addr;
    let app_state = AppState::new(relay, config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = app_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
