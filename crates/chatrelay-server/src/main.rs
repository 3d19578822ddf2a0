//! # chatrelay-server
//!
//! Relay between one upstream chat session and any number of web clients.
//!
//! This binary provides:
//! - **Session lifecycle**: connects the upstream session at startup and
//!   refuses to serve until it is ready
//! - **Directory cache** of users and conversations, fetched once and shared
//!   by every request
//! - **Event relay** that pushes upstream chat messages to every connected
//!   WebSocket client in upstream order
//! - **HTTP gateway** (axum) for the JSON directory, binary conversation
//!   history, room-based push channel and static files

mod api;
mod cache;
mod config;
mod error;
mod relay;
mod rooms;
mod session;
mod supervisor;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use chatrelay_upstream::{ChatBackend, FixtureBackend};

use crate::api::AppState;
use crate::cache::DomainCache;
use crate::config::ServerConfig;
use crate::relay::EventRelay;
use crate::rooms::RoomRegistry;
use crate::session::SessionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chatrelay_server=debug")),
        )
        .init();

    info!("Starting chat relay server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Connect the upstream session (the only fatal startup step)
    // -----------------------------------------------------------------------
    let backend: Arc<dyn ChatBackend> =
        Arc::new(FixtureBackend::from_path(&config.fixture_path).await?);

    let session = Arc::new(SessionManager::start(backend.clone()));
    session.await_ready().await?;
    info!(task = session.connection().name(), "Upstream session established");

    // -----------------------------------------------------------------------
    // 4. Start the directory cache and the event relay
    // -----------------------------------------------------------------------
    let cache = Arc::new(DomainCache::new(backend.clone()));
    let rooms = RoomRegistry::new();
    let relay = Arc::new(EventRelay::new(
        backend,
        cache.clone(),
        rooms.clone(),
        config.heartbeat,
    ));
    // A failed directory fetch leaves the relay stopped, not the process.
    relay.start_in_background(config.heartbeat);

    let app_state = AppState {
        cache,
        rooms,
        session,
        relay,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 5. Run the HTTP gateway (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
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
