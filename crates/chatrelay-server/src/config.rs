//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chatrelay_shared::constants::{
    DEFAULT_ALLOWED_ORIGIN, DEFAULT_EVENT_WINDOW_SIZE, DEFAULT_EVENT_WINDOW_TAKE,
    DEFAULT_HEARTBEAT_SECS, DEFAULT_HTTP_PORT,
};

/// How much history the per-conversation endpoint fetches and returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventWindow {
    /// Events requested from upstream.
    pub size: usize,
    /// Events of the fetched window included in the response, from the
    /// start of the window.
    pub take: usize,
}

impl Default for EventWindow {
    fn default() -> Self {
        Self {
            size: DEFAULT_EVENT_WINDOW_SIZE,
            take: DEFAULT_EVENT_WINDOW_TAKE,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8000`
    pub http_addr: SocketAddr,

    /// Origin allowed by CORS on every response.
    /// Env: `ALLOWED_ORIGIN`
    /// Default: `http://localhost:3000`
    pub allowed_origin: String,

    /// Directory served under `/static`.
    /// Env: `STATIC_DIR`
    /// Default: `./static`
    pub static_dir: PathBuf,

    /// Page served at `/`.
    /// Env: `INDEX_PATH`
    /// Default: `./app.html`
    pub index_path: PathBuf,

    /// JSON snapshot served by the fixture backend.
    /// Env: `FIXTURE_PATH`
    /// Default: `./fixture.json`
    pub fixture_path: PathBuf,

    /// Env: `EVENT_WINDOW_SIZE`, `EVENT_WINDOW_TAKE`
    /// Default: fetch 10, return the first 1.
    pub event_window: EventWindow,

    /// Interval of the relay's idle tick.
    /// Env: `HEARTBEAT_SECS`
    /// Default: 5 seconds.
    pub heartbeat: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            allowed_origin: DEFAULT_ALLOWED_ORIGIN.to_string(),
            static_dir: PathBuf::from("./static"),
            index_path: PathBuf::from("./app.html"),
            fixture_path: PathBuf::from("./fixture.json"),
            event_window: EventWindow::default(),
            heartbeat: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(origin) = var("ALLOWED_ORIGIN") {
            if !origin.is_empty() {
                config.allowed_origin = origin;
            }
        }

        if let Some(path) = var("STATIC_DIR") {
            config.static_dir = PathBuf::from(path);
        }

        if let Some(path) = var("INDEX_PATH") {
            config.index_path = PathBuf::from(path);
        }

        if let Some(path) = var("FIXTURE_PATH") {
            config.fixture_path = PathBuf::from(path);
        }

        if let Some(n) = parse_positive(&var, "EVENT_WINDOW_SIZE") {
            config.event_window.size = n;
        }

        if let Some(n) = parse_positive(&var, "EVENT_WINDOW_TAKE") {
            config.event_window.take = n;
        }

        if let Some(secs) = parse_positive(&var, "HEARTBEAT_SECS") {
            config.heartbeat = Duration::from_secs(secs as u64);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn parse_positive(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let value = var(key)?;
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(key, value = %value, "Expected a positive integer, using default");
            None
        }
    }
}
