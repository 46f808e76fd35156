#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::unused_async)]

//! uidev-relay library — the local relay behind a browser-driven device
//! automation app.
//!
//! - `proxy` — generic HTTP/WebSocket tunnel to arbitrary targets
//! - `mirror` — frame broadcast, command channel, coordinate mapping, gestures
//! - `routes` — health and info endpoints
//! - `config` — TOML + env-var configuration
//! - `state` — shared handler state

pub mod config;
pub mod mirror;
pub mod proxy;
pub mod routes;
pub mod state;

use std::future::Future;

use axum::{
    routing::{any, get},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use config::Config;
pub use state::{AppState, RelayStats, StartupError};

/// Build the full HTTP/WS surface.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(routes::health::health))
        .route("/api/info", get(routes::info::info))
        .route("/api/device/geometry", get(routes::info::geometry))
        .route("/proxy/http/{*target}", any(proxy::http::proxy_http))
        .route("/proxy/ws/{*target}", get(proxy::ws::proxy_ws))
        .route("/ws/frames", get(mirror::ws::frames_upgrade))
        .route("/ws/commands", get(mirror::ws::commands_upgrade))
        .route("/ws/mirror", get(mirror::ws::mirror_upgrade))
        .route("/ws/capture", get(mirror::ws::capture_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve `state` on an already-bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
