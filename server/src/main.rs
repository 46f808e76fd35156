#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # uidev-relay
//!
//! Local relay for a browser-driven device automation app. The hosted web
//! page reaches the relay through the browser extension (plain HTTP) or
//! directly over WebSocket.
//!
//! ## Subcommands
//!
//! - `uidev-relay serve` (default) — run the HTTP/WS server
//!
//! ## API surface
//!
//! | Method | Path                      | Description                              |
//! |--------|---------------------------|------------------------------------------|
//! | GET    | `/api/health`             | Liveness probe with mirror/proxy counters |
//! | GET    | `/api/info`               | Version, backend, geometry, proxy limits |
//! | GET    | `/api/device/geometry`    | Device screen size in pixels             |
//! | ANY    | `/proxy/http/{target}`    | Forward one HTTP request to `target`     |
//! | GET    | `/proxy/ws/{target}`      | Bridge a WebSocket to `target`           |
//! | GET    | `/ws/frames`              | Screen frames (binary JPEG), latest wins |
//! | GET    | `/ws/commands`            | Touch/key commands (JSON text)           |
//! | GET    | `/ws/mirror`              | Frames and commands on one socket        |
//! | GET    | `/ws/capture`             | Push frames from an external producer    |
//!
//! `target` is a full URL, e.g. `/proxy/http/http://10.0.0.5:7912/info`.
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, clap subcommands, tracing, graceful shutdown
//! lib.rs           — router assembly
//! config.rs        — TOML + env-var configuration
//! state.rs         — AppState, counters
//! routes/
//!   health.rs      — GET /api/health
//!   info.rs        — GET /api/info, GET /api/device/geometry
//! proxy/
//!   target.rs      — tunnel target URL parsing, allow-list
//!   headers.rs     — hop-by-hop header filtering
//!   http.rs        — HTTP forwarding
//!   ws.rs          — WebSocket bridging
//! mirror/
//!   frames.rs      — latest-wins frame channel
//!   capture.rs     — MJPEG splitting, TCP capture source
//!   geometry.rs    — canvas to device coordinate mapping
//!   gesture.rs     — pointer down/up classification
//!   command.rs     — viewer message parsing, bounded command queue
//!   backend.rs     — device control backends (mock, TCP forward)
//!   ws.rs          — viewer WebSocket handlers
//! ```

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use uidev_bridge::settings::SettingsStore;
use uidev_relay::config::LoggingConfig;
use uidev_relay::mirror::{backend, capture, ControlBackend};
use uidev_relay::{AppState, Config};

/// Local relay for browser-driven device automation.
#[derive(Parser)]
#[command(name = "uidev-relay", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WS server (default when no subcommand given).
    Serve,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(cli.config.as_deref(), cli.verbose).await,
    }
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string());
    let builder = tracing_subscriber::fmt().with_env_filter(log_filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_server(config_path: Option<&str>, verbose: bool) {
    let config = match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("uidev-relay: configuration error: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging, verbose);

    info!("uidev-relay v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Device {}x{}, backend {}",
        config.device.width,
        config.device.height,
        config.device.backend.as_str()
    );

    if config.proxy.allowed_hosts.is_empty() {
        warn!("Proxy allow-list is empty; any host reachable from this machine can be tunnelled");
    }

    let control = match ControlBackend::from_config(&config.device) {
        Ok(b) => b,
        Err(e) => {
            error!("Invalid device backend: {e}");
            std::process::exit(1);
        }
    };

    let (state, command_rx) = match AppState::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Startup failed: {e}");
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind(&state.config.server.listen).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {e}", state.config.server.listen);
            std::process::exit(1);
        }
    };
    let local_addr = listener.local_addr().ok();
    if let Some(addr) = local_addr {
        info!("Listening on {addr}");
    }

    if state.config.server.publish_port {
        if let Some(addr) = local_addr {
            publish_port(addr.port());
        }
    }

    let backend_task = tokio::spawn(backend::run(command_rx, control));
    let capture_task = state
        .config
        .capture
        .clone()
        .map(|c| capture::spawn_tcp_capture(c, state.frames.clone()));

    info!("Server ready");

    if let Err(e) = uidev_relay::serve(listener, state, shutdown_signal()).await {
        error!("Server error: {e}");
    }

    info!("Shutting down...");
    if let Some(task) = capture_task {
        task.abort();
    }
    backend_task.abort();
    info!("Goodbye");
}

/// Record the bound port where the bridge looks for it.
fn publish_port(port: u16) {
    let result = SettingsStore::default_location().and_then(|store| {
        store.save_port(port)?;
        Ok(store)
    });
    match result {
        Ok(store) => info!("Published relay port {port} to {}", store.path().display()),
        Err(e) => warn!("Could not publish relay port: {e}"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
