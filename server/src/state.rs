//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::atomic::{AtomicU64, AtomicUsize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::mirror::{
    CommandSender, DeviceCommand, DeviceGeometry, FrameChannel, GeometryError,
};

/// Shared application state for the relay.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the relay started (for uptime calculation).
    pub start_time: Instant,
    /// Outbound HTTP client for the tunnel proxy. Pooled, no redirects.
    pub http: reqwest::Client,
    /// Native resolution of the mirrored device.
    pub geometry: DeviceGeometry,
    /// Last-value-wins frame slot shared by capture and viewers.
    pub frames: FrameChannel,
    /// Producer side of the command queue; the backend owns the receiver.
    pub commands: CommandSender,
    /// Tunnel counters.
    pub stats: Arc<RelayStats>,
}

/// Lock-free tunnel counters reported by `/api/health`.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub http_requests: AtomicU64,
    pub ws_tunnels_active: AtomicUsize,
    pub ws_tunnels_total: AtomicU64,
}

/// Failures while assembling the state.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl AppState {
    /// Build the state and the command receiver that the control backend drains.
    pub fn new(config: Config) -> Result<(Self, mpsc::Receiver<DeviceCommand>), StartupError> {
        let geometry = DeviceGeometry::new(config.device.width, config.device.height)?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.proxy.connect_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let (commands, rx) = CommandSender::channel(config.device.command_queue);

        let state = Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            http,
            geometry,
            frames: FrameChannel::new(),
            commands,
            stats: Arc::new(RelayStats::default()),
        };
        Ok((state, rx))
    }
}
