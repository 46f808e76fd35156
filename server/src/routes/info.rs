//! Relay and device information endpoints.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::mirror::DeviceGeometry;
use crate::AppState;

/// `GET /api/info` — version, host platform, active backend and geometry.
pub async fn info(State(state): State<AppState>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "backend": config.device.backend.as_str(),
        "geometry": state.geometry,
        "capture": config.capture.as_ref().map(|c| c.mjpeg_addr.as_str()),
        "proxy": {
            "restricted": !config.proxy.allowed_hosts.is_empty(),
            "connect_timeout_secs": config.proxy.connect_timeout_secs,
            "response_timeout_secs": config.proxy.response_timeout_secs,
        },
    }))
}

/// `GET /api/device/geometry` — native resolution viewers map pointers into.
pub async fn geometry(State(state): State<AppState>) -> Json<DeviceGeometry> {
    Json(state.geometry)
}
