//! Health-check endpoint.

use std::sync::atomic::Ordering;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// `GET /api/health` — liveness probe.
///
/// Returns status, uptime, version, mirroring state and tunnel counters.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();
    let stats = &state.stats;

    Json(json!({
        "status": "ok",
        "uptime_secs": uptime,
        "version": env!("CARGO_PKG_VERSION"),
        "mirror": {
            "viewers": state.frames.viewer_count(),
            "latest_frame_seq": state.frames.latest_seq(),
            "commands_accepted": state.commands.accepted(),
            "commands_dropped": state.commands.dropped(),
        },
        "proxy": {
            "http_requests": stats.http_requests.load(Ordering::Relaxed),
            "ws_tunnels_active": stats.ws_tunnels_active.load(Ordering::Relaxed),
            "ws_tunnels_total": stats.ws_tunnels_total.load(Ordering::Relaxed),
        },
    }))
}
