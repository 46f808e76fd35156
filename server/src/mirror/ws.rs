//! Viewer and capture WebSocket endpoints.
//!
//! | Path          | Direction                 | Payload                              |
//! |---------------|---------------------------|--------------------------------------|
//! | `/ws/frames`  | relay → viewer            | one binary message per frame         |
//! | `/ws/commands`| viewer → relay            | JSON commands, `pong`/`error` replies |
//! | `/ws/mirror`  | both                      | frames out, commands in              |
//! | `/ws/capture` | capture source → relay    | one binary message per frame         |
//!
//! Each viewer connection is independent: a failed send ends that connection
//! only, and the frame publisher never waits on it.

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn, Instrument};

use super::command::{reject_binary, CommandSession};
use crate::AppState;

/// What a viewer connection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViewerMode {
    Frames,
    Commands,
    Mirror,
}

impl ViewerMode {
    fn sends_frames(self) -> bool {
        matches!(self, Self::Frames | Self::Mirror)
    }

    fn accepts_commands(self) -> bool {
        matches!(self, Self::Commands | Self::Mirror)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Frames => "frames",
            Self::Commands => "commands",
            Self::Mirror => "mirror",
        }
    }
}

/// `GET /ws/frames`
pub async fn frames_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade(state, ws, ViewerMode::Frames)
}

/// `GET /ws/commands`
pub async fn commands_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade(state, ws, ViewerMode::Commands)
}

/// `GET /ws/mirror`
pub async fn mirror_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade(state, ws, ViewerMode::Mirror)
}

fn upgrade(state: AppState, ws: WebSocketUpgrade, mode: ViewerMode) -> Response {
    let id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("viewer", %id, mode = mode.as_str());
    ws.on_upgrade(move |socket| handle_viewer(socket, state, mode).instrument(span))
}

/// Viewer event loop: forwards the newest frame whenever one is published and
/// processes incoming command messages.
async fn handle_viewer(socket: WebSocket, state: AppState, mode: ViewerMode) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let mut frames = mode.sends_frames().then(|| state.frames.subscribe());
    let mut session = CommandSession::new(state.geometry, state.commands.clone());
    let mut frames_sent = 0u64;

    info!("viewer connected");

    loop {
        tokio::select! {
            frame = next_frame(&mut frames) => {
                let Some(frame) = frame else { break };
                if ws_sink.send(Message::Binary(frame.payload.clone())).await.is_err() {
                    debug!(seq = frame.seq, "frame send failed, viewer gone");
                    break;
                }
                frames_sent += 1;
            }
            ws_msg = ws_stream.next() => {
                let Some(Ok(msg)) = ws_msg else { break };
                let reply = match msg {
                    Message::Text(_) | Message::Binary(_) if !mode.accepts_commands() => {
                        debug!("ignoring message on frames-only socket");
                        None
                    }
                    Message::Text(text) => session.handle_text(text.as_str()),
                    Message::Binary(data) => Some(reject_binary(data.len())),
                    Message::Close(_) => break,
                    // Ping/pong is answered by axum.
                    Message::Ping(_) | Message::Pong(_) => None,
                };
                let Some(reply) = reply else { continue };
                let text = match serde_json::to_string(&reply) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("failed to serialize reply: {e}");
                        continue;
                    }
                };
                if ws_sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!(frames_sent, "viewer disconnected");
}

/// Wait for the next frame, or forever when this connection has no frame feed.
async fn next_frame(
    frames: &mut Option<super::frames::FrameReceiver>,
) -> Option<std::sync::Arc<super::frames::Frame>> {
    match frames {
        Some(rx) => rx.next().await,
        None => std::future::pending().await,
    }
}

/// `GET /ws/capture` — a capture process pushes one binary frame per message.
pub async fn capture_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let span = tracing::info_span!("capture_push", id = %uuid::Uuid::new_v4());
    ws.on_upgrade(move |socket| handle_capture(socket, state).instrument(span))
}

async fn handle_capture(mut socket: WebSocket, state: AppState) {
    info!("capture source connected");
    let mut published = 0u64;
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Binary(payload) => {
                if payload.is_empty() {
                    continue;
                }
                state.frames.publish(payload);
                published += 1;
            }
            Message::Text(_) => warn!("capture source sent text, expected binary frames"),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    info!(published, "capture source disconnected");
}
