//! Shared harness: an in-process relay and a small upstream server for the
//! tunnel to reach.

#![allow(dead_code)]

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use uidev_relay::mirror::{backend, CommandLog, ControlBackend};
use uidev_relay::{AppState, Config};

pub struct Relay {
    pub addr: SocketAddr,
    pub state: AppState,
    pub log: CommandLog,
}

impl Relay {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{path}", self.addr)
    }
}

/// Start a relay on an ephemeral port with a mock control backend.
pub async fn spawn_relay(config: Config) -> Relay {
    let (state, rx) = AppState::new(config).unwrap();
    let log = CommandLog::default();
    tokio::spawn(backend::run(rx, ControlBackend::Mock(log.clone())));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serve_state = state.clone();
    tokio::spawn(async move {
        uidev_relay::serve(listener, serve_state, std::future::pending()).await
    });
    Relay { addr, state, log }
}

pub async fn spawn_default_relay() -> Relay {
    spawn_relay(Config::default()).await
}

/// Start the upstream test server and return its address.
pub async fn spawn_upstream() -> SocketAddr {
    spawn_recording_upstream().await.0
}

/// Like [`spawn_upstream`], also yielding the close code of every close frame
/// the `/ws` endpoint receives from its peer.
pub async fn spawn_recording_upstream() -> (SocketAddr, mpsc::UnboundedReceiver<u16>) {
    let (closes_tx, closes_rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/json", get(|| async { Json(json!({"hello": "world", "n": [1, 2, 3]})) }))
        .route("/echo-json", post(|Json(body): Json<Value>| async move { Json(body) }))
        .route("/reverse", post(reverse))
        .route("/missing", get(missing))
        .route("/headers", any(echo_headers))
        .route("/redirect", get(|| async { Redirect::to("/json") }))
        .route("/ws", get(ws_echo))
        .with_state(closes_tx);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (addr, closes_rx)
}

/// A port that was bound a moment ago and is now closed.
pub fn closed_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn reverse(body: Bytes) -> Response {
    let mut bytes = body.to_vec();
    bytes.reverse();
    ([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response()
}

async fn missing() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "no such thing"}))).into_response()
}

async fn echo_headers(headers: HeaderMap) -> Response {
    let seen: serde_json::Map<String, Value> = headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                Value::String(v.to_str().unwrap_or_default().to_string()),
            )
        })
        .collect();
    ([("x-upstream", "yes")], Json(Value::Object(seen))).into_response()
}

/// Echoes text and binary. `close:<code>` makes the server close with that code.
async fn ws_echo(
    State(closes): State<mpsc::UnboundedSender<u16>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.protocols(["v1.uidev"]).on_upgrade(|mut socket| async move {
        while let Some(Ok(msg)) = socket.recv().await {
            match msg {
                Message::Text(ref text) if text.as_str().starts_with("close:") => {
                    let code = text.as_str()["close:".len()..].parse().unwrap_or(1000);
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: "bye".into(),
                        })))
                        .await;
                    break;
                }
                Message::Text(_) | Message::Binary(_) => {
                    if socket.send(msg).await.is_err() {
                        break;
                    }
                }
                Message::Close(frame) => {
                    if let Some(frame) = frame {
                        let _ = closes.send(frame.code);
                    }
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    })
}

pub fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}
