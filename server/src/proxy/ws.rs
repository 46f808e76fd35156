//! `GET /proxy/ws/<target>` — WebSocket tunnel.
//!
//! The outbound connection is opened before the inbound upgrade is accepted,
//! so an unreachable target is reported as a plain HTTP error instead of a
//! socket that opens and immediately closes. Once both legs are up, two pumps
//! copy text, binary and close frames in each direction. When either pump
//! stops it cancels the other. Ping/pong stays local to each leg.

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::extract::ws::{self, CloseFrame, WebSocket};
use axum::{
    extract::{State, WebSocketUpgrade},
    http::{header, HeaderMap, Uri},
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{
    self, client::IntoClientRequest, protocol::frame::coding::CloseCode,
    protocol::CloseFrame as UpstreamCloseFrame, Message as UpstreamMessage,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use super::{error_chain, ProxyError, TunnelMode, TunnelTarget};
use crate::state::RelayStats;
use crate::AppState;

type Upstream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code sent to the caller when the upstream leg fails without a close
/// frame of its own.
const CLOSE_UPSTREAM_LOST: u16 = 1011;

pub async fn proxy_ws(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ProxyError> {
    let target = TunnelTarget::from_uri(&uri, TunnelMode::WebSocket)?;
    let proxy = &state.config.proxy;
    target.check_allowed(&proxy.allowed_hosts)?;

    let mut request = target
        .as_str()
        .into_client_request()
        .map_err(|e| ProxyError::InvalidTarget(e.to_string()))?;
    if let Some(protocols) = headers.get(header::SEC_WEBSOCKET_PROTOCOL) {
        request
            .headers_mut()
            .insert(header::SEC_WEBSOCKET_PROTOCOL, protocols.clone());
    }

    let connect_timeout = proxy.connect_timeout_secs;
    let (upstream, handshake) = tokio::time::timeout(
        Duration::from_secs(connect_timeout),
        tokio_tungstenite::connect_async(request),
    )
    .await
    .map_err(|_| ProxyError::ConnectTimeout(connect_timeout))?
    .map_err(handshake_error)?;

    let chosen = handshake
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let ws = match chosen.clone() {
        Some(protocol) => ws.protocols([protocol]),
        None => ws,
    };

    info!(target = %target.url, protocol = ?chosen, "websocket tunnel connected upstream");
    let stats = state.stats.clone();
    let span = info_span!("proxy_ws", target = %target.url);
    Ok(ws.on_upgrade(move |socket| relay(socket, upstream, stats).instrument(span)))
}

fn handshake_error(err: tungstenite::Error) -> ProxyError {
    match err {
        tungstenite::Error::Http(response) => {
            ProxyError::HandshakeRejected(response.status().as_u16())
        }
        tungstenite::Error::Io(e) => ProxyError::TargetUnreachable(e.to_string()),
        tungstenite::Error::Tls(e) => ProxyError::TargetUnreachable(error_chain(&e)),
        tungstenite::Error::Url(e) => ProxyError::InvalidTarget(e.to_string()),
        other => ProxyError::Upstream(error_chain(&other)),
    }
}

/// Run both pumps until either side finishes.
async fn relay(client: WebSocket, upstream: Upstream, stats: std::sync::Arc<RelayStats>) {
    stats.ws_tunnels_active.fetch_add(1, Ordering::Relaxed);
    stats.ws_tunnels_total.fetch_add(1, Ordering::Relaxed);

    let (client_tx, client_rx) = client.split();
    let (upstream_tx, upstream_rx) = upstream.split();
    let cancel = CancellationToken::new();

    let (sent_up, sent_down) = tokio::join!(
        client_to_upstream(client_rx, upstream_tx, cancel.clone()),
        upstream_to_client(upstream_rx, client_tx, cancel),
    );

    stats.ws_tunnels_active.fetch_sub(1, Ordering::Relaxed);
    info!(sent_up, sent_down, "websocket tunnel closed");
}

async fn client_to_upstream(
    mut rx: SplitStream<WebSocket>,
    mut tx: SplitSink<Upstream, UpstreamMessage>,
    cancel: CancellationToken,
) -> u64 {
    let mut forwarded = 0u64;
    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            msg = rx.next() => msg,
        };
        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!("client leg error: {e}");
                break;
            }
            None => break,
        };
        let Some(out) = to_upstream(msg) else { continue };
        let closing = matches!(out, UpstreamMessage::Close(_));
        if tx.send(out).await.is_err() || closing {
            break;
        }
        forwarded += 1;
    }
    cancel.cancel();
    let _ = tx.close().await;
    forwarded
}

async fn upstream_to_client(
    mut rx: SplitStream<Upstream>,
    mut tx: SplitSink<WebSocket, ws::Message>,
    cancel: CancellationToken,
) -> u64 {
    let mut forwarded = 0u64;
    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            msg = rx.next() => msg,
        };
        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!("upstream leg error: {e}");
                let _ = tx
                    .send(ws::Message::Close(Some(CloseFrame {
                        code: CLOSE_UPSTREAM_LOST,
                        reason: "upstream connection lost".into(),
                    })))
                    .await;
                break;
            }
            None => break,
        };
        let Some(out) = to_client(msg) else { continue };
        let closing = matches!(out, ws::Message::Close(_));
        if tx.send(out).await.is_err() || closing {
            break;
        }
        forwarded += 1;
    }
    cancel.cancel();
    let _ = tx.close().await;
    forwarded
}

/// Inbound frame → outbound frame. Control frames stay on their own leg.
fn to_upstream(msg: ws::Message) -> Option<UpstreamMessage> {
    match msg {
        ws::Message::Text(text) => Some(UpstreamMessage::Text(text.as_str().to_owned().into())),
        ws::Message::Binary(data) => Some(UpstreamMessage::Binary(data)),
        ws::Message::Close(frame) => Some(UpstreamMessage::Close(frame.map(|f| {
            UpstreamCloseFrame {
                code: CloseCode::from(f.code),
                reason: f.reason.as_str().to_owned().into(),
            }
        }))),
        ws::Message::Ping(_) | ws::Message::Pong(_) => None,
    }
}

/// Outbound frame → inbound frame.
fn to_client(msg: UpstreamMessage) -> Option<ws::Message> {
    match msg {
        UpstreamMessage::Text(text) => Some(ws::Message::Text(text.as_str().to_owned().into())),
        UpstreamMessage::Binary(data) => Some(ws::Message::Binary(data)),
        UpstreamMessage::Close(frame) => Some(ws::Message::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        }))),
        UpstreamMessage::Ping(_) | UpstreamMessage::Pong(_) | UpstreamMessage::Frame(_) => None,
    }
}
