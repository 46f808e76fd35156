//! Generic tunnel proxy.
//!
//! The target URL is carried in the request path:
//!
//! | Method | Path                                     | Outbound            |
//! |--------|------------------------------------------|---------------------|
//! | ANY    | `/proxy/http/<http|https>://host/path`   | HTTP request        |
//! | GET    | `/proxy/ws/<ws|wss|http|https>://host/path` | WebSocket session |
//!
//! Failures never reach the caller as a bare connection reset: every error is
//! a JSON body `{"error": ..., "code": ...}` with a status that tells an
//! unreachable target (502), a timeout (504) and a bad request (400) apart.

pub mod headers;
pub mod http;
pub mod target;
pub mod ws;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

pub use target::{Scheme, TunnelMode, TunnelTarget};
pub(crate) use uidev_bridge::error_chain;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("unsupported target scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("invalid target url: {0}")]
    InvalidTarget(String),
    #[error("target host '{0}' is not in proxy.allowed_hosts")]
    HostNotAllowed(String),
    #[error("target unreachable: {0}")]
    TargetUnreachable(String),
    #[error("timed out connecting to target after {0}s")]
    ConnectTimeout(u64),
    #[error("target did not respond within {0}s")]
    ResponseTimeout(u64),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("upstream rejected the websocket handshake with status {0}")]
    HandshakeRejected(u16),
    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),
    #[error("failed to read request body: {0}")]
    RequestBody(String),
}

impl ProxyError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedScheme(_) | Self::InvalidTarget(_) | Self::RequestBody(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::HostNotAllowed(_) => StatusCode::FORBIDDEN,
            Self::TargetUnreachable(_) | Self::Upstream(_) | Self::HandshakeRejected(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::ConnectTimeout(_) | Self::ResponseTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedScheme(_) => "UNSUPPORTED_SCHEME",
            Self::InvalidTarget(_) => "INVALID_TARGET",
            Self::HostNotAllowed(_) => "HOST_NOT_ALLOWED",
            Self::TargetUnreachable(_) => "TARGET_UNREACHABLE",
            Self::ConnectTimeout(_) => "CONNECT_TIMEOUT",
            Self::ResponseTimeout(_) => "RESPONSE_TIMEOUT",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::HandshakeRejected(_) => "HANDSHAKE_REJECTED",
            Self::BodyTooLarge(_) => "BODY_TOO_LARGE",
            Self::RequestBody(_) => "INVALID_BODY",
        }
    }

    /// Classify a reqwest failure. Connect timeouts and refused/DNS/TLS
    /// failures surface through `is_timeout`/`is_connect`.
    pub(crate) fn from_reqwest(err: &reqwest::Error, connect_timeout_secs: u64) -> Self {
        if err.is_connect() {
            if err.is_timeout() {
                return Self::ConnectTimeout(connect_timeout_secs);
            }
            return Self::TargetUnreachable(error_chain(err));
        }
        Self::Upstream(error_chain(err))
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        warn!(code = self.code(), status = status.as_u16(), "proxy error: {self}");
        (
            status,
            Json(json!({
                "error": self.to_string(),
                "code": self.code(),
            })),
        )
            .into_response()
    }
}
