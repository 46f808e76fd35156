//! `ANY /proxy/http/<target>` — HTTP tunnel.
//!
//! The inbound body is read up to `proxy.max_request_body_bytes` and attached
//! for methods that carry one. The upstream status and filtered headers are
//! returned as soon as they arrive and the body is streamed through chunk by
//! chunk, so large or endless responses never sit in memory.

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, Method},
    response::Response,
};
use http_body_util::LengthLimitError;
use tracing::{debug, info};

use super::headers::{filter_request_headers, filter_response_headers};
use super::{error_chain, ProxyError, TunnelMode, TunnelTarget};
use crate::AppState;

/// Methods whose inbound body is forwarded.
fn carries_body(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

pub async fn proxy_http(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let target = TunnelTarget::from_uri(&parts.uri, TunnelMode::Http)?;
    let proxy = &state.config.proxy;
    target.check_allowed(&proxy.allowed_hosts)?;
    state.stats.http_requests.fetch_add(1, Ordering::Relaxed);

    let body = if carries_body(&parts.method) {
        Some(read_body(body, &parts.headers, proxy.max_request_body_bytes).await?)
    } else {
        None
    };

    debug!(method = %parts.method, target = %target.url, "forwarding http request");
    let mut outbound = state
        .http
        .request(parts.method.clone(), target.url.clone())
        .headers(filter_request_headers(&parts.headers));
    if let Some(body) = body {
        outbound = outbound.body(body);
    }

    let upstream = tokio::time::timeout(
        Duration::from_secs(proxy.response_timeout_secs),
        outbound.send(),
    )
    .await
    .map_err(|_| ProxyError::ResponseTimeout(proxy.response_timeout_secs))?
    .map_err(|e| ProxyError::from_reqwest(&e, proxy.connect_timeout_secs))?;

    let status = upstream.status();
    info!(
        method = %parts.method,
        target = %target.url,
        status = status.as_u16(),
        "http tunnel"
    );

    let headers = filter_response_headers(upstream.headers());
    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

async fn read_body(
    body: Body,
    headers: &axum::http::HeaderMap,
    limit: usize,
) -> Result<bytes::Bytes, ProxyError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(ProxyError::BodyTooLarge(limit));
    }

    axum::body::to_bytes(body, limit).await.map_err(|e| {
        let inner = e.into_inner();
        if inner.is::<LengthLimitError>() {
            ProxyError::BodyTooLarge(limit)
        } else {
            ProxyError::RequestBody(error_chain(inner.as_ref()))
        }
    })
}
