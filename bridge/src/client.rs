//! HTTP client that forwards extension requests to the local relay.
//!
//! [`RelayClient::forward`] never fails: transport errors, bad input and
//! undecodable bodies all come back as a [`ForwardResponse`] with `error`
//! set, so nothing panics or propagates across the extension boundary.
//!
//! ## Body encoding
//!
//! | Response content type          | `data`                              |
//! |--------------------------------|-------------------------------------|
//! | `application/json`, `*/*+json` | parsed JSON value                   |
//! | anything else                  | base64 (standard alphabet) string   |

use std::time::Duration;

use base64::Engine;
use serde_json::Value;

use crate::message::{ForwardRequest, ForwardResponse};
use crate::settings::SettingsStore;

/// Forwards requests to `http://127.0.0.1:<port>`, re-reading the port from
/// the settings store for every call.
pub struct RelayClient {
    http: reqwest::Client,
    settings: SettingsStore,
    host: String,
}

impl RelayClient {
    pub fn new(settings: SettingsStore) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            settings,
            host: "127.0.0.1".to_string(),
        })
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Perform one request against the relay.
    pub async fn forward(&self, request: &ForwardRequest) -> ForwardResponse {
        self.forward_inner(request)
            .await
            .with_id(request.id.clone())
    }

    async fn forward_inner(&self, request: &ForwardRequest) -> ForwardResponse {
        let port = match self.settings.load() {
            Ok(s) => s.relay_port,
            Err(e) => return ForwardResponse::failure(e.to_string()),
        };
        if !request.url.starts_with('/') {
            return ForwardResponse::failure(format!(
                "url must be a relay path starting with '/', got '{}'",
                request.url
            ));
        }
        let method = match parse_method(request.method.as_deref()) {
            Ok(m) => m,
            Err(e) => return ForwardResponse::failure(e),
        };

        let url = format!("http://{}:{port}{}", self.host, request.url);
        let mut builder = self.http.request(method, url);
        match &request.body {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => builder = builder.body(text.clone()),
            Some(json) => builder = builder.json(json),
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => return ForwardResponse::failure(error_chain(&e)),
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                let mut resp = ForwardResponse::failure(error_chain(&e));
                resp.status = Some(status.as_u16());
                return resp;
            }
        };

        match decode_body(content_type.as_deref(), &bytes) {
            Ok(data) => ForwardResponse {
                error: (!status.is_success()).then(|| format!("relay returned HTTP {status}")),
                data: Some(data),
                status: Some(status.as_u16()),
                id: None,
            },
            Err(e) => ForwardResponse {
                error: Some(e),
                data: None,
                status: Some(status.as_u16()),
                id: None,
            },
        }
    }
}

fn parse_method(method: Option<&str>) -> Result<reqwest::Method, String> {
    let Some(m) = method.map(str::trim).filter(|m| !m.is_empty()) else {
        return Ok(reqwest::Method::GET);
    };
    reqwest::Method::from_bytes(m.to_ascii_uppercase().as_bytes())
        .map_err(|_| format!("invalid HTTP method '{m}'"))
}

/// Whether a content type declares a JSON body.
pub fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// Turn a response body into the `data` value handed to the page.
pub fn decode_body(content_type: Option<&str>, body: &[u8]) -> Result<Value, String> {
    if content_type.is_some_and(is_json_content_type) {
        if body.is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_slice(body)
            .map_err(|e| format!("EncodingFailure: response declared JSON but did not parse: {e}"));
    }
    Ok(Value::String(
        base64::engine::general_purpose::STANDARD.encode(body),
    ))
}

/// Render an error with its sources, e.g. `error sending request: tcp connect
/// error: Connection refused`. Sources already contained in the outer
/// message are skipped.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        let text = s.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = s.source();
    }
    out
}
