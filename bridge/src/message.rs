//! Request/response contract between the browser extension and the bridge.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One request from the hosted page, relayed by the extension.
///
/// `url` is a path on the relay, e.g. `/api/info` or
/// `/proxy/http/http://10.0.0.5:7912/info`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ForwardRequest {
    pub url: String,
    /// HTTP method, `GET` when absent.
    #[serde(default)]
    pub method: Option<String>,
    /// JSON body. A string is sent as raw text, anything else as JSON.
    #[serde(default)]
    pub body: Option<Value>,
    /// Opaque correlation id, echoed on the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// What the extension hands back to the page. Exactly one of `error` and
/// `data` is normally set; a non-2xx relay response carries both.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ForwardResponse {
    pub error: Option<String>,
    pub data: Option<Value>,
    /// HTTP status, when a response was received at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl ForwardResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            data: None,
            status: None,
            id: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: Option<Value>) -> Self {
        self.id = id;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
