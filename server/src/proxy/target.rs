//! Target URL extraction from tunnel request paths.

use axum::http::Uri;
use reqwest::Url;

use super::ProxyError;

/// Which tunnel endpoint a request came in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelMode {
    Http,
    WebSocket,
}

impl TunnelMode {
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Http => "/proxy/http/",
            Self::WebSocket => "/proxy/ws/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
    Ws,
    Wss,
}

impl Scheme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Ws => "ws",
            Self::Wss => "wss",
        }
    }

    /// Resolve a raw scheme for the given tunnel mode. WebSocket tunnels also
    /// accept `http`/`https` and upgrade them to `ws`/`wss`.
    fn resolve(raw: &str, mode: TunnelMode) -> Result<Self, ProxyError> {
        let scheme = match (mode, raw.to_ascii_lowercase().as_str()) {
            (TunnelMode::Http, "http") => Self::Http,
            (TunnelMode::Http, "https") => Self::Https,
            (TunnelMode::WebSocket, "ws" | "http") => Self::Ws,
            (TunnelMode::WebSocket, "wss" | "https") => Self::Wss,
            _ => return Err(ProxyError::UnsupportedScheme(raw.to_string())),
        };
        Ok(scheme)
    }
}

/// A validated outbound target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    pub scheme: Scheme,
    pub url: Url,
}

impl TunnelTarget {
    /// Extract the target from the raw request URI. The raw path is used
    /// rather than a decoded path parameter so the target's own encoding is
    /// forwarded untouched.
    pub fn from_uri(uri: &Uri, mode: TunnelMode) -> Result<Self, ProxyError> {
        let raw = uri.path().strip_prefix(mode.prefix()).ok_or_else(|| {
            ProxyError::InvalidTarget(format!("path must start with {}", mode.prefix()))
        })?;
        Self::parse(raw, uri.query(), mode)
    }

    /// Parse `<scheme>://<host>/<path>` plus an optional query string.
    pub fn parse(raw: &str, query: Option<&str>, mode: TunnelMode) -> Result<Self, ProxyError> {
        let (raw_scheme, rest) = raw
            .split_once(':')
            .filter(|(s, _)| is_scheme(s))
            .ok_or_else(|| ProxyError::InvalidTarget(format!("missing scheme in '{raw}'")))?;
        let scheme = Scheme::resolve(raw_scheme, mode)?;

        // Path normalisers may collapse `https://` to `https:/`.
        let rest = rest.trim_start_matches('/');
        if rest.is_empty() || rest.starts_with('?') || rest.starts_with('#') {
            return Err(ProxyError::InvalidTarget("missing host".into()));
        }

        let mut target = format!("{}://{rest}", scheme.as_str());
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            target.push('?');
            target.push_str(q);
        }

        let url = Url::parse(&target)
            .map_err(|e| ProxyError::InvalidTarget(format!("{target}: {e}")))?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(ProxyError::InvalidTarget("missing host".into()));
        }
        Ok(Self { scheme, url })
    }

    #[must_use]
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Enforce `proxy.allowed_hosts`. An empty list allows everything.
    /// Entries match the bare host or `host:port`.
    pub fn check_allowed(&self, allowed: &[String]) -> Result<(), ProxyError> {
        if allowed.is_empty() {
            return Ok(());
        }
        let host = self.host();
        let with_port = self
            .url
            .port_or_known_default()
            .map(|p| format!("{host}:{p}"));
        let permitted = allowed.iter().any(|entry| {
            entry.eq_ignore_ascii_case(host)
                || with_port
                    .as_deref()
                    .is_some_and(|hp| entry.eq_ignore_ascii_case(hp))
        });
        if permitted {
            Ok(())
        } else {
            Err(ProxyError::HostNotAllowed(host.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
