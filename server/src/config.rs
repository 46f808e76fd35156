//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `UIDEV_LISTEN`, `UIDEV_BACKEND`,
//!    `UIDEV_CONTROL_ADDR`, `UIDEV_CAPTURE_ADDR`
//! 2. **Config file** — path via `--config <path>`, or `uidev.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:20242"
//! publish_port = true          # record the bound port in the settings store
//!
//! [proxy]
//! connect_timeout_secs = 10
//! response_timeout_secs = 30
//! max_request_body_bytes = 67108864
//! allowed_hosts = []           # empty = forward to any host
//!
//! [device]
//! width = 1080
//! height = 1920
//! backend = "mock"             # "mock" | "forward"
//! control_addr = "127.0.0.1:7912"  # forward backend only
//! command_queue = 256
//!
//! # Optional — omit to rely on /ws/capture pushes only
//! [capture]
//! mjpeg_addr = "127.0.0.1:9100"
//! reconnect_delay_secs = 2
//! reconnect_max_delay_secs = 30
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Default relay port, also the fallback the bridge uses when no port was
/// ever published.
pub const DEFAULT_PORT: u16 = uidev_bridge::settings::DEFAULT_RELAY_PORT;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    /// Optional MJPEG capture source.
    pub capture: Option<CaptureConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `127.0.0.1:20242`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Write the bound port to the shared settings store (default true).
    #[serde(default = "default_publish_port")]
    pub publish_port: bool,
}

/// Generic tunnel proxy settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Bound on outbound connection establishment, HTTP and WS (default 10).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Bound on waiting for upstream response headers (default 30). Body
    /// streaming is not bounded.
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
    /// Largest inbound request body forwarded upstream (default 64 MiB).
    #[serde(default = "default_max_request_body")]
    pub max_request_body_bytes: usize,
    /// Hosts the proxy may reach. Empty means any host.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

/// Which device-control backend consumes the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Log and record commands; no device attached.
    Mock,
    /// Write each command as a JSON line to `device.control_addr`.
    Forward,
}

impl BackendKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Forward => "forward",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "forward" => Ok(Self::Forward),
            other => Err(ConfigError::Invalid(format!("unknown backend '{other}'"))),
        }
    }
}

/// Mirrored device geometry and control backend.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Native screen width in pixels (default 1080).
    #[serde(default = "default_width")]
    pub width: u32,
    /// Native screen height in pixels (default 1920).
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    /// TCP address of the device-control agent (forward backend).
    pub control_addr: Option<String>,
    /// Capacity of the command queue in front of the backend (default 256).
    #[serde(default = "default_command_queue")]
    pub command_queue: usize,
}

/// TCP MJPEG capture source.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    pub mjpeg_addr: String,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_listen() -> String {
    format!("127.0.0.1:{DEFAULT_PORT}")
}
fn default_publish_port() -> bool {
    true
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_response_timeout() -> u64 {
    30
}
fn default_max_request_body() -> usize {
    64 * 1024 * 1024
}
fn default_width() -> u32 {
    1080
}
fn default_height() -> u32 {
    1920
}
fn default_backend() -> BackendKind {
    BackendKind::Mock
}
fn default_command_queue() -> usize {
    256
}
fn default_reconnect_delay() -> u64 {
    2
}
fn default_reconnect_max_delay() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            publish_port: default_publish_port(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            response_timeout_secs: default_response_timeout(),
            max_request_body_bytes: default_max_request_body(),
            allowed_hosts: Vec::new(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            backend: default_backend(),
            control_addr: None,
            command_queue: default_command_queue(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise `uidev.toml` in the
    /// current directory is used when present.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new("uidev.toml").exists() => Self::from_file("uidev.toml")?,
            None => Config::default(),
        };

        if let Ok(listen) = std::env::var("UIDEV_LISTEN") {
            config.server.listen = listen;
        }
        if let Ok(backend) = std::env::var("UIDEV_BACKEND") {
            config.device.backend = backend.parse()?;
        }
        if let Ok(addr) = std::env::var("UIDEV_CONTROL_ADDR") {
            config.device.control_addr = Some(addr);
        }
        if let Ok(addr) = std::env::var("UIDEV_CAPTURE_ADDR") {
            match config.capture.as_mut() {
                Some(capture) => capture.mjpeg_addr = addr,
                None => {
                    config.capture = Some(CaptureConfig {
                        mjpeg_addr: addr,
                        reconnect_delay_secs: default_reconnect_delay(),
                        reconnect_max_delay_secs: default_reconnect_max_delay(),
                    });
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.device.width == 0 || self.device.height == 0 {
            return Err(ConfigError::Invalid(
                "device.width and device.height must be non-zero".into(),
            ));
        }
        if self.device.command_queue == 0 {
            return Err(ConfigError::Invalid(
                "device.command_queue must be at least 1".into(),
            ));
        }
        if self.device.backend == BackendKind::Forward && self.device.control_addr.is_none() {
            return Err(ConfigError::Invalid(
                "device.backend = \"forward\" requires device.control_addr".into(),
            ));
        }
        Ok(())
    }
}
