//! Persisted relay settings shared by the relay (writer) and the bridge
//! (reader).
//!
//! The store is a small JSON file:
//!
//! ```json
//! { "relay_port": 20242 }
//! ```
//!
//! Location, first match wins:
//!
//! 1. `$UIDEV_SETTINGS`
//! 2. `<config dir>/uidev/settings.json` (`~/.config` on Linux,
//!    `~/Library/Application Support` on macOS, `%APPDATA%` on Windows)
//!
//! A missing file means "never configured" and yields the default port.
//! Unknown keys are preserved on write.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Port the relay listens on unless told otherwise.
pub const DEFAULT_RELAY_PORT: u16 = 20242;

/// Environment variable overriding the settings file location.
pub const SETTINGS_ENV: &str = "UIDEV_SETTINGS";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("no user config directory available; set {SETTINGS_ENV}")]
    NoConfigDir,
    #[error("failed to access settings file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("settings file {path} is not valid: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_relay_port")]
    pub relay_port: u16,
}

fn default_relay_port() -> u16 {
    DEFAULT_RELAY_PORT
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            relay_port: DEFAULT_RELAY_PORT,
        }
    }
}

/// Handle to the settings file. Every read goes back to disk.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve the store location from `$UIDEV_SETTINGS` or the platform
    /// config directory.
    pub fn default_location() -> Result<Self, SettingsError> {
        if let Some(path) = std::env::var_os(SETTINGS_ENV).filter(|p| !p.is_empty()) {
            return Ok(Self::new(path));
        }
        let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
        Ok(Self::new(dir.join("uidev").join("settings.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Settings, SettingsError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| SettingsError::Parse {
                path: self.display(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(source) => Err(SettingsError::Io {
                path: self.display(),
                source,
            }),
        }
    }

    /// Record the relay port. Writes to a sibling temp file and renames it
    /// into place so readers never see a partial file.
    pub fn save_port(&self, port: u16) -> Result<(), SettingsError> {
        let mut doc = match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice::<Map<String, Value>>(&bytes).unwrap_or_default(),
            Err(_) => Map::new(),
        };
        doc.insert("relay_port".to_string(), Value::from(port));

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        let mut contents =
            serde_json::to_vec_pretty(&doc).map_err(|source| SettingsError::Parse {
                path: self.display(),
                source,
            })?;
        contents.push(b'\n');

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).map_err(|source| self.io_error(source))?;
        std::fs::rename(&tmp, &self.path).map_err(|source| self.io_error(source))
    }

    fn display(&self) -> String {
        self.path.display().to_string()
    }

    fn io_error(&self, source: std::io::Error) -> SettingsError {
        SettingsError::Io {
            path: self.display(),
            source,
        }
    }
}
