//! Command-line interface for uidev-bridge.
//!
//! The settings file is resolved from (first match wins):
//!
//! 1. `--settings <path>`
//! 2. `UIDEV_SETTINGS`
//! 3. the platform config directory (see [`crate::settings`])

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::settings::{SettingsError, SettingsStore};

/// CLI arguments parsed by `clap`.
#[derive(Parser)]
#[command(
    name = "uidev-bridge",
    about = "Forward browser extension requests to the local uidev relay"
)]
pub struct Cli {
    /// Path to the shared settings file (JSON)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Read JSON request lines on stdin, write JSON response lines to stdout (default)
    Stdio,
    /// Forward a single request and print the response
    Forward {
        /// Relay path, e.g. `/api/info`
        url: String,
        /// HTTP method
        #[arg(short = 'X', long)]
        method: Option<String>,
        /// JSON body; a value that is not valid JSON is sent as raw text
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Print the relay port the bridge will use
    GetPort,
    /// Persist the relay port
    SetPort { port: u16 },
}

impl Cli {
    /// Open the settings store selected by the flags and environment.
    pub fn settings_store(&self) -> Result<SettingsStore, SettingsError> {
        match &self.settings {
            Some(path) => Ok(SettingsStore::new(expand_tilde(path))),
            None => SettingsStore::default_location(),
        }
    }
}

/// Expand a leading `~` to `$HOME`.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
