//! uidev-bridge library: forwards requests from the browser extension to the
//! local relay and owns the shared settings file that tells it where the
//! relay listens.
//!
//! - `client` — HTTP forwarding with JSON/base64 body encoding
//! - `message` — request/response contract with the extension
//! - `settings` — persisted relay port
//! - `stdio` — JSON-lines loop for native-messaging style hosts
//! - `config` — command-line interface

pub mod client;
pub mod config;
pub mod message;
pub mod settings;
pub mod stdio;

pub use client::{error_chain, RelayClient};
pub use message::{ForwardRequest, ForwardResponse};
pub use settings::{Settings, SettingsError, SettingsStore, DEFAULT_RELAY_PORT};
