//! # uidev-bridge
//!
//! Extension-side adapter for the uidev relay. The browser extension hands
//! it requests from the hosted page; it forwards them to
//! `http://127.0.0.1:<port>` and returns `{error, data}` objects.
//!
//! ```text
//! uidev-bridge                       # stdio JSON-lines loop
//! uidev-bridge forward /api/info     # one-shot request
//! uidev-bridge set-port 20243        # persist the relay port
//! ```

use clap::Parser;
use serde_json::Value;
use uidev_bridge::config::{Cli, Command};
use uidev_bridge::{stdio, ForwardRequest, RelayClient};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let store = match cli.settings_store() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("uidev-bridge: configuration error: {e}");
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Command::Stdio) {
        Command::GetPort => match store.load() {
            Ok(s) => println!("{}", s.relay_port),
            Err(e) => {
                eprintln!("uidev-bridge: {e}");
                std::process::exit(1);
            }
        },
        Command::SetPort { port } => {
            if let Err(e) = store.save_port(port) {
                eprintln!("uidev-bridge: {e}");
                std::process::exit(1);
            }
            eprintln!(
                "uidev-bridge: relay port set to {port} in {}",
                store.path().display()
            );
        }
        Command::Forward { url, method, body } => {
            let client = build_client(store);
            let request = ForwardRequest {
                url,
                method,
                body: body.map(|b| serde_json::from_str(&b).unwrap_or(Value::String(b))),
                id: None,
            };
            let response = client.forward(&request).await;
            let failed = response.is_error();
            stdio::write_line(&mut tokio::io::stdout(), &response).await;
            if failed {
                std::process::exit(2);
            }
        }
        Command::Stdio => {
            let client = build_client(store);
            eprintln!(
                "uidev-bridge: forwarding to relay (settings {})",
                client.settings().path().display()
            );
            stdio::run_stdio(&client).await;
        }
    }
}

fn build_client(store: uidev_bridge::SettingsStore) -> RelayClient {
    match RelayClient::new(store) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("uidev-bridge: failed to build HTTP client: {e}");
            std::process::exit(1);
        }
    }
}
