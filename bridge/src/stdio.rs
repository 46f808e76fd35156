//! JSON-lines loop used when the bridge runs as a native-messaging style
//! helper: one [`ForwardRequest`] per stdin line, one [`ForwardResponse`]
//! per stdout line, in order.

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::client::RelayClient;
use crate::message::{ForwardRequest, ForwardResponse};

/// Serve requests from stdin until EOF.
pub async fn run_stdio(client: &RelayClient) {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    run_lines(client, stdin, &mut stdout).await;
}

/// Line loop over arbitrary streams; lines that do not parse get an error
/// response instead of ending the loop.
pub async fn run_lines<R, W>(client: &RelayClient, mut reader: R, writer: &mut W)
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("uidev-bridge: stdin read error: {e}");
                break;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ForwardRequest>(trimmed) {
            Ok(request) => client.forward(&request).await,
            Err(e) => ForwardResponse::failure(format!("invalid request: {e}")),
        };
        write_line(writer, &response).await;
    }
}

pub async fn write_line<W, T>(writer: &mut W, value: &T)
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut output = serde_json::to_string(value).unwrap_or_default();
    output.push('\n');
    if let Err(e) = writer.write_all(output.as_bytes()).await {
        eprintln!("uidev-bridge: stdout write error: {e}");
    }
    if let Err(e) = writer.flush().await {
        eprintln!("uidev-bridge: stdout flush error: {e}");
    }
}
