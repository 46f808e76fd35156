//! Device-control backends: the single ordered consumer of the command queue.
//!
//! - `mock` logs every command and keeps an in-memory record of it.
//! - `forward` writes each command as one JSON line to a TCP device-control
//!   agent (`device.control_addr`). A failed write drops that command and the
//!   connection; the next command reconnects. Nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use super::command::DeviceCommand;
use crate::config::{BackendKind, DeviceConfig};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("forward backend needs a control address")]
    MissingAddr,
    #[error("failed to connect to control agent at {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("timed out connecting to control agent at {0}")]
    ConnectTimeout(String),
    #[error("failed to write command: {0}")]
    Write(#[from] std::io::Error),
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Shared record of commands seen by the mock backend.
#[derive(Clone, Default)]
pub struct CommandLog(Arc<Mutex<Vec<DeviceCommand>>>);

impl CommandLog {
    pub async fn snapshot(&self) -> Vec<DeviceCommand> {
        self.0.lock().await.clone()
    }

    async fn push(&self, command: DeviceCommand) {
        self.0.lock().await.push(command);
    }
}

pub enum ControlBackend {
    Mock(CommandLog),
    Forward {
        addr: String,
        conn: Option<BufWriter<TcpStream>>,
    },
}

impl ControlBackend {
    pub fn from_config(device: &DeviceConfig) -> Result<Self, BackendError> {
        match device.backend {
            BackendKind::Mock => Ok(Self::Mock(CommandLog::default())),
            BackendKind::Forward => {
                let addr = device.control_addr.clone().ok_or(BackendError::MissingAddr)?;
                Ok(Self::forward(addr))
            }
        }
    }

    #[must_use]
    pub fn forward(addr: String) -> Self {
        Self::Forward { addr, conn: None }
    }

    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Mock(_) => BackendKind::Mock,
            Self::Forward { .. } => BackendKind::Forward,
        }
    }

    /// Execute one command.
    pub async fn execute(&mut self, command: DeviceCommand) -> Result<(), BackendError> {
        match self {
            Self::Mock(log) => {
                info!(command = %command.to_json(), "mock backend received command");
                log.push(command).await;
                Ok(())
            }
            Self::Forward { addr, conn } => {
                let mut line = serde_json::to_vec(&command.to_json())?;
                line.push(b'\n');

                if conn.is_none() {
                    *conn = Some(connect(addr).await?);
                }
                let Some(writer) = conn.as_mut() else {
                    return Ok(());
                };
                let result = async {
                    writer.write_all(&line).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = result {
                    *conn = None;
                    return Err(BackendError::Write(e));
                }
                Ok(())
            }
        }
    }
}

async fn connect(addr: &str) -> Result<BufWriter<TcpStream>, BackendError> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| BackendError::ConnectTimeout(addr.to_string()))?
        .map_err(|source| BackendError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    stream.set_nodelay(true).ok();
    info!(addr, "connected to control agent");
    Ok(BufWriter::new(stream))
}

/// Drain the command queue in order until every sender is gone.
pub async fn run(mut rx: mpsc::Receiver<DeviceCommand>, mut backend: ControlBackend) {
    info!(backend = backend.kind().as_str(), "control backend started");
    while let Some(command) = rx.recv().await {
        if let Err(e) = backend.execute(command).await {
            warn!(?command, "command dropped: {e}");
        }
    }
    info!("control backend stopped");
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;
    use crate::mirror::command::CommandSender;
    use crate::mirror::gesture::GestureCommand;

    #[tokio::test]
    async fn mock_records_in_order() {
        let log = CommandLog::default();
        let (tx, rx) = CommandSender::channel(16);
        let task = tokio::spawn(run(rx, ControlBackend::Mock(log.clone())));

        tx.submit(DeviceCommand::Key { code: 3 });
        tx.submit(DeviceCommand::Gesture(GestureCommand::Tap { x: 1, y: 2 }));
        drop(tx);
        task.await.unwrap();

        assert_eq!(
            log.snapshot().await,
            vec![
                DeviceCommand::Key { code: 3 },
                DeviceCommand::Gesture(GestureCommand::Tap { x: 1, y: 2 }),
            ]
        );
    }

    #[tokio::test]
    async fn forward_writes_json_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut backend = ControlBackend::forward(addr);
        let reader = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            let mut out = Vec::new();
            for _ in 0..2 {
                out.push(lines.next_line().await.unwrap().unwrap());
            }
            out
        });

        backend
            .execute(DeviceCommand::Gesture(GestureCommand::Swipe {
                x1: 1,
                y1: 2,
                x2: 3,
                y2: 4,
            }))
            .await
            .unwrap();
        backend.execute(DeviceCommand::Key { code: 4 }).await.unwrap();

        let lines = reader.await.unwrap();
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["type"], "touch");
        assert_eq!(first["action"], "swipe");
        assert_eq!(first["x2"], 3);
        let second: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(second, serde_json::json!({"type": "key", "code": 4}));
    }

    #[tokio::test]
    async fn forward_to_closed_port_reports_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut backend = ControlBackend::forward(addr);
        let err = backend
            .execute(DeviceCommand::Key { code: 224 })
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Connect { .. }));
    }

    #[test]
    fn from_config_requires_addr_for_forward() {
        let mut device = DeviceConfig::default();
        assert_eq!(
            ControlBackend::from_config(&device).unwrap().kind(),
            BackendKind::Mock
        );
        device.backend = BackendKind::Forward;
        assert!(matches!(
            ControlBackend::from_config(&device),
            Err(BackendError::MissingAddr)
        ));
    }
}
