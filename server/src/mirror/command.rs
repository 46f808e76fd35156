//! Viewer → device command channel.
//!
//! ## Message types (viewer → relay)
//!
//! | Type      | Fields                                                   | Effect                         |
//! |-----------|----------------------------------------------------------|--------------------------------|
//! | `touch`   | `action` = `normal`/`tap`, `long`, `double`; `x`, `y`    | tap variants at device coords  |
//! | `touch`   | `action` = `move`/`swipe`; `x1`, `y1`, `x2`, `y2`        | swipe at device coords         |
//! | `pointer` | `kind` = `down`/`up`; `x`, `y`, `canvasWidth`, `canvasHeight` | mapped + classified       |
//! | `key`     | `code` (Android key code) or `key` = `home`/`back`/`recents`/`wake` | key press           |
//! | `keyEvent`| `eventNumber`, top level or under `data`                  | key press                      |
//! | `ping`    | —                                                        | `pong` reply                   |
//!
//! Device coordinates are clamped into the configured geometry. Malformed
//! messages produce an `error` reply and the connection stays open. Accepted
//! commands go to a bounded queue drained by the control backend; when the
//! queue is full the command is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::geometry::{map_to_device, CanvasSize, DeviceGeometry, GeometryError};
use super::gesture::{GestureClassifier, GestureCommand, PointerEvent, PointerKind};

/// Android key codes understood by name.
pub const KEY_HOME: u32 = 3;
pub const KEY_BACK: u32 = 4;
pub const KEY_RECENTS: u32 = 187;
pub const KEY_WAKE: u32 = 224;

/// A rejected viewer message.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("message is not valid JSON")]
    InvalidJson,
    #[error("unknown message type '{0}'")]
    UnknownType(String),
    #[error("unknown touch action '{0}'")]
    UnknownAction(String),
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("field '{0}' has the wrong type or value")]
    InvalidField(&'static str),
    #[error("binary messages are not accepted, send JSON text")]
    BinaryMessage,
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

impl ProtocolError {
    /// Stable machine-readable code sent in `error` replies.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidJson => "INVALID_JSON",
            Self::UnknownType(_) => "UNKNOWN_TYPE",
            Self::UnknownAction(_) => "UNKNOWN_ACTION",
            Self::MissingField(_) => "MISSING_FIELD",
            Self::InvalidField(_) => "INVALID_FIELD",
            Self::BinaryMessage => "BINARY_MESSAGE",
            Self::Geometry(_) => "INVALID_GEOMETRY",
        }
    }

    /// The `error` message sent back to the viewer.
    #[must_use]
    pub fn to_message(&self) -> Value {
        json!({
            "type": "error",
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

/// Something the control backend executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Gesture(GestureCommand),
    Key { code: u32 },
}

impl DeviceCommand {
    /// Wire form written to the device-control agent.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Gesture(gesture) => {
                let mut value = serde_json::to_value(gesture).unwrap_or_else(|_| json!({}));
                value["type"] = json!("touch");
                value
            }
            Self::Key { code } => json!({"type": "key", "code": code}),
        }
    }
}

/// A parsed viewer message.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerMessage {
    /// Gesture already in device coordinates.
    Touch(GestureCommand),
    /// Raw pointer edge in canvas coordinates.
    Pointer {
        kind: PointerKind,
        x: f64,
        y: f64,
        canvas: CanvasSize,
    },
    Key { code: u32 },
    Ping,
}

/// Parse one text message, clamping device coordinates into `geometry`.
pub fn parse_message(text: &str, geometry: DeviceGeometry) -> Result<ViewerMessage, ProtocolError> {
    let parsed: Value = serde_json::from_str(text).map_err(|_| ProtocolError::InvalidJson)?;
    let msg_type = parsed["type"]
        .as_str()
        .ok_or(ProtocolError::MissingField("type"))?;

    match msg_type {
        "ping" => Ok(ViewerMessage::Ping),
        "touch" => parse_touch(&parsed, geometry).map(ViewerMessage::Touch),
        "pointer" => parse_pointer(&parsed),
        "key" => parse_key(&parsed),
        "keyEvent" => parse_key_event(&parsed),
        other => Err(ProtocolError::UnknownType(other.to_string())),
    }
}

fn parse_touch(parsed: &Value, geometry: DeviceGeometry) -> Result<GestureCommand, ProtocolError> {
    let action = parsed["action"]
        .as_str()
        .ok_or(ProtocolError::MissingField("action"))?;

    let point = |fx: &'static str, fy: &'static str| -> Result<(u32, u32), ProtocolError> {
        let p = geometry.clamp(device_coord(parsed, fx)?, device_coord(parsed, fy)?);
        Ok((p.x, p.y))
    };

    match action {
        "normal" | "tap" => {
            let (x, y) = point("x", "y")?;
            Ok(GestureCommand::Tap { x, y })
        }
        "long" => {
            let (x, y) = point("x", "y")?;
            Ok(GestureCommand::LongPress { x, y })
        }
        "double" => {
            let (x, y) = point("x", "y")?;
            Ok(GestureCommand::DoubleTap { x, y })
        }
        "move" | "swipe" => {
            let (x1, y1) = point("x1", "y1")?;
            let (x2, y2) = point("x2", "y2")?;
            Ok(GestureCommand::Swipe { x1, y1, x2, y2 })
        }
        other => Err(ProtocolError::UnknownAction(other.to_string())),
    }
}

fn parse_pointer(parsed: &Value) -> Result<ViewerMessage, ProtocolError> {
    let kind = match parsed["kind"].as_str() {
        Some("down") => PointerKind::Down,
        Some("up") => PointerKind::Up,
        Some(_) => return Err(ProtocolError::InvalidField("kind")),
        None => return Err(ProtocolError::MissingField("kind")),
    };
    let canvas = CanvasSize::new(
        number(parsed, "canvasWidth")?,
        number(parsed, "canvasHeight")?,
    )?;
    Ok(ViewerMessage::Pointer {
        kind,
        x: number(parsed, "x")?,
        y: number(parsed, "y")?,
        canvas,
    })
}

fn parse_key(parsed: &Value) -> Result<ViewerMessage, ProtocolError> {
    if let Some(code) = parsed.get("code") {
        let code = code
            .as_u64()
            .and_then(|c| u32::try_from(c).ok())
            .ok_or(ProtocolError::InvalidField("code"))?;
        return Ok(ViewerMessage::Key { code });
    }
    let code = match parsed["key"].as_str() {
        Some("home") => KEY_HOME,
        Some("back") => KEY_BACK,
        Some("recents") => KEY_RECENTS,
        Some("wake" | "power") => KEY_WAKE,
        Some(_) => return Err(ProtocolError::InvalidField("key")),
        None => return Err(ProtocolError::MissingField("code")),
    };
    Ok(ViewerMessage::Key { code })
}

/// `{"type":"keyEvent","eventNumber":N}`, or with the number nested under
/// `data` as the scrcpy viewer sends it.
fn parse_key_event(parsed: &Value) -> Result<ViewerMessage, ProtocolError> {
    let event = parsed
        .get("eventNumber")
        .or_else(|| parsed.get("data").and_then(|d| d.get("eventNumber")))
        .ok_or(ProtocolError::MissingField("eventNumber"))?;
    let code = event
        .as_u64()
        .and_then(|c| u32::try_from(c).ok())
        .ok_or(ProtocolError::InvalidField("eventNumber"))?;
    Ok(ViewerMessage::Key { code })
}

fn number(parsed: &Value, field: &'static str) -> Result<f64, ProtocolError> {
    match parsed.get(field) {
        None | Some(Value::Null) => Err(ProtocolError::MissingField(field)),
        Some(v) => v
            .as_f64()
            .filter(|n| n.is_finite())
            .ok_or(ProtocolError::InvalidField(field)),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn device_coord(parsed: &Value, field: &'static str) -> Result<i64, ProtocolError> {
    // Saturating float → int cast; the geometry clamp finishes the job.
    number(parsed, field).map(|n| n.floor() as i64)
}

/// Producer side of the bounded command queue.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<DeviceCommand>,
    accepted: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl CommandSender {
    /// Create the queue. The receiver belongs to the single backend consumer.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DeviceCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                accepted: Arc::new(AtomicU64::new(0)),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Enqueue without waiting. Returns false when the command was dropped.
    pub fn submit(&self, command: DeviceCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(command)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(?command, dropped, "command queue full, dropping command");
                false
            }
            Err(mpsc::error::TrySendError::Closed(command)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(?command, "control backend stopped, dropping command");
                false
            }
        }
    }

    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Per-connection command state: the gesture session plus the shared queue.
pub struct CommandSession {
    geometry: DeviceGeometry,
    classifier: GestureClassifier,
    commands: CommandSender,
}

impl CommandSession {
    #[must_use]
    pub fn new(geometry: DeviceGeometry, commands: CommandSender) -> Self {
        Self {
            geometry,
            classifier: GestureClassifier::new(),
            commands,
        }
    }

    /// Handle one text message. Returns the reply to send, if any.
    pub fn handle_text(&mut self, text: &str) -> Option<Value> {
        let message = match parse_message(text, self.geometry) {
            Ok(m) => m,
            Err(e) => {
                warn!(code = e.code(), "rejected viewer message: {e}");
                return Some(e.to_message());
            }
        };

        match message {
            ViewerMessage::Ping => return Some(json!({"type": "pong"})),
            ViewerMessage::Touch(gesture) => {
                debug!(?gesture, "touch command");
                self.commands.submit(DeviceCommand::Gesture(gesture));
            }
            ViewerMessage::Pointer { kind, x, y, canvas } => {
                let point = map_to_device(x, y, canvas, self.geometry);
                if let Some(gesture) = self.classifier.observe(PointerEvent { kind, point }) {
                    debug!(?gesture, "classified pointer gesture");
                    self.commands.submit(DeviceCommand::Gesture(gesture));
                }
            }
            ViewerMessage::Key { code } => {
                debug!(code, "key command");
                self.commands.submit(DeviceCommand::Key { code });
            }
        }
        None
    }
}

/// Reply to a binary message on a command socket; commands are JSON text only.
pub fn reject_binary(len: usize) -> Value {
    let e = ProtocolError::BinaryMessage;
    warn!(code = e.code(), len, "rejected viewer message: {e}");
    e.to_message()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> DeviceGeometry {
        DeviceGeometry::new(1080, 1920).unwrap()
    }

    #[test]
    fn parses_touch_actions() {
        let g = geometry();
        assert_eq!(
            parse_message(r#"{"type":"touch","action":"normal","x":10,"y":20}"#, g).unwrap(),
            ViewerMessage::Touch(GestureCommand::Tap { x: 10, y: 20 })
        );
        assert_eq!(
            parse_message(r#"{"type":"touch","action":"long","x":1.9,"y":2}"#, g).unwrap(),
            ViewerMessage::Touch(GestureCommand::LongPress { x: 1, y: 2 })
        );
        assert_eq!(
            parse_message(
                r#"{"type":"touch","action":"move","x1":0,"y1":0,"x2":5000,"y2":-3}"#,
                g
            )
            .unwrap(),
            ViewerMessage::Touch(GestureCommand::Swipe {
                x1: 0,
                y1: 0,
                x2: 1079,
                y2: 0
            })
        );
    }

    #[test]
    fn rejects_malformed_messages() {
        let g = geometry();
        assert_eq!(parse_message("not json", g), Err(ProtocolError::InvalidJson));
        assert_eq!(
            parse_message(r#"{"action":"tap"}"#, g),
            Err(ProtocolError::MissingField("type"))
        );
        assert_eq!(
            parse_message(r#"{"type":"touch","action":"pinch","x":1,"y":1}"#, g),
            Err(ProtocolError::UnknownAction("pinch".into()))
        );
        assert_eq!(
            parse_message(r#"{"type":"touch","action":"move","x1":1,"y1":1}"#, g),
            Err(ProtocolError::MissingField("x2"))
        );
        assert_eq!(
            parse_message(r#"{"type":"touch","action":"tap","x":"a","y":1}"#, g),
            Err(ProtocolError::InvalidField("x"))
        );
        assert!(matches!(
            parse_message(
                r#"{"type":"pointer","kind":"down","x":1,"y":1,"canvasWidth":0,"canvasHeight":5}"#,
                g
            ),
            Err(ProtocolError::Geometry(_))
        ));
    }

    #[test]
    fn parses_keys_by_code_and_name() {
        let g = geometry();
        assert_eq!(
            parse_message(r#"{"type":"key","code":187}"#, g).unwrap(),
            ViewerMessage::Key { code: KEY_RECENTS }
        );
        assert_eq!(
            parse_message(r#"{"type":"key","key":"home"}"#, g).unwrap(),
            ViewerMessage::Key { code: KEY_HOME }
        );
        assert!(parse_message(r#"{"type":"key","key":"volume"}"#, g).is_err());
    }

    #[test]
    fn parses_key_events_flat_and_nested() {
        let g = geometry();
        assert_eq!(
            parse_message(r#"{"type":"keyEvent","eventNumber":3}"#, g).unwrap(),
            ViewerMessage::Key { code: KEY_HOME }
        );
        assert_eq!(
            parse_message(r#"{"type":"keyEvent","data":{"eventNumber":4}}"#, g).unwrap(),
            ViewerMessage::Key { code: KEY_BACK }
        );
        assert_eq!(
            parse_message(r#"{"type":"keyEvent"}"#, g),
            Err(ProtocolError::MissingField("eventNumber"))
        );
        assert_eq!(
            parse_message(r#"{"type":"keyEvent","eventNumber":-1}"#, g),
            Err(ProtocolError::InvalidField("eventNumber"))
        );
    }

    #[test]
    fn session_replies_pong_and_errors() {
        let (tx, _rx) = CommandSender::channel(4);
        let mut session = CommandSession::new(geometry(), tx);
        assert_eq!(
            session.handle_text(r#"{"type":"ping"}"#),
            Some(json!({"type": "pong"}))
        );
        let err = session.handle_text("{").unwrap();
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], "INVALID_JSON");
        // The session keeps working after an error.
        assert_eq!(
            session.handle_text(r#"{"type":"touch","action":"tap","x":1,"y":1}"#),
            None
        );
    }

    #[test]
    fn binary_messages_get_an_error_reply() {
        let reply = reject_binary(12);
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "BINARY_MESSAGE");
    }

    #[tokio::test]
    async fn pointer_pair_becomes_mapped_swipe() {
        let (tx, mut rx) = CommandSender::channel(4);
        let mut session = CommandSession::new(geometry(), tx);
        // 270x480 canvas is an exact 1/4 scale of 1080x1920.
        session.handle_text(
            r#"{"type":"pointer","kind":"down","x":10,"y":10,"canvasWidth":270,"canvasHeight":480}"#,
        );
        session.handle_text(
            r#"{"type":"pointer","kind":"up","x":50,"y":60,"canvasWidth":270,"canvasHeight":480}"#,
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            DeviceCommand::Gesture(GestureCommand::Swipe {
                x1: 40,
                y1: 40,
                x2: 200,
                y2: 240
            })
        );
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let (tx, mut rx) = CommandSender::channel(2);
        for code in 0..5 {
            tx.submit(DeviceCommand::Key { code });
        }
        assert_eq!(tx.accepted(), 2);
        assert_eq!(tx.dropped(), 3);
        assert_eq!(rx.recv().await.unwrap(), DeviceCommand::Key { code: 0 });
        assert_eq!(rx.recv().await.unwrap(), DeviceCommand::Key { code: 1 });
    }

    #[test]
    fn device_command_wire_shape() {
        let tap = DeviceCommand::Gesture(GestureCommand::Tap { x: 3, y: 4 }).to_json();
        assert_eq!(tap, json!({"type": "touch", "action": "tap", "x": 3, "y": 4}));
        assert_eq!(
            DeviceCommand::Key { code: 4 }.to_json(),
            json!({"type": "key", "code": 4})
        );
    }
}
