//! Device mirroring: frames out to viewers, gestures back to the device.
//!
//! ```text
//! capture (tcp mjpeg | /ws/capture) ──► FrameChannel ──► /ws/frames, /ws/mirror
//! /ws/commands, /ws/mirror ──► CommandSession ──► queue ──► ControlBackend
//!                               (map + classify)
//! ```

pub mod backend;
pub mod capture;
pub mod command;
pub mod frames;
pub mod geometry;
pub mod gesture;
pub mod ws;

pub use backend::{BackendError, CommandLog, ControlBackend};
pub use command::{CommandSender, DeviceCommand, ProtocolError};
pub use frames::{Frame, FrameChannel};
pub use geometry::{map_to_device, CanvasSize, DeviceGeometry, DevicePoint, GeometryError};
pub use gesture::{GestureClassifier, GestureCommand};
