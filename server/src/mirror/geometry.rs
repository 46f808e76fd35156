//! Canvas → device coordinate mapping.
//!
//! The viewer draws the device screen into a canvas of arbitrary size,
//! preserving aspect ratio. One axis is filled edge to edge, the other is
//! centred with equal margins (letterboxing). Mapping a pointer back removes
//! the margin on the letterboxed axis and applies the single scale factor of
//! the filled axis, so neither axis is distorted.

use thiserror::Error;

/// Rejected sizes for either side of the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum GeometryError {
    #[error("device geometry must be non-zero, got {0}x{1}")]
    ZeroDevice(u32, u32),
    #[error("canvas size must be finite and positive, got {0}x{1}")]
    InvalidCanvas(f64, f64),
}

/// Native device resolution, fixed for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DeviceGeometry {
    pub width: u32,
    pub height: u32,
}

impl DeviceGeometry {
    pub fn new(width: u32, height: u32) -> Result<Self, GeometryError> {
        if width == 0 || height == 0 {
            return Err(GeometryError::ZeroDevice(width, height));
        }
        Ok(Self { width, height })
    }

    /// Clamp a device-space point into `[0, width) × [0, height)`.
    #[must_use]
    pub fn clamp(&self, x: i64, y: i64) -> DevicePoint {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let clamp_axis = |v: i64, max: u32| v.clamp(0, i64::from(max) - 1) as u32;
        DevicePoint {
            x: clamp_axis(x, self.width),
            y: clamp_axis(y, self.height),
        }
    }
}

/// Size of the viewer's rendering surface, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasSize {
    pub width: f64,
    pub height: f64,
}

impl CanvasSize {
    pub fn new(width: f64, height: f64) -> Result<Self, GeometryError> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(width) || !valid(height) {
            return Err(GeometryError::InvalidCanvas(width, height));
        }
        Ok(Self { width, height })
    }
}

/// A point in device-native pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct DevicePoint {
    pub x: u32,
    pub y: u32,
}

impl DevicePoint {
    #[must_use]
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Map a pointer position on the canvas to device-native pixels.
///
/// The device image fills the canvas width when the device is relatively
/// wider than the canvas (scale = device width / canvas width), otherwise it
/// fills the canvas height (scale = device height / canvas height). Output is
/// floor-truncated and clamped to the device bounds; non-finite input maps to
/// the nearest edge.
#[must_use]
pub fn map_to_device(
    canvas_x: f64,
    canvas_y: f64,
    canvas: CanvasSize,
    device: DeviceGeometry,
) -> DevicePoint {
    let dev_w = f64::from(device.width);
    let dev_h = f64::from(device.height);

    // Compare aspect ratios without dividing: dev_w/dev_h >= cw/ch.
    let fills_width = dev_w * canvas.height >= canvas.width * dev_h;
    let scale = if fills_width {
        dev_w / canvas.width
    } else {
        dev_h / canvas.height
    };

    // Size of the drawn image on the canvas and its centring margins.
    let drawn_w = dev_w / scale;
    let drawn_h = dev_h / scale;
    let margin_x = (canvas.width - drawn_w) / 2.0;
    let margin_y = (canvas.height - drawn_h) / 2.0;

    #[allow(clippy::cast_possible_truncation)]
    let to_axis = |v: f64, margin: f64, max: f64| -> i64 {
        let v = if v.is_nan() { 0.0 } else { v };
        ((v - margin) * scale).floor().max(0.0).min(max - 1.0) as i64
    };

    device.clamp(
        to_axis(canvas_x, margin_x, dev_w),
        to_axis(canvas_y, margin_y, dev_h),
    )
}
