//! Pointer down/up pairs → tap or swipe.

use serde::Serialize;
use tracing::{debug, warn};

use super::geometry::DevicePoint;

/// Which edge of a pointer interaction an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Down,
    Up,
}

/// A pointer event already mapped to device coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEvent {
    pub kind: PointerKind,
    pub point: DevicePoint,
}

/// A classified gesture in device-native coordinates.
///
/// Serializes to the wire shape the command channel accepts, e.g.
/// `{"action":"tap","x":10,"y":10}` or
/// `{"action":"swipe","x1":10,"y1":10,"x2":50,"y2":60}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GestureCommand {
    Tap { x: u32, y: u32 },
    LongPress { x: u32, y: u32 },
    DoubleTap { x: u32, y: u32 },
    Swipe { x1: u32, y1: u32, x2: u32, y2: u32 },
}

/// Classify a completed interaction. Identical points are a tap, anything
/// else is a swipe from `down` to `up`.
#[must_use]
pub fn classify(down: DevicePoint, up: DevicePoint) -> GestureCommand {
    if down == up {
        GestureCommand::Tap { x: up.x, y: up.y }
    } else {
        GestureCommand::Swipe {
            x1: down.x,
            y1: down.y,
            x2: up.x,
            y2: up.y,
        }
    }
}

/// Per-connection gesture session. Holds at most one pending `down`.
#[derive(Debug, Default)]
pub struct GestureClassifier {
    pending_down: Option<DevicePoint>,
}

impl GestureClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one pointer event. Returns a command when an `up` closes a session.
    pub fn observe(&mut self, event: PointerEvent) -> Option<GestureCommand> {
        match event.kind {
            PointerKind::Down => {
                if let Some(stale) = self.pending_down.replace(event.point) {
                    debug!(?stale, "pointer down replaced an unfinished gesture");
                }
                None
            }
            PointerKind::Up => {
                let Some(down) = self.pending_down.take() else {
                    warn!(point = ?event.point, "pointer up without a preceding down, ignored");
                    return None;
                };
                Some(classify(down, event.point))
            }
        }
    }

    /// Whether a `down` is waiting for its `up`.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.pending_down.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: PointerKind, x: u32, y: u32) -> PointerEvent {
        PointerEvent {
            kind,
            point: DevicePoint::new(x, y),
        }
    }

    #[test]
    fn same_point_is_tap() {
        let mut g = GestureClassifier::new();
        assert_eq!(g.observe(ev(PointerKind::Down, 10, 10)), None);
        assert_eq!(
            g.observe(ev(PointerKind::Up, 10, 10)),
            Some(GestureCommand::Tap { x: 10, y: 10 })
        );
        assert!(!g.in_progress());
    }

    #[test]
    fn moved_point_is_swipe() {
        let mut g = GestureClassifier::new();
        g.observe(ev(PointerKind::Down, 10, 10));
        assert_eq!(
            g.observe(ev(PointerKind::Up, 50, 60)),
            Some(GestureCommand::Swipe {
                x1: 10,
                y1: 10,
                x2: 50,
                y2: 60
            })
        );
    }

    #[test]
    fn up_without_down_is_ignored() {
        let mut g = GestureClassifier::new();
        assert_eq!(g.observe(ev(PointerKind::Up, 0, 0)), None);
        assert_eq!(g.observe(ev(PointerKind::Up, 10, 10)), None);
    }

    #[test]
    fn session_is_discarded_after_one_command() {
        let mut g = GestureClassifier::new();
        g.observe(ev(PointerKind::Down, 1, 2));
        assert!(g.observe(ev(PointerKind::Up, 1, 2)).is_some());
        assert_eq!(g.observe(ev(PointerKind::Up, 1, 2)), None);
    }

    #[test]
    fn second_down_replaces_first() {
        let mut g = GestureClassifier::new();
        g.observe(ev(PointerKind::Down, 1, 1));
        g.observe(ev(PointerKind::Down, 5, 5));
        assert_eq!(
            g.observe(ev(PointerKind::Up, 5, 5)),
            Some(GestureCommand::Tap { x: 5, y: 5 })
        );
    }

    #[test]
    fn serializes_to_wire_shape() {
        let tap = serde_json::to_value(GestureCommand::Tap { x: 3, y: 4 }).unwrap();
        assert_eq!(tap, serde_json::json!({"action": "tap", "x": 3, "y": 4}));
        let swipe = serde_json::to_value(classify(DevicePoint::new(1, 2), DevicePoint::new(3, 4)))
            .unwrap();
        assert_eq!(swipe["action"], "swipe");
        assert_eq!(swipe["x2"], 3);
    }
}
