//! Last-value-wins frame broadcast.
//!
//! The capture side publishes into a single `watch` slot; every viewer holds
//! a receiver and reads whatever is newest when it is ready to send. A slow
//! viewer therefore skips intermediate frames instead of queueing them, and
//! the publisher never waits on anyone.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::watch;

/// One compressed image, immutable once published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Strictly increasing per channel, starting at 1.
    pub seq: u64,
    pub payload: Bytes,
    /// Wall-clock publish time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

/// Handle to the shared frame slot. Cheap to clone.
#[derive(Clone)]
pub struct FrameChannel {
    slot: Arc<watch::Sender<Option<Arc<Frame>>>>,
    next_seq: Arc<AtomicU64>,
    viewers: Arc<AtomicUsize>,
}

impl FrameChannel {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            slot: Arc::new(tx),
            next_seq: Arc::new(AtomicU64::new(1)),
            viewers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replace the current frame. Never blocks and succeeds with or without
    /// viewers attached.
    pub fn publish(&self, payload: Bytes) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let frame = Arc::new(Frame {
            seq,
            payload,
            timestamp_ms: now_ms(),
        });
        // Concurrent publishers may race; keep whichever carries the higher seq.
        self.slot.send_if_modified(|current| match current {
            Some(existing) if existing.seq > seq => false,
            _ => {
                *current = Some(frame);
                true
            }
        });
        seq
    }

    /// Newest frame, if any was ever published.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot.borrow().clone()
    }

    /// Sequence number of the newest frame, 0 before the first publish.
    #[must_use]
    pub fn latest_seq(&self) -> u64 {
        self.slot.borrow().as_ref().map_or(0, |f| f.seq)
    }

    /// Attach a viewer. The current frame, when one exists, is delivered first.
    #[must_use]
    pub fn subscribe(&self) -> FrameReceiver {
        let mut rx = self.slot.subscribe();
        if rx.borrow().is_some() {
            rx.mark_changed();
        }
        self.viewers.fetch_add(1, Ordering::Relaxed);
        FrameReceiver {
            rx,
            viewers: self.viewers.clone(),
        }
    }

    /// Number of attached viewers.
    #[must_use]
    pub fn viewer_count(&self) -> usize {
        self.viewers.load(Ordering::Relaxed)
    }
}

impl Default for FrameChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// A single viewer's view of the frame slot.
pub struct FrameReceiver {
    rx: watch::Receiver<Option<Arc<Frame>>>,
    viewers: Arc<AtomicUsize>,
}

impl FrameReceiver {
    /// Wait for a frame newer than the last one returned.
    ///
    /// Returns `None` only when the channel itself has been dropped.
    pub async fn next(&mut self) -> Option<Arc<Frame>> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        self.viewers.fetch_sub(1, Ordering::Relaxed);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn late_viewer_gets_current_frame_immediately() {
        let channel = FrameChannel::new();
        channel.publish(Bytes::from_static(b"a"));
        channel.publish(Bytes::from_static(b"b"));

        let mut rx = channel.subscribe();
        let frame = tokio::time::timeout(Duration::from_millis(100), rx.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.seq, 2);
        assert_eq!(frame.payload, Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn viewer_before_first_frame_waits() {
        let channel = FrameChannel::new();
        let mut rx = channel.subscribe();
        assert!(tokio::time::timeout(Duration::from_millis(20), rx.next())
            .await
            .is_err());
        channel.publish(Bytes::from_static(b"x"));
        assert_eq!(rx.next().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn publish_without_viewers_does_not_block() {
        let channel = FrameChannel::new();
        for i in 0..10_000u32 {
            channel.publish(Bytes::from(i.to_le_bytes().to_vec()));
        }
        assert_eq!(channel.latest_seq(), 10_000);
    }

    #[tokio::test]
    async fn slow_viewer_skips_but_never_reorders() {
        let channel = FrameChannel::new();
        let mut rx = channel.subscribe();
        let total = 200u64;

        let producer = {
            let channel = channel.clone();
            tokio::spawn(async move {
                for i in 0..total {
                    channel.publish(Bytes::from(i.to_be_bytes().to_vec()));
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
        };

        let mut seen = Vec::new();
        loop {
            let frame = rx.next().await.unwrap();
            seen.push(frame.seq);
            if frame.seq == total {
                break;
            }
            // Consume roughly one frame for every five produced.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        producer.await.unwrap();

        assert!(seen.windows(2).all(|w| w[0] < w[1]), "out of order: {seen:?}");
        assert_eq!(*seen.last().unwrap(), total);
        assert!(seen.len() < usize::try_from(total).unwrap());
    }

    #[test]
    fn viewer_count_tracks_receivers() {
        let channel = FrameChannel::new();
        let a = channel.subscribe();
        let b = channel.subscribe();
        assert_eq!(channel.viewer_count(), 2);
        drop(a);
        assert_eq!(channel.viewer_count(), 1);
        drop(b);
        assert_eq!(channel.viewer_count(), 0);
    }
}
