//! Capture ingest from a TCP MJPEG byte stream.
//!
//! The capture agent writes back-to-back JPEG images with no framing of its
//! own, so frames are cut at the JPEG start (`FF D8`) and end (`FF D9`)
//! markers. Bytes before a start marker are discarded.

use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn, Instrument};

use super::frames::FrameChannel;
use crate::config::CaptureConfig;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Frames larger than this are assumed corrupt and thrown away.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 256 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Incremental SOI/EOI splitter.
pub struct MjpegSplitter {
    buf: BytesMut,
    max_frame: usize,
}

impl MjpegSplitter {
    #[must_use]
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame,
        }
    }

    /// Feed bytes and collect every frame they complete.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find_marker(&self.buf, SOI, 0) else {
                // Keep a trailing 0xFF, it may be the first half of a marker.
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                let discard = self.buf.len() - keep;
                self.buf.advance(discard);
                break;
            };
            if start > 0 {
                debug!(bytes = start, "skipping bytes before JPEG start marker");
                self.buf.advance(start);
            }

            match find_marker(&self.buf, EOI, SOI.len()) {
                Some(end) => frames.push(self.buf.split_to(end + EOI.len()).freeze()),
                None => {
                    if self.buf.len() > self.max_frame {
                        warn!(
                            bytes = self.buf.len(),
                            "no JPEG end marker within frame limit, resynchronising"
                        );
                        // Drop the stale start marker and look for the next one.
                        self.buf.advance(SOI.len());
                        continue;
                    }
                    break;
                }
            }
        }
        frames
    }

    /// Bytes held while waiting for the rest of a frame.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|i| i + from)
}

/// Spawn the reconnecting TCP capture task.
pub fn spawn_tcp_capture(config: CaptureConfig, frames: FrameChannel) -> tokio::task::JoinHandle<()> {
    let span = tracing::info_span!("capture", addr = %config.mjpeg_addr);
    tokio::spawn(capture_loop(config, frames).instrument(span))
}

/// Connect, read until the stream ends, reconnect with exponential backoff.
async fn capture_loop(config: CaptureConfig, frames: FrameChannel) {
    let initial = Duration::from_secs(config.reconnect_delay_secs.max(1));
    let max_delay = Duration::from_secs(config.reconnect_max_delay_secs.max(1));
    let mut delay = initial;

    loop {
        info!("connecting to capture source");
        match read_stream(&config.mjpeg_addr, &frames).await {
            Ok(0) => {
                warn!("capture source closed before sending a frame");
            }
            Ok(count) => {
                info!(frames = count, "capture source closed, reconnecting");
                delay = initial;
            }
            Err(e) => {
                warn!("capture error: {e}, reconnecting in {}s", delay.as_secs());
            }
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(max_delay);
    }
}

/// Read one connection to completion. Returns the number of frames published.
async fn read_stream(addr: &str, frames: &FrameChannel) -> std::io::Result<u64> {
    let mut stream = connect(addr, CONNECT_TIMEOUT).await?;
    info!("capture source connected");

    let mut splitter = MjpegSplitter::new(MAX_FRAME_BYTES);
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut published = 0u64;
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(published);
        }
        for frame in splitter.push(&chunk[..n]) {
            frames.publish(frame);
            published += 1;
        }
    }
}

async fn connect(addr: &str, limit: Duration) -> std::io::Result<TcpStream> {
    tokio::time::timeout(limit, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {addr} timed out after {}ms", limit.as_millis()),
            )
        })?
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut v = SOI.to_vec();
        v.extend_from_slice(body);
        v.extend_from_slice(&EOI);
        v
    }

    #[test]
    fn splits_back_to_back_frames() {
        let mut s = MjpegSplitter::new(MAX_FRAME_BYTES);
        let mut stream = b"junk".to_vec();
        stream.extend(jpeg(b"one"));
        stream.extend(jpeg(b"two"));
        let frames = s.push(&stream);
        assert_eq!(frames, vec![Bytes::from(jpeg(b"one")), Bytes::from(jpeg(b"two"))]);
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn frame_split_across_chunks() {
        let mut s = MjpegSplitter::new(MAX_FRAME_BYTES);
        let data = jpeg(b"abcdef");
        // Byte-at-a-time so both markers straddle chunk boundaries.
        let mut frames = Vec::new();
        for b in &data {
            frames.extend(s.push(std::slice::from_ref(b)));
        }
        assert_eq!(frames, vec![Bytes::from(data)]);
    }

    #[test]
    fn end_marker_before_start_is_ignored() {
        let mut s = MjpegSplitter::new(MAX_FRAME_BYTES);
        let mut stream = EOI.to_vec();
        stream.extend(jpeg(b"x"));
        assert_eq!(s.push(&stream), vec![Bytes::from(jpeg(b"x"))]);
    }

    #[test]
    fn oversized_frame_is_discarded() {
        let mut s = MjpegSplitter::new(8);
        let mut stream = SOI.to_vec();
        stream.extend_from_slice(&[0u8; 32]);
        assert!(s.push(&stream).is_empty());
        assert_eq!(s.pending(), 0);
        assert_eq!(s.push(&jpeg(b"ok")), vec![Bytes::from(jpeg(b"ok"))]);
    }

    #[tokio::test]
    async fn tcp_capture_publishes_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let frames = FrameChannel::new();
        let mut rx = frames.subscribe();

        let task = spawn_tcp_capture(
            CaptureConfig {
                mjpeg_addr: addr,
                reconnect_delay_secs: 1,
                reconnect_max_delay_secs: 1,
            },
            frames.clone(),
        );

        let (mut conn, _) = listener.accept().await.unwrap();
        conn.write_all(&jpeg(b"frame-1")).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.payload, Bytes::from(jpeg(b"frame-1")));
        task.abort();
    }

    #[tokio::test]
    async fn unroutable_source_fails_within_connect_timeout() {
        // TEST-NET-1 is never routed; the attempt either hangs until the
        // limit or fails fast with "unreachable".
        let started = std::time::Instant::now();
        let result = connect("192.0.2.1:9", Duration::from_millis(200)).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
