//! Local display sink with latest-frame-wins semantics.
//!
//! The pipeline publishes encoded frames into a single shared slot; a
//! dedicated blocking worker rewrites the newest frame to the sink path.
//! The sink path is expected to be a FIFO opened by a local viewer
//! (`mplayer -demuxer lavf /tmp/porter.mjpeg` style), so opening and
//! writing block until a consumer attaches. The slot has one writer (the
//! pipeline) and one reader (the worker); neither ever waits on the other.

use crate::frame::{Frame, FrameError};
use bytes::Bytes;
use parking_lot::RwLock;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Placeholder JPEG quality for display frames.
const DISPLAY_QUALITY: u8 = 80;

/// Shared state between the pipeline and the writer worker.
struct DisplaySlot {
    frame: RwLock<Bytes>,
    running: AtomicBool,
}

/// Handle owned by the pipeline side.
#[derive(Clone)]
pub struct DisplaySink {
    slot: Arc<DisplaySlot>,
}

impl DisplaySink {
    /// Create a sink holding a blank placeholder until the first publish.
    pub fn new() -> Result<Self, FrameError> {
        let placeholder = Frame::filled(640, 480, 255).to_jpeg(DISPLAY_QUALITY)?;

        Ok(Self {
            slot: Arc::new(DisplaySlot {
                frame: RwLock::new(placeholder),
                running: AtomicBool::new(true),
            }),
        })
    }

    /// Replace the slot content. Older unread frames are simply lost.
    pub fn publish(&self, jpeg: Bytes) {
        *self.slot.frame.write() = jpeg;
    }

    /// Latest published frame (worker side, and tests).
    pub fn latest(&self) -> Bytes {
        self.slot.frame.read().clone()
    }

    /// Request the writer to stop. Takes effect once its current blocking
    /// write returns.
    pub fn stop(&self) {
        self.slot.running.store(false, Ordering::SeqCst);
    }

    /// Spawn the blocking writer worker for `path`.
    pub fn spawn_writer(&self, path: PathBuf) -> tokio::task::JoinHandle<()> {
        let slot = self.slot.clone();

        tokio::task::spawn_blocking(move || {
            info!(path = %path.display(), "Display writer started");
            write_loop(&slot, &path);
            info!("Display writer stopped");
        })
    }
}

/// Continuously rewrite the latest frame to the sink.
///
/// Open blocks until a consumer attaches when the path is a FIFO; write
/// failures drop the consumer and we go back to waiting for the next one.
fn write_loop(slot: &DisplaySlot, path: &std::path::Path) {
    while slot.running.load(Ordering::SeqCst) {
        let mut sink = match std::fs::OpenOptions::new().write(true).create(true).open(path) {
            Ok(file) => file,
            Err(e) => {
                warn!(error = %e, "Failed to open display sink, retrying");
                std::thread::sleep(Duration::from_millis(500));
                continue;
            }
        };

        debug!("Display consumer attached");

        while slot.running.load(Ordering::SeqCst) {
            let frame = slot.frame.read().clone();
            if sink.write_all(&frame).is_err() {
                debug!("Display consumer detached");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_holds_latest_publish() {
        let sink = DisplaySink::new().unwrap();

        sink.publish(Bytes::from_static(b"first"));
        sink.publish(Bytes::from_static(b"second"));

        assert_eq!(sink.latest(), Bytes::from_static(b"second"));
    }

    #[test]
    fn test_placeholder_is_a_jpeg() {
        let sink = DisplaySink::new().unwrap();
        let placeholder = sink.latest();

        assert_eq!(&placeholder[..2], &[0xff, 0xd8]);
    }

    #[tokio::test]
    async fn test_writer_stops_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.mjpeg");

        let sink = DisplaySink::new().unwrap();
        sink.publish(Bytes::from_static(b"frame"));

        let handle = sink.spawn_writer(path.clone());

        // Give the worker a moment to open the sink and write
        tokio::time::sleep(Duration::from_millis(10)).await;
        sink.stop();

        handle.await.unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
