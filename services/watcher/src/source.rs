//! Frame acquisition seam.
//!
//! The production camera is a vendor SDK; everything behind it is reached
//! through [`FrameSource`]. The synthetic source stands in for the device
//! during development and in tests.

use crate::frame::Frame;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while acquiring frames.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to get frame from the stream: {0}")]
    Acquisition(String),

    #[error("stream ended")]
    Exhausted,
}

/// A source of decoded RGB frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Source identifier for logs.
    fn name(&self) -> &'static str;

    /// Acquire the next frame, pacing the stream as the device would.
    async fn next_frame(&mut self) -> Result<Frame, SourceError>;
}

/// Synthetic camera: a light background with a dark block sweeping across,
/// so the frame-difference detector always has something to find.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    interval: Duration,
    sequence: u64,
}

impl SyntheticSource {
    const SWEEP_STEPS: u64 = 32;

    pub fn new(width: u32, height: u32, fps: f32) -> Self {
        Self {
            width,
            height,
            interval: Duration::from_secs_f32(1.0 / fps),
            sequence: 0,
        }
    }

    fn render(&self) -> Frame {
        let mut frame = Frame::filled(self.width, self.height, 220);

        let block_width = (self.width / 6).max(1);
        let block_height = (self.height / 4).max(1);
        let step = (self.sequence % Self::SWEEP_STEPS) as u32;
        let x0 = (self.width - block_width) * step / (Self::SWEEP_STEPS as u32 - 1);
        let y0 = (self.height - block_height) / 2;

        for y in y0..(y0 + block_height).min(self.height) {
            for x in x0..(x0 + block_width).min(self.width) {
                frame.set_pixel(x, y, [32, 48, 64]);
            }
        }

        frame.sequence = self.sequence;
        frame
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        tokio::time::sleep(self.interval).await;

        let frame = self.render();
        self.sequence += 1;

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synthetic_source_produces_valid_frames() {
        let mut source = SyntheticSource::new(64, 48, 1000.0);

        let first = source.next_frame().await.unwrap();
        let second = source.next_frame().await.unwrap();

        assert_eq!(first.width, 64);
        assert_eq!(first.height, 48);
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        // The block moved, so the frames differ
        assert_ne!(first.data(), second.data());
    }
}
