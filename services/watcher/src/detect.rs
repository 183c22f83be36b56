//! Detection seam and the built-in frame-difference backend.
//!
//! The production face model lives behind a vendor inference SDK and is out
//! of scope; [`Detector`] is the boundary it plugs into. The shipped
//! backend finds regions that changed since the previous frame, which is
//! enough to exercise the full pipeline end to end.

use crate::frame::{Frame, PixelRect};
use thiserror::Error;

/// Errors from a detection backend.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("inference failed: {0}")]
    Inference(String),
}

/// A detected subject.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
    /// Bounding box [x, y, width, height] normalized 0-1
    pub bbox: [f32; 4],
}

impl Detection {
    /// Scale the normalized box to pixel coordinates of a frame.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
        let [x, y, w, h] = self.bbox;

        PixelRect {
            x: (x.clamp(0.0, 1.0) * width as f32) as u32,
            y: (y.clamp(0.0, 1.0) * height as f32) as u32,
            width: (w.clamp(0.0, 1.0) * width as f32) as u32,
            height: (h.clamp(0.0, 1.0) * height as f32) as u32,
        }
    }
}

/// Detection backend run on every frame.
///
/// Implementations must treat the frame as read-only and ephemeral.
pub trait Detector: Send {
    /// Backend identifier for logs.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectError>;
}

/// Frame-difference backend.
///
/// Downsamples each frame to a coarse luma grid and compares it with the
/// previous grid; changed cells are merged into one bounding box whose
/// confidence is the fraction of changed cells inside the box.
pub struct FrameDiffDetector {
    grid: u32,
    pixel_threshold: u8,
    previous: Option<Vec<u8>>,
}

impl FrameDiffDetector {
    pub fn new(grid: u32, pixel_threshold: u8) -> Self {
        Self {
            grid: grid.max(2),
            pixel_threshold,
            previous: None,
        }
    }

    /// Coarse luma grid via nearest sampling.
    fn luma_grid(&self, frame: &Frame) -> Vec<u8> {
        let mut grid = Vec::with_capacity((self.grid * self.grid) as usize);

        for gy in 0..self.grid {
            for gx in 0..self.grid {
                let x = (gx * frame.width / self.grid).min(frame.width - 1);
                let y = (gy * frame.height / self.grid).min(frame.height - 1);
                let [r, g, b] = frame.pixel(x, y);

                // Integer BT.601 luma approximation
                let luma = (77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8;
                grid.push(luma as u8);
            }
        }

        grid
    }
}

impl Default for FrameDiffDetector {
    fn default() -> Self {
        Self::new(32, 24)
    }
}

impl Detector for FrameDiffDetector {
    fn name(&self) -> &'static str {
        "frame-diff"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        let current = self.luma_grid(frame);
        let Some(previous) = self.previous.replace(current.clone()) else {
            // First frame: nothing to compare against.
            return Ok(Vec::new());
        };

        let mut min_x = self.grid;
        let mut min_y = self.grid;
        let mut max_x = 0u32;
        let mut max_y = 0u32;
        let mut changed = 0u32;

        for gy in 0..self.grid {
            for gx in 0..self.grid {
                let i = (gy * self.grid + gx) as usize;
                if current[i].abs_diff(previous[i]) > self.pixel_threshold {
                    changed += 1;
                    min_x = min_x.min(gx);
                    min_y = min_y.min(gy);
                    max_x = max_x.max(gx);
                    max_y = max_y.max(gy);
                }
            }
        }

        if changed == 0 {
            return Ok(Vec::new());
        }

        let box_cells = (max_x - min_x + 1) * (max_y - min_y + 1);
        let confidence = changed as f32 / box_cells as f32;
        let grid = self.grid as f32;

        Ok(vec![Detection {
            confidence,
            bbox: [
                min_x as f32 / grid,
                min_y as f32 / grid,
                (max_x - min_x + 1) as f32 / grid,
                (max_y - min_y + 1) as f32 / grid,
            ],
        }])
    }
}

/// Backend returning a fixed result on every frame, for pipeline tests.
pub struct StubDetector {
    detections: Vec<Detection>,
}

impl StubDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        Ok(self.detections.clone())
    }
}
