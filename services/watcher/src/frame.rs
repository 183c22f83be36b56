//! Owned RGB frame buffers and the pixel operations the pipeline needs.
//!
//! Frames are plain CPU buffers; every operation copies or rewrites in
//! place, so ownership transfers at stage boundaries never alias.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use std::time::Instant;
use thiserror::Error;

/// Bytes per pixel (RGB24).
const CHANNELS: usize = 3;

/// Errors from frame construction and pixel operations.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame dimensions {width}x{height} do not match {len} bytes")]
    DimensionMismatch { width: u32, height: u32, len: usize },

    #[error("crop region is empty or outside the frame")]
    EmptyRegion,

    #[error("JPEG encoding failed: {0}")]
    Encode(String),
}

/// A rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A decoded RGB24 frame owned by exactly one pipeline stage at a time.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Frame sequence number within the stream
    pub sequence: u64,
    /// Timestamp when the frame was captured
    pub captured_at: Instant,
}

impl Frame {
    /// Wrap an RGB24 buffer, checking that it matches the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected || width == 0 || height == 0 {
            return Err(FrameError::DimensionMismatch {
                width,
                height,
                len: data.len(),
            });
        }

        Ok(Self {
            data,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        })
    }

    /// A frame with every channel set to `value`.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            data: vec![value; width as usize * height as usize * CHANNELS],
            width,
            height,
            sequence: 0,
            captured_at: Instant::now(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * CHANNELS
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = self.offset(x, y);
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        let i = self.offset(x, y);
        self.data[i..i + CHANNELS].copy_from_slice(&rgb);
    }

    /// Rotate the frame 180 degrees in place, for upside-down mounts.
    pub fn flip180(&mut self) {
        self.data.reverse();
        // Reversing the byte buffer also reversed each pixel's channels.
        for pixel in self.data.chunks_exact_mut(CHANNELS) {
            pixel.reverse();
        }
    }

    /// Nearest-neighbor resize into a new frame.
    pub fn resized(&self, dst_width: u32, dst_height: u32) -> Frame {
        let mut output = vec![0u8; dst_width as usize * dst_height as usize * CHANNELS];

        let x_ratio = self.width as f32 / dst_width as f32;
        let y_ratio = self.height as f32 / dst_height as f32;

        for y in 0..dst_height {
            for x in 0..dst_width {
                let src_x = ((x as f32 * x_ratio) as u32).min(self.width - 1);
                let src_y = ((y as f32 * y_ratio) as u32).min(self.height - 1);

                let src_idx = self.offset(src_x, src_y);
                let dst_idx = (y as usize * dst_width as usize + x as usize) * CHANNELS;

                output[dst_idx..dst_idx + CHANNELS]
                    .copy_from_slice(&self.data[src_idx..src_idx + CHANNELS]);
            }
        }

        Frame {
            data: output,
            width: dst_width,
            height: dst_height,
            sequence: self.sequence,
            captured_at: self.captured_at,
        }
    }

    /// Copy a region out into a new frame. The region is clipped to the
    /// frame; a region entirely outside it is an error.
    pub fn crop(&self, region: &PixelRect) -> Result<Frame, FrameError> {
        let x0 = region.x.min(self.width);
        let y0 = region.y.min(self.height);
        let x1 = region.x.saturating_add(region.width).min(self.width);
        let y1 = region.y.saturating_add(region.height).min(self.height);

        if x1 <= x0 || y1 <= y0 {
            return Err(FrameError::EmptyRegion);
        }

        let (crop_width, crop_height) = (x1 - x0, y1 - y0);
        let mut output = Vec::with_capacity(crop_width as usize * crop_height as usize * CHANNELS);

        for y in y0..y1 {
            let start = self.offset(x0, y);
            let end = self.offset(x1 - 1, y) + CHANNELS;
            output.extend_from_slice(&self.data[start..end]);
        }

        Ok(Frame {
            data: output,
            width: crop_width,
            height: crop_height,
            sequence: self.sequence,
            captured_at: self.captured_at,
        })
    }

    /// Copy `other` into this frame with its top-left corner at
    /// (x_offset, y_offset), clipping at the edges.
    pub fn blit(&mut self, other: &Frame, x_offset: u32, y_offset: u32) {
        let copy_width = other.width.min(self.width.saturating_sub(x_offset));
        let copy_height = other.height.min(self.height.saturating_sub(y_offset));

        for y in 0..copy_height {
            let src_start = other.offset(0, y);
            let src_end = src_start + copy_width as usize * CHANNELS;
            let dst_start = self.offset(x_offset, y_offset + y);
            let dst_end = dst_start + copy_width as usize * CHANNELS;

            self.data[dst_start..dst_end].copy_from_slice(&other.data[src_start..src_end]);
        }
    }

    /// Draw a rectangle outline of the given thickness, clipped to the frame.
    pub fn draw_box(&mut self, region: &PixelRect, color: [u8; 3], thickness: u32) {
        let x0 = region.x.min(self.width);
        let y0 = region.y.min(self.height);
        let x1 = region.x.saturating_add(region.width).min(self.width);
        let y1 = region.y.saturating_add(region.height).min(self.height);

        if x1 <= x0 || y1 <= y0 {
            return;
        }

        for y in y0..y1 {
            for x in x0..x1 {
                let on_edge = x < x0 + thickness
                    || x >= x1.saturating_sub(thickness)
                    || y < y0 + thickness
                    || y >= y1.saturating_sub(thickness);

                if on_edge {
                    self.set_pixel(x, y, color);
                }
            }
        }
    }

    /// Encode the frame as JPEG at the given quality.
    pub fn to_jpeg(&self, quality: u8) -> Result<Bytes, FrameError> {
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);

        encoder
            .encode(
                &self.data,
                self.width,
                self.height,
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| FrameError::Encode(e.to_string()))?;

        Ok(Bytes::from(out))
    }
}
