//! The inference loop: acquire, detect, annotate, fan out to sinks.
//!
//! The loop runs until an unhandled fault occurs, at which point the whole
//! process terminates; there is no restart or partial-failure recovery
//! inside the pipeline. Neither sink can block the loop: the display slot
//! is latest-frame-wins and the upload handoff drops crops while a
//! previous upload is in flight.

use crate::config::Config;
use crate::detect::{DetectError, Detector};
use crate::display::DisplaySink;
use crate::frame::{Frame, FrameError};
use crate::source::{FrameSource, SourceError};
use crate::upload::CropUploader;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Annotation box color (RGB).
const BOX_COLOR: [u8; 3] = [255, 165, 20];

/// Errors that terminate the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("frame acquisition failed: {0}")]
    Source(#[from] SourceError),

    #[error("detection failed: {0}")]
    Detect(#[from] DetectError),

    #[error("frame processing failed: {0}")]
    Frame(#[from] FrameError),
}

/// Pipeline settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub upside_down: bool,
    pub threshold: f32,
    pub crop_cooldown: Duration,
    pub overlay: bool,
    pub box_thickness: u32,
    /// Display resize target; None streams full resolution.
    pub stream_dimensions: Option<(u32, u32)>,
    pub display_quality: u8,
    pub upload_quality: u8,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            upside_down: config.camera.upside_down,
            threshold: config.detection.threshold,
            crop_cooldown: Duration::from_secs_f32(config.detection.crop_cooldown_secs),
            overlay: config.detection.overlay,
            box_thickness: config.detection.box_thickness,
            stream_dimensions: if config.display.fullres {
                None
            } else {
                config.display.stream_dimensions()
            },
            display_quality: config.display.jpeg_quality,
            upload_quality: config.s3.jpeg_quality,
        }
    }
}

/// Statistics for the pipeline.
#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub detections_seen: u64,
    pub crops_offered: u64,
    pub crops_dropped_in_flight: u64,
    pub crops_skipped_cooldown: u64,
}

/// The producer side of the frame pipeline.
pub struct Pipeline {
    source: Box<dyn FrameSource>,
    detector: Box<dyn Detector>,
    display: DisplaySink,
    uploader: CropUploader,
    settings: PipelineSettings,
    last_crop_at: Option<Instant>,
    overlay_frame: Option<Frame>,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        display: DisplaySink,
        uploader: CropUploader,
    ) -> Self {
        Self {
            source,
            detector,
            display,
            uploader,
            settings,
            last_crop_at: None,
            overlay_frame: None,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.clone()
    }

    /// Run until a fault occurs. Every error crossing this boundary is
    /// fatal to the process; the caller logs and exits.
    pub async fn run(&mut self) -> Result<(), PipelineError> {
        info!(
            source = self.source.name(),
            detector = self.detector.name(),
            threshold = self.settings.threshold,
            "Watcher pipeline started"
        );

        loop {
            self.step().await?;
        }
    }

    /// One iteration: acquire → detect → annotate → hand off to sinks.
    async fn step(&mut self) -> Result<(), PipelineError> {
        let mut frame = self.source.next_frame().await?;

        if self.settings.upside_down {
            frame.flip180();
        }

        let detections = self.detector.detect(&frame)?;

        let strong: Vec<_> = detections
            .into_iter()
            .filter(|d| d.confidence > self.settings.threshold)
            .collect();

        for detection in &strong {
            self.stats.detections_seen += 1;
            metrics::counter!("watcher.detections").increment(1);

            let region = detection.to_pixels(frame.width, frame.height);

            if self.cooldown_elapsed() {
                self.last_crop_at = Some(Instant::now());

                match frame.crop(&region) {
                    Ok(crop) => {
                        let jpeg = crop.to_jpeg(self.settings.upload_quality)?;
                        if self.uploader.offer(jpeg) {
                            self.stats.crops_offered += 1;
                        } else {
                            self.stats.crops_dropped_in_flight += 1;
                            metrics::counter!("watcher.crops.dropped").increment(1);
                        }

                        if self.settings.overlay {
                            self.overlay_frame = Some(self.scaled_overlay(&crop, frame.height));
                        }
                    }
                    Err(e) => {
                        trace!(error = %e, "Skipping degenerate crop region");
                    }
                }
            } else {
                self.stats.crops_skipped_cooldown += 1;
            }

            frame.draw_box(&region, BOX_COLOR, self.settings.box_thickness);
        }

        if !strong.is_empty() {
            debug!(
                sequence = frame.sequence,
                detections = strong.len(),
                max_confidence = strong
                    .iter()
                    .map(|d| d.confidence)
                    .fold(0.0f32, f32::max),
                "Faces detected"
            );
        }

        // Overlay the most recent crop in the lower-right corner
        if let Some(ref overlay) = self.overlay_frame {
            let x_offset = frame.width.saturating_sub(overlay.width);
            let y_offset = frame.height.saturating_sub(overlay.height);
            frame.blit(overlay, x_offset, y_offset);
        }

        let display_jpeg = match self.settings.stream_dimensions {
            Some((width, height)) => frame
                .resized(width, height)
                .to_jpeg(self.settings.display_quality)?,
            None => frame.to_jpeg(self.settings.display_quality)?,
        };
        self.display.publish(display_jpeg);

        self.stats.frames_processed += 1;
        metrics::counter!("watcher.frames.processed").increment(1);

        Ok(())
    }

    fn cooldown_elapsed(&self) -> bool {
        self.last_crop_at
            .map_or(true, |at| at.elapsed() >= self.settings.crop_cooldown)
    }

    /// Scale a crop to one third of the frame height, keeping aspect.
    fn scaled_overlay(&self, crop: &Frame, frame_height: u32) -> Frame {
        let overlay_height = (frame_height / 3).max(1);
        let scale = overlay_height as f32 / crop.height as f32;
        let overlay_width = ((crop.width as f32 * scale) as u32).max(1);

        crop.resized(overlay_width, overlay_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detection, StubDetector};
    use async_trait::async_trait;

    /// Source yielding prepared frames immediately, then failing.
    struct ScriptedSource {
        frames: Vec<Frame>,
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn next_frame(&mut self) -> Result<Frame, SourceError> {
            if self.frames.is_empty() {
                return Err(SourceError::Exhausted);
            }
            Ok(self.frames.remove(0))
        }
    }

    fn test_settings() -> PipelineSettings {
        PipelineSettings {
            upside_down: false,
            threshold: 0.25,
            crop_cooldown: Duration::from_secs(2),
            overlay: false,
            box_thickness: 2,
            stream_dimensions: Some((32, 24)),
            display_quality: 80,
            upload_quality: 90,
        }
    }

    fn detection(confidence: f32) -> Detection {
        Detection {
            confidence,
            bbox: [0.25, 0.25, 0.5, 0.5],
        }
    }

    fn pipeline_with(
        settings: PipelineSettings,
        frames: Vec<Frame>,
        detections: Vec<Detection>,
    ) -> Pipeline {
        Pipeline::new(
            settings,
            Box::new(ScriptedSource { frames }),
            Box::new(StubDetector::new(detections)),
            DisplaySink::new().unwrap(),
            CropUploader::new(),
        )
    }

    #[tokio::test]
    async fn test_source_fault_terminates_run() {
        let mut pipeline = pipeline_with(test_settings(), vec![], vec![]);

        let result = pipeline.run().await;
        assert!(matches!(result, Err(PipelineError::Source(_))));
    }

    #[tokio::test]
    async fn test_display_slot_tracks_latest_frame() {
        let frames = vec![Frame::filled(64, 48, 10), Frame::filled(64, 48, 240)];
        let mut pipeline = pipeline_with(test_settings(), frames, vec![]);

        pipeline.step().await.unwrap();
        let after_first = pipeline.display.latest();

        pipeline.step().await.unwrap();
        let after_second = pipeline.display.latest();

        assert_ne!(after_first, after_second);
        assert_eq!(pipeline.stats().frames_processed, 2);
    }

    #[tokio::test]
    async fn test_detections_below_threshold_are_ignored() {
        let frames = vec![Frame::filled(64, 48, 128)];
        let mut pipeline = pipeline_with(test_settings(), frames, vec![detection(0.1)]);

        pipeline.step().await.unwrap();

        let stats = pipeline.stats();
        assert_eq!(stats.detections_seen, 0);
        assert_eq!(stats.crops_offered, 0);
    }

    #[tokio::test]
    async fn test_cooldown_limits_crop_offers() {
        let frames = vec![
            Frame::filled(64, 48, 128),
            Frame::filled(64, 48, 129),
            Frame::filled(64, 48, 130),
        ];
        let mut pipeline = pipeline_with(test_settings(), frames, vec![detection(0.9)]);

        pipeline.step().await.unwrap();
        pipeline.step().await.unwrap();
        pipeline.step().await.unwrap();

        let stats = pipeline.stats();
        assert_eq!(stats.detections_seen, 3);
        // Only the first detection inside the window produced a crop
        assert_eq!(stats.crops_offered, 1);
        assert_eq!(stats.crops_skipped_cooldown, 2);
    }

    #[tokio::test]
    async fn test_overlay_is_blitted_into_display_frame() {
        let mut settings = test_settings();
        settings.overlay = true;
        settings.stream_dimensions = None;

        let frames = vec![Frame::filled(60, 60, 200)];
        let mut pipeline = pipeline_with(settings, frames, vec![detection(0.9)]);

        pipeline.step().await.unwrap();

        // One third of the frame height, aspect preserved (square crop)
        let overlay = pipeline.overlay_frame.as_ref().unwrap();
        assert_eq!(overlay.height, 20);
        assert_eq!(overlay.width, 20);
    }

    #[tokio::test]
    async fn test_upside_down_frames_are_flipped() {
        let mut settings = test_settings();
        settings.upside_down = true;
        settings.stream_dimensions = None;

        let mut marked = Frame::filled(8, 8, 0);
        marked.set_pixel(0, 0, [200, 0, 0]);

        let frames = vec![marked];
        let mut pipeline = pipeline_with(settings, frames, vec![]);

        // A flipped frame encodes differently from the unflipped original
        pipeline.step().await.unwrap();
        let flipped_jpeg = pipeline.display.latest();

        let mut unflipped = Frame::filled(8, 8, 0);
        unflipped.set_pixel(0, 0, [200, 0, 0]);
        assert_ne!(flipped_jpeg, unflipped.to_jpeg(80).unwrap());
    }
}
