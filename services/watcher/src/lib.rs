//! Porter Watcher
//!
//! Edge face-detection pipeline for the Porter door automation platform.
//! A single inference loop acquires camera frames, runs detection,
//! annotates the frame, and fans out to two sinks that are never allowed
//! to block it: a local display slot with latest-frame-wins semantics and
//! a single-slot crop uploader that drops frames while an upload is in
//! flight.
//!
//! ## Architecture
//!
//! ```text
//! FrameSource ──▶ Detector ──▶ annotate ──┬──▶ DisplaySink ──▶ FIFO
//!  (camera)      (inference)              │    (latest frame wins)
//!                                         │
//!                                         └──▶ CropUploader ──▶ S3
//!                                              (single slot,
//!                                               drop in flight)
//! ```
//!
//! Any error reaching the loop's outer boundary is fatal to the process;
//! there is no restart supervision inside the service.

pub mod config;
pub mod detect;
pub mod display;
pub mod frame;
pub mod pipeline;
pub mod source;
pub mod upload;

pub use config::Config;
pub use detect::{Detection, Detector, FrameDiffDetector, StubDetector};
pub use display::DisplaySink;
pub use frame::{Frame, FrameError, PixelRect};
pub use pipeline::{Pipeline, PipelineError, PipelineSettings, PipelineStats};
pub use source::{FrameSource, SourceError, SyntheticSource};
pub use upload::{BlobStore, CropUploader, S3BlobStore, UploadError};
