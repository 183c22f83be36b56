use serde::Deserialize;
use thiserror::Error;

/// Named stream resolutions accepted for the local display.
const RESOLUTIONS: &[(&str, (u32, u32))] = &[
    ("1080p", (1920, 1080)),
    ("720p", (1280, 720)),
    ("480p", (858, 480)),
];

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Main configuration for the watcher service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Camera configuration
    #[serde(default)]
    pub camera: CameraConfig,
    /// Detection configuration
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Local display configuration
    #[serde(default)]
    pub display: DisplayConfig,
    /// Crop upload configuration
    pub s3: S3Config,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Camera configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Frame source backend ("synthetic" until a device SDK is wired in)
    #[serde(default = "default_source")]
    pub source: String,
    /// Capture width in pixels
    #[serde(default = "default_capture_width")]
    pub width: u32,
    /// Capture height in pixels
    #[serde(default = "default_capture_height")]
    pub height: u32,
    /// Capture frame rate
    #[serde(default = "default_fps")]
    pub fps: f32,
    /// The device is mounted upside down; flip every frame 180 degrees
    #[serde(default)]
    pub upside_down: bool,
}

/// Detection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Minimum confidence for a detection to count
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Minimum seconds between uploaded crops
    #[serde(default = "default_crop_cooldown_secs")]
    pub crop_cooldown_secs: f32,
    /// Blit the most recent crop into the display stream's corner
    #[serde(default)]
    pub overlay: bool,
    /// Annotation box thickness in pixels
    #[serde(default = "default_box_thickness")]
    pub box_thickness: u32,
}

/// Local display configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    /// Sink path the display worker writes to (typically a FIFO)
    #[serde(default = "default_display_path")]
    pub path: String,
    /// Stream resolution preset (1080p, 720p, 480p)
    #[serde(default = "default_resolution")]
    pub resolution: String,
    /// Stream at full capture resolution instead of the preset
    #[serde(default)]
    pub fullres: bool,
    /// JPEG quality for display frames
    #[serde(default = "default_display_quality")]
    pub jpeg_quality: u8,
}

impl DisplayConfig {
    /// Pixel dimensions of the configured resolution preset.
    pub fn stream_dimensions(&self) -> Option<(u32, u32)> {
        RESOLUTIONS
            .iter()
            .find(|(name, _)| *name == self.resolution)
            .map(|(_, dims)| *dims)
    }
}

/// Crop upload configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket receiving face crops
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Key prefix the downstream matcher watches
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// JPEG quality for uploaded crops
    #[serde(default = "default_upload_quality")]
    pub jpeg_quality: u8,
}

// Default value functions
fn default_service_name() -> String {
    "porter-watcher".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_source() -> String {
    "synthetic".to_string()
}

fn default_capture_width() -> u32 {
    1280
}

fn default_capture_height() -> u32 {
    720
}

fn default_fps() -> f32 {
    10.0
}

fn default_threshold() -> f32 {
    0.25
}

fn default_crop_cooldown_secs() -> f32 {
    2.0
}

fn default_box_thickness() -> u32 {
    8
}

fn default_display_path() -> String {
    "/tmp/porter.mjpeg".to_string()
}

fn default_resolution() -> String {
    "480p".to_string()
}

fn default_display_quality() -> u8 {
    80
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_key_prefix() -> String {
    "incoming/".to_string()
}

fn default_upload_quality() -> u8 {
    90
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "porter-watcher")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/watcher").required(false))
            .add_source(config::File::with_name("/etc/porter/watcher").required(false))
            // Override with environment variables
            // WATCHER__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("WATCHER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "camera.width/height".to_string(),
                message: "Dimensions must be greater than 0".to_string(),
            });
        }

        if self.camera.fps <= 0.0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "camera.fps".to_string(),
                message: "FPS must be greater than 0".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.detection.threshold) {
            return Err(ConfigValidationError::InvalidValue {
                field: "detection.threshold".to_string(),
                message: "Threshold must be between 0 and 1".to_string(),
            });
        }

        if self.display.stream_dimensions().is_none() {
            return Err(ConfigValidationError::InvalidValue {
                field: "display.resolution".to_string(),
                message: format!("Unknown resolution preset '{}'", self.display.resolution),
            });
        }

        if self.s3.bucket.is_empty() {
            return Err(ConfigValidationError::MissingField("s3.bucket".to_string()));
        }

        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            width: default_capture_width(),
            height: default_capture_height(),
            fps: default_fps(),
            upside_down: false,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            crop_cooldown_secs: default_crop_cooldown_secs(),
            overlay: false,
            box_thickness: default_box_thickness(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            path: default_display_path(),
            resolution: default_resolution(),
            fullres: false,
            jpeg_quality: default_display_quality(),
        }
    }
}
