//! Crop upload sink: single-slot handoff to an object-storage worker.
//!
//! The pipeline offers encoded crops; while an upload is in flight every
//! further offer is dropped on the floor, so the inference loop never
//! blocks on network I/O and at most one upload is in flight at a time.

use crate::config::S3Config;
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Errors from the blob store.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("object store request failed: {0}")]
    Store(String),
}

/// Object-storage seam for crop uploads.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_jpeg(&self, key: &str, data: Bytes) -> Result<(), UploadError>;
}

/// S3-backed [`BlobStore`].
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "Crop uploader initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put_jpeg(&self, key: &str, data: Bytes) -> Result<(), UploadError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .content_type("image/jpeg")
            .send()
            .await
            .map_err(|e| UploadError::Store(e.to_string()))?;

        Ok(())
    }
}

/// Crop key derived from the capture time, under the configured prefix.
/// The downstream matcher watches this prefix.
pub fn crop_key(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{}{}.jpg", prefix, at.format("%Y-%m-%d_%H_%M_%S%.6f"))
}

/// Pipeline-side handle for the single-slot upload handoff.
#[derive(Clone)]
pub struct CropUploader {
    busy: Arc<AtomicBool>,
    slot: Arc<Mutex<Option<Bytes>>>,
    signal: Arc<Notify>,
}

impl CropUploader {
    pub fn new() -> Self {
        Self {
            busy: Arc::new(AtomicBool::new(false)),
            slot: Arc::new(Mutex::new(None)),
            signal: Arc::new(Notify::new()),
        }
    }

    /// Hand a crop to the worker. Returns false when an upload is already
    /// in flight; the crop is dropped, not queued.
    pub fn offer(&self, jpeg: Bytes) -> bool {
        if self.busy.swap(true, Ordering::AcqRel) {
            return false;
        }

        *self.slot.lock() = Some(jpeg);
        self.signal.notify_one();
        true
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Spawn the upload worker: wait for a crop, perform one blocking
    /// network call, clear the busy flag, wait again. Failures are logged
    /// and the crop is lost; there is no retry.
    pub fn spawn_worker(
        &self,
        store: Arc<dyn BlobStore>,
        key_prefix: String,
    ) -> tokio::task::JoinHandle<()> {
        let busy = self.busy.clone();
        let slot = self.slot.clone();
        let signal = self.signal.clone();

        tokio::spawn(async move {
            info!(prefix = %key_prefix, "Upload worker started");

            loop {
                signal.notified().await;

                let Some(jpeg) = slot.lock().take() else {
                    busy.store(false, Ordering::Release);
                    continue;
                };

                let key = crop_key(&key_prefix, Utc::now());
                let size_bytes = jpeg.len();

                match store.put_jpeg(&key, jpeg).await {
                    Ok(()) => {
                        debug!(key = %key, size_bytes, "Crop uploaded");
                        metrics::counter!("watcher.crops.uploaded").increment(1);
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Crop upload failed");
                        metrics::counter!("watcher.crops.upload_failed").increment(1);
                    }
                }

                busy.store(false, Ordering::Release);
            }
        })
    }
}

impl Default for CropUploader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    /// Store that records keys and holds each upload open for a while.
    struct SlowMemoryStore {
        keys: Mutex<Vec<String>>,
        delay: Duration,
    }

    #[async_trait]
    impl BlobStore for SlowMemoryStore {
        async fn put_jpeg(&self, key: &str, _data: Bytes) -> Result<(), UploadError> {
            tokio::time::sleep(self.delay).await;
            self.keys.lock().push(key.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_crop_key_format() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();
        let key = crop_key("incoming/", at);

        assert_eq!(key, "incoming/2024-01-15_10_30_45.000000.jpg");
    }

    #[tokio::test]
    async fn test_offer_drops_while_upload_in_flight() {
        let store = Arc::new(SlowMemoryStore {
            keys: Mutex::new(Vec::new()),
            delay: Duration::from_millis(100),
        });

        let uploader = CropUploader::new();
        let _worker = uploader.spawn_worker(store.clone(), "incoming/".to_string());

        assert!(uploader.offer(Bytes::from_static(b"crop-1")));

        // Worker is busy with the first crop: this one is dropped.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(uploader.is_busy());
        assert!(!uploader.offer(Bytes::from_static(b"crop-2")));

        // After the upload finishes, new offers are accepted again.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!uploader.is_busy());
        assert!(uploader.offer(Bytes::from_static(b"crop-3")));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.keys.lock().len(), 2);
    }
}
