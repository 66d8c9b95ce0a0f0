//! Receiver service: upload → local store → image-notification

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sift_common::broker::{ensure_topic, Broker};
use sift_common::config::{DEFAULT_IMAGE_TOPIC, RETENTION_WINDOW, SWEEP_INTERVAL};
use sift_common::health::{bucket_ready, Lifecycle};
use sift_common::store::ObjectStore;
use sift_common::{Location, Result};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::sweeper::Sweeper;

/// Receiver settings
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Local bucket uploads are written to
    pub bucket: String,
    /// Topic image-notifications are published to
    pub image_topic: String,
    pub retention: Duration,
    pub sweep_interval: Duration,
}

impl ReceiverConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            image_topic: DEFAULT_IMAGE_TOPIC.to_string(),
            retention: RETENTION_WINDOW,
            sweep_interval: SWEEP_INTERVAL,
        }
    }
}

/// Accepts uploads and announces them on the image topic
///
/// Owns the retention sweep for its bucket; call [`Receiver::shutdown`] to
/// stop it.
pub struct Receiver {
    store: Arc<dyn ObjectStore>,
    broker: Arc<dyn Broker>,
    bucket: String,
    topic: String,
    sweeper: Mutex<Option<Sweeper>>,
}

impl Receiver {
    /// Ensure the image topic exists and start the sweep
    ///
    /// The bucket itself is created by the caller.
    pub async fn new(
        store: Arc<dyn ObjectStore>,
        broker: Arc<dyn Broker>,
        config: ReceiverConfig,
    ) -> Result<Self> {
        ensure_topic(broker.as_ref(), &config.image_topic).await?;

        let sweeper = Sweeper::start(
            store.clone(),
            config.bucket.clone(),
            config.retention,
            config.sweep_interval,
        );

        Ok(Self {
            store,
            broker,
            bucket: config.bucket,
            topic: config.image_topic,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Store `data` under `filename`, verify its size, then publish and wait for confirmation
    pub async fn receive(
        &self,
        filename: &str,
        declared_size: u64,
        data: Bytes,
    ) -> ApiResult<Location> {
        if filename.is_empty() || filename.contains('/') {
            return Err(ApiError::InvalidFilename(filename.to_string()));
        }
        let location = Location::new(&self.bucket, filename);

        let written = self
            .store
            .put_object(&self.bucket, filename, data)
            .await
            .map_err(ApiError::Store)?;

        if written != declared_size {
            return Err(ApiError::Incomplete {
                written,
                declared: declared_size,
            });
        }

        let message_id = self
            .broker
            .publish(&self.topic, location.to_payload())
            .await
            .map_err(|source| ApiError::Publish {
                topic: self.topic.clone(),
                source,
            })?;

        info!(
            bucket = %self.bucket,
            key = filename,
            size = written,
            topic = %self.topic,
            message_id = %message_id,
            "Published image notification"
        );
        Ok(location)
    }

    pub async fn ready(&self) -> bool {
        bucket_ready(self.store.as_ref(), &self.bucket).await
    }

    /// Remove every object, then the bucket; failures are logged
    pub async fn drain(&self) {
        match self.store.list_objects(&self.bucket).await {
            Ok(objects) => {
                for object in objects {
                    if let Err(e) = self.store.remove_object(&self.bucket, &object.key).await {
                        warn!(bucket = %self.bucket, key = %object.key, error = %e, "Unable to remove object");
                    }
                }
            }
            Err(e) => {
                error!(bucket = %self.bucket, error = %e, "Problem listing contents of bucket");
            }
        }

        match self.store.remove_bucket(&self.bucket).await {
            Ok(()) => info!(bucket = %self.bucket, "Removed local storage bucket"),
            Err(e) => error!(bucket = %self.bucket, error = %e, "Unable to remove local storage bucket"),
        }
    }

    /// Stop the sweep and wait for it; later calls do nothing
    pub async fn shutdown(&self) {
        if let Some(sweeper) = self.sweeper.lock().await.take() {
            sweeper.stop().await;
        }
    }
}

#[async_trait]
impl Lifecycle for Receiver {
    async fn ready(&self) -> bool {
        Receiver::ready(self).await
    }

    async fn prestop(&self) {
        self.drain().await;
    }
}
