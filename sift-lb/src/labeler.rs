//! Labeler service: image-notification → annotation → labeled-notification
//!
//! Per message:
//! 1. Parse `"<bucket>/<key>"`; malformed → log, acknowledge
//! 2. Fetch the image from the local store
//! 3. Request the top labels
//! 4. No labels → acknowledge without output
//! 5. Publish the labeled-notification, wait for confirmation, acknowledge
//!
//! Failures in 2, 3 or 5 leave the message for redelivery. A missing object
//! is retried too; once it has been redelivered for longer than the
//! retention window the sweep has removed it for good, and each further
//! attempt is logged at error.

use std::sync::Arc;

use async_trait::async_trait;
use sift_common::annotate::Annotator;
use sift_common::broker::{
    ensure_subscription, ensure_topic, receive, remove_subscription, Broker, HandlerError,
    MessageHandler, ReceiveOptions, ReceiveStats, ReceivedMessage, SubscriptionConfig,
};
use sift_common::config::{
    ACK_DEADLINE, DEFAULT_IMAGE_TOPIC, DEFAULT_LABELED_TOPIC, MAX_LABELS, RETENTION_WINDOW,
};
use sift_common::health::{bucket_ready, Lifecycle};
use sift_common::store::ObjectStore;
use sift_common::{Error, LabeledImage, Location, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// First delivery attempt made after the retention window has fully elapsed
pub const STALE_DELIVERY_ATTEMPT: u32 =
    (RETENTION_WINDOW.as_secs() / ACK_DEADLINE.as_secs()) as u32 + 1;

/// Labeler settings
#[derive(Debug, Clone)]
pub struct LabelerConfig {
    /// Local bucket checked by the readiness check
    pub bucket: String,
    pub image_topic: String,
    pub labeled_topic: String,
    /// Subscription to the image topic, shared by all labeler replicas
    pub subscription: String,
    pub max_labels: usize,
    /// Delete the subscription on shutdown and pre-stop
    pub delete_subscription_on_stop: bool,
    pub receive: ReceiveOptions,
}

impl LabelerConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            image_topic: DEFAULT_IMAGE_TOPIC.to_string(),
            labeled_topic: DEFAULT_LABELED_TOPIC.to_string(),
            subscription: DEFAULT_IMAGE_TOPIC.to_string(),
            max_labels: MAX_LABELS,
            delete_subscription_on_stop: false,
            receive: ReceiveOptions::default(),
        }
    }
}

pub struct Labeler {
    broker: Arc<dyn Broker>,
    store: Arc<dyn ObjectStore>,
    annotator: Arc<dyn Annotator>,
    config: LabelerConfig,
    stop: CancellationToken,
}

impl Labeler {
    /// Ensure both topics and the image subscription exist
    pub async fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn ObjectStore>,
        annotator: Arc<dyn Annotator>,
        config: LabelerConfig,
    ) -> Result<Self> {
        ensure_topic(broker.as_ref(), &config.image_topic).await?;
        ensure_topic(broker.as_ref(), &config.labeled_topic).await?;
        ensure_subscription(
            broker.as_ref(),
            &config.subscription,
            &SubscriptionConfig::new(&config.image_topic, ACK_DEADLINE),
        )
        .await?;

        Ok(Self {
            broker,
            store,
            annotator,
            config,
            stop: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &LabelerConfig {
        &self.config
    }

    /// Receive until [`Labeler::stop`] is called
    pub async fn run(self: &Arc<Self>) -> Result<ReceiveStats> {
        receive(
            self.broker.clone(),
            &self.config.subscription,
            self.clone(),
            self.config.receive.clone(),
            self.stop.clone(),
        )
        .await
    }

    /// Token that ends [`Labeler::run`] when cancelled
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub async fn ready(&self) -> bool {
        bucket_ready(self.store.as_ref(), &self.config.bucket).await
    }

    /// Stop receiving and remove the subscription when configured to
    ///
    /// Failures are logged.
    pub async fn shutdown(&self) {
        self.stop();
        if !self.config.delete_subscription_on_stop {
            return;
        }
        if let Err(e) = remove_subscription(self.broker.as_ref(), &self.config.subscription).await {
            warn!(subscription = %self.config.subscription, error = %e, "Unable to delete subscription");
        }
    }
}

#[async_trait]
impl MessageHandler for Labeler {
    async fn handle(&self, message: &ReceivedMessage) -> std::result::Result<(), HandlerError> {
        let location = Location::from_payload(&message.data)?;

        let image = match self.store.get_object(&location.bucket, &location.key).await {
            Ok(image) => image,
            Err(e) => {
                if e.is_not_found() && message.delivery_attempt >= STALE_DELIVERY_ATTEMPT {
                    error!(
                        location = %location,
                        message_id = %message.message_id,
                        delivery_attempt = message.delivery_attempt,
                        "Image missing past the retention window, it will not reappear"
                    );
                }
                return Err(HandlerError::transient(format!("Unable to fetch {}", location), e));
            }
        };

        let labels = self
            .annotator
            .labels(&image, self.config.max_labels)
            .await
            .map_err(|e| HandlerError::transient(format!("Unable to recognize {}", location), e))?;

        if labels.is_empty() {
            info!(location = %location, "No labels for image");
            return Ok(());
        }

        let labeled = LabeledImage::new(location, labels);
        let payload = labeled
            .encode()
            .map_err(|e| HandlerError::transient("Unable to encode notification", Error::from(e)))?;

        let message_id = self
            .broker
            .publish(&self.config.labeled_topic, payload)
            .await
            .map_err(|e| {
                HandlerError::transient(
                    format!("Unable to publish to topic {}", self.config.labeled_topic),
                    e,
                )
            })?;

        info!(
            location = %labeled.location,
            labels = ?labeled.labels,
            topic = %self.config.labeled_topic,
            message_id = %message_id,
            "Published labeled notification"
        );
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for Labeler {
    async fn ready(&self) -> bool {
        Labeler::ready(self).await
    }

    async fn prestop(&self) {
        if self.config.delete_subscription_on_stop {
            self.shutdown().await;
        }
    }
}
