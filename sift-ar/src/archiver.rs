//! Archiver service: labeled-notification → durable copy → purge-notification
//!
//! Each archiver instance owns a subscription named `"<instance>+<target>"`
//! so that every instance sees every labeled-notification. The subscription
//! is deleted on shutdown and pre-stop.
//!
//! The post-archive purge is off by default. Several archivers with
//! different target labels may match the same image, and a purge after the
//! first copy would leave the others nothing to read. Enable it only when a
//! single archiver consumes the labeled topic; otherwise the receiver's
//! retention sweep reclaims the local copy.

use std::sync::Arc;

use async_trait::async_trait;
use sift_common::broker::{
    ensure_subscription, ensure_topic, receive, remove_subscription, Broker, HandlerError,
    MessageHandler, ReceiveOptions, ReceiveStats, ReceivedMessage, SubscriptionConfig,
};
use sift_common::config::{ACK_DEADLINE, DEFAULT_LABELED_TOPIC, DEFAULT_TARGET_LABEL};
use sift_common::health::{bucket_ready, Lifecycle};
use sift_common::store::ObjectStore;
use sift_common::{LabeledImage, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Instance-scoped subscription name
pub fn subscription_name(instance: &str, target_label: &str) -> String {
    format!("{}+{}", instance, target_label)
}

/// Archiver settings
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    pub labeled_topic: String,
    pub subscription: String,
    /// Substring a label must contain (case-sensitive) for the image to be archived
    pub target_label: String,
    /// Durable bucket archived images are written to, under their original key
    pub archive_bucket: String,
    /// Where to announce archived images for local deletion; `None` (the
    /// default) leaves the local copy to the retention sweep
    pub purge_topic: Option<String>,
    /// Delete the subscription on shutdown and pre-stop
    pub owns_subscription: bool,
    pub receive: ReceiveOptions,
}

impl ArchiverConfig {
    pub fn new(instance: &str, archive_bucket: impl Into<String>) -> Self {
        Self {
            labeled_topic: DEFAULT_LABELED_TOPIC.to_string(),
            subscription: subscription_name(instance, DEFAULT_TARGET_LABEL),
            target_label: DEFAULT_TARGET_LABEL.to_string(),
            archive_bucket: archive_bucket.into(),
            purge_topic: None,
            owns_subscription: true,
            receive: ReceiveOptions::default(),
        }
    }
}

pub struct Archiver {
    broker: Arc<dyn Broker>,
    local: Arc<dyn ObjectStore>,
    archive: Arc<dyn ObjectStore>,
    config: ArchiverConfig,
    stop: CancellationToken,
}

impl Archiver {
    /// Ensure topics and the subscription exist
    pub async fn new(
        broker: Arc<dyn Broker>,
        local: Arc<dyn ObjectStore>,
        archive: Arc<dyn ObjectStore>,
        config: ArchiverConfig,
    ) -> Result<Self> {
        ensure_topic(broker.as_ref(), &config.labeled_topic).await?;
        if let Some(purge_topic) = &config.purge_topic {
            ensure_topic(broker.as_ref(), purge_topic).await?;
        }
        ensure_subscription(
            broker.as_ref(),
            &config.subscription,
            &SubscriptionConfig::new(&config.labeled_topic, ACK_DEADLINE),
        )
        .await?;

        info!(
            subscription = %config.subscription,
            target_label = %config.target_label,
            archive_bucket = %config.archive_bucket,
            "Archiver ready"
        );

        Ok(Self {
            broker,
            local,
            archive,
            config,
            stop: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ArchiverConfig {
        &self.config
    }

    /// Receive until [`Archiver::stop`] is called
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

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// True when the durable store answers and the archive bucket exists
    pub async fn ready(&self) -> bool {
        bucket_ready(self.archive.as_ref(), &self.config.archive_bucket).await
    }

    /// Stop receiving and delete an owned subscription; failures are logged
    pub async fn shutdown(&self) {
        self.stop();
        if !self.config.owns_subscription {
            return;
        }
        if let Err(e) = remove_subscription(self.broker.as_ref(), &self.config.subscription).await {
            warn!(subscription = %self.config.subscription, error = %e, "Unable to delete subscription");
        }
    }
}

#[async_trait]
impl MessageHandler for Archiver {
    async fn handle(&self, message: &ReceivedMessage) -> std::result::Result<(), HandlerError> {
        let labeled = LabeledImage::decode(&message.data)?;
        let location = &labeled.location;

        if !labeled.matches(&self.config.target_label) {
            debug!(location = %location, labels = ?labeled.labels, "No target label, skipping");
            return Ok(());
        }

        let image = self
            .local
            .get_object(&location.bucket, &location.key)
            .await
            .map_err(|e| HandlerError::transient(format!("Unable to read {}", location), e))?;

        let size = self
            .archive
            .put_object(&self.config.archive_bucket, &location.key, image)
            .await
            .map_err(|e| HandlerError::transient(format!("Cloud write failed for {}", location), e))?;

        info!(
            location = %location,
            archive_bucket = %self.config.archive_bucket,
            size,
            "Archived image"
        );

        if let Some(purge_topic) = &self.config.purge_topic {
            let message_id = self
                .broker
                .publish(purge_topic, location.to_payload())
                .await
                .map_err(|e| {
                    HandlerError::transient(format!("Unable to publish to topic {}", purge_topic), e)
                })?;
            info!(
                location = %location,
                topic = %purge_topic,
                message_id = %message_id,
                "Published purge notification"
            );
        }

        Ok(())
    }
}

#[async_trait]
impl Lifecycle for Archiver {
    async fn ready(&self) -> bool {
        Archiver::ready(self).await
    }

    async fn prestop(&self) {
        self.shutdown().await;
    }
}
