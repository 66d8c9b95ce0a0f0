//! Purger service: purge-notification → local delete
//!
//! Deletion is best effort. A failed or redundant delete (the sweep may
//! have won the race) is logged and the notification is still
//! acknowledged; the retention sweep reclaims anything left behind.

use std::sync::Arc;

use async_trait::async_trait;
use sift_common::broker::{
    ensure_subscription, ensure_topic, receive, remove_subscription, Broker, HandlerError,
    MessageHandler, ReceiveOptions, ReceiveStats, ReceivedMessage, SubscriptionConfig,
};
use sift_common::config::{ACK_DEADLINE, DEFAULT_PURGE_TOPIC};
use sift_common::health::{bucket_ready, Lifecycle};
use sift_common::store::ObjectStore;
use sift_common::{Location, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Purger settings
#[derive(Debug, Clone)]
pub struct PurgerConfig {
    /// Local bucket checked by the readiness check
    pub bucket: String,
    pub purge_topic: String,
    /// Subscription to the purge topic, shared by all purger replicas
    pub subscription: String,
    pub delete_subscription_on_stop: bool,
    pub receive: ReceiveOptions,
}

impl PurgerConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            purge_topic: DEFAULT_PURGE_TOPIC.to_string(),
            subscription: DEFAULT_PURGE_TOPIC.to_string(),
            delete_subscription_on_stop: false,
            receive: ReceiveOptions::default(),
        }
    }
}

pub struct Purger {
    broker: Arc<dyn Broker>,
    store: Arc<dyn ObjectStore>,
    config: PurgerConfig,
    stop: CancellationToken,
}

impl Purger {
    pub async fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn ObjectStore>,
        config: PurgerConfig,
    ) -> Result<Self> {
        ensure_topic(broker.as_ref(), &config.purge_topic).await?;
        ensure_subscription(
            broker.as_ref(),
            &config.subscription,
            &SubscriptionConfig::new(&config.purge_topic, ACK_DEADLINE),
        )
        .await?;

        Ok(Self {
            broker,
            store,
            config,
            stop: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &PurgerConfig {
        &self.config
    }

    /// Receive until [`Purger::stop`] is called
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

    pub async fn ready(&self) -> bool {
        bucket_ready(self.store.as_ref(), &self.config.bucket).await
    }

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
impl MessageHandler for Purger {
    async fn handle(&self, message: &ReceivedMessage) -> std::result::Result<(), HandlerError> {
        let location = Location::from_payload(&message.data)?;

        match self.store.remove_object(&location.bucket, &location.key).await {
            Ok(()) => info!(location = %location, "Purged image"),
            Err(e) if e.is_not_found() => {
                info!(location = %location, "Image already gone")
            }
            Err(e) => warn!(location = %location, error = %e, "Unable to purge image"),
        }
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for Purger {
    async fn ready(&self) -> bool {
        Purger::ready(self).await
    }

    async fn prestop(&self) {
        if self.config.delete_subscription_on_stop {
            self.shutdown().await;
        }
    }
}
