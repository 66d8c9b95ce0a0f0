//! Message broker port
//!
//! Durable named topics and durable named subscriptions with
//! ack-deadline-based redelivery. Backends:
//! - [`InMemoryBroker`]: single-process broker for tests and local runs
//! - [`PubSubBroker`]: Google Pub/Sub v1 REST API (also the Pub/Sub emulator)

mod memory;
mod pubsub;
pub mod receive;
pub mod setup;

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

pub use memory::InMemoryBroker;
pub use pubsub::{PubSubBroker, PubSubConfig, DEFAULT_PUBSUB_ENDPOINT};
pub use receive::{receive, HandlerError, MessageHandler, ReceiveOptions, ReceiveStats};
pub use setup::{ensure_subscription, ensure_topic, remove_subscription};

/// Settings applied when a subscription is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// Topic the subscription is bound to
    pub topic: String,
    /// Time a consumer has to acknowledge before redelivery
    pub ack_deadline: Duration,
}

impl SubscriptionConfig {
    pub fn new(topic: impl Into<String>, ack_deadline: Duration) -> Self {
        Self {
            topic: topic.into(),
            ack_deadline,
        }
    }
}

/// A message leased to this consumer by a pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Broker-assigned message id (stable across redeliveries)
    pub message_id: String,
    /// Lease handle used to acknowledge this delivery
    pub ack_id: String,
    pub data: Vec<u8>,
    /// 1 on first delivery, incremented on each redelivery
    pub delivery_attempt: u32,
}

impl ReceivedMessage {
    /// Payload as text for logging
    pub fn data_lossy(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Publish/subscribe operations used by the pipeline stages
///
/// `create_*` report an existing resource as `Error::AlreadyExists`;
/// operations on a missing topic or subscription report `Error::NotFound`.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn topic_exists(&self, topic: &str) -> Result<bool>;

    async fn create_topic(&self, topic: &str) -> Result<()>;

    /// Publish and wait for the broker's confirmation; returns the message id
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<String>;

    async fn subscription_exists(&self, subscription: &str) -> Result<bool>;

    async fn create_subscription(
        &self,
        subscription: &str,
        config: &SubscriptionConfig,
    ) -> Result<()>;

    async fn delete_subscription(&self, subscription: &str) -> Result<()>;

    /// Lease up to `max_messages`; may return an empty batch
    async fn pull(&self, subscription: &str, max_messages: usize) -> Result<Vec<ReceivedMessage>>;

    async fn acknowledge(&self, subscription: &str, ack_ids: &[String]) -> Result<()>;
}
