//! Idempotent topic and subscription setup
//!
//! Whichever stage first needs a topic or subscription creates it. Every
//! helper here is safe to call repeatedly and from several processes at
//! once: a creator that loses the race sees `AlreadyExists`, which counts
//! as success.

use tracing::{debug, info};

use super::{Broker, SubscriptionConfig};
use crate::{Error, Result};

/// Make sure `topic` exists, creating it if needed
pub async fn ensure_topic(broker: &dyn Broker, topic: &str) -> Result<()> {
    if broker.topic_exists(topic).await? {
        debug!(topic, "Topic already exists");
        return Ok(());
    }

    match broker.create_topic(topic).await {
        Ok(()) => {
            info!(topic, "Created topic");
            Ok(())
        }
        Err(Error::AlreadyExists(_)) => {
            debug!(topic, "Topic created concurrently");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Make sure `subscription` exists, creating it bound to `config.topic`
///
/// An existing subscription is reused as-is; its topic and deadline are not
/// reconciled with `config`.
pub async fn ensure_subscription(
    broker: &dyn Broker,
    subscription: &str,
    config: &SubscriptionConfig,
) -> Result<()> {
    if broker.subscription_exists(subscription).await? {
        debug!(subscription, "Subscription already exists");
        return Ok(());
    }

    match broker.create_subscription(subscription, config).await {
        Ok(()) => {
            info!(
                subscription,
                topic = %config.topic,
                ack_deadline_secs = config.ack_deadline.as_secs(),
                "Created subscription"
            );
            Ok(())
        }
        Err(Error::AlreadyExists(_)) => {
            debug!(subscription, "Subscription created concurrently");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Delete `subscription` if it exists
///
/// Returns whether a subscription was actually deleted.
pub async fn remove_subscription(broker: &dyn Broker, subscription: &str) -> Result<bool> {
    if !broker.subscription_exists(subscription).await? {
        debug!(subscription, "Subscription already gone");
        return Ok(false);
    }

    match broker.delete_subscription(subscription).await {
        Ok(()) => {
            info!(subscription, "Deleted subscription");
            Ok(true)
        }
        Err(Error::NotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}
