//! InMemoryBroker - single-process broker with ack-deadline redelivery
//!
//! Semantics follow a durable pub/sub service closely enough to exercise
//! at-least-once behaviour in tests:
//! - a publish fans out to every subscription bound to the topic at that time
//! - a pulled message is leased until `now + ack_deadline`
//! - an expired lease returns the message to the backlog; the next pull
//!   redelivers it with an incremented delivery attempt
//! - acknowledging an unknown or expired ack id is a no-op
//!
//! Deadlines use `tokio::time::Instant`, so tests can advance them with
//! paused time.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{Broker, ReceivedMessage, SubscriptionConfig};
use crate::{Error, Result};

#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    topics: BTreeMap<String, TopicState>,
    subscriptions: BTreeMap<String, SubscriptionState>,
}

#[derive(Default)]
struct TopicState {
    /// Every payload ever published, in order
    published: Vec<Vec<u8>>,
}

struct SubscriptionState {
    config: SubscriptionConfig,
    backlog: VecDeque<Pending>,
    leased: HashMap<String, Lease>,
}

#[derive(Clone)]
struct Pending {
    message_id: String,
    data: Vec<u8>,
    attempts: u32,
}

struct Lease {
    pending: Pending,
    deadline: Instant,
}

impl SubscriptionState {
    fn new(config: SubscriptionConfig) -> Self {
        Self {
            config,
            backlog: VecDeque::new(),
            leased: HashMap::new(),
        }
    }

    /// Move expired leases back to the front of the backlog
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(ack_id, _)| ack_id.clone())
            .collect();

        for ack_id in expired {
            if let Some(lease) = self.leased.remove(&ack_id) {
                self.backlog.push_front(lease.pending);
            }
        }
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all topics, sorted
    pub async fn topics(&self) -> Vec<String> {
        self.state.lock().await.topics.keys().cloned().collect()
    }

    /// Names of all subscriptions, sorted
    pub async fn subscriptions(&self) -> Vec<String> {
        self.state.lock().await.subscriptions.keys().cloned().collect()
    }

    /// Every payload published to `topic`, oldest first
    pub async fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .await
            .topics
            .get(topic)
            .map(|t| t.published.clone())
            .unwrap_or_default()
    }

    /// Messages not yet acknowledged on `subscription` (queued plus leased)
    pub async fn unacked(&self, subscription: &str) -> Option<usize> {
        self.state
            .lock()
            .await
            .subscriptions
            .get(subscription)
            .map(|s| s.backlog.len() + s.leased.len())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn topic_exists(&self, topic: &str) -> Result<bool> {
        Ok(self.state.lock().await.topics.contains_key(topic))
    }

    async fn create_topic(&self, topic: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.topics.contains_key(topic) {
            return Err(Error::AlreadyExists(format!("topic {}", topic)));
        }
        state.topics.insert(topic.to_string(), TopicState::default());
        Ok(())
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<String> {
        let mut state = self.state.lock().await;
        let topic_state = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| Error::NotFound(format!("topic {}", topic)))?;
        topic_state.published.push(data.clone());

        let message_id = Uuid::new_v4().to_string();
        for subscription in state.subscriptions.values_mut() {
            if subscription.config.topic == topic {
                subscription.backlog.push_back(Pending {
                    message_id: message_id.clone(),
                    data: data.clone(),
                    attempts: 0,
                });
            }
        }
        Ok(message_id)
    }

    async fn subscription_exists(&self, subscription: &str) -> Result<bool> {
        Ok(self.state.lock().await.subscriptions.contains_key(subscription))
    }

    async fn create_subscription(
        &self,
        subscription: &str,
        config: &SubscriptionConfig,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.subscriptions.contains_key(subscription) {
            return Err(Error::AlreadyExists(format!("subscription {}", subscription)));
        }
        if !state.topics.contains_key(&config.topic) {
            return Err(Error::NotFound(format!("topic {}", config.topic)));
        }
        state
            .subscriptions
            .insert(subscription.to_string(), SubscriptionState::new(config.clone()));
        Ok(())
    }

    async fn delete_subscription(&self, subscription: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .subscriptions
            .remove(subscription)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("subscription {}", subscription)))
    }

    async fn pull(&self, subscription: &str, max_messages: usize) -> Result<Vec<ReceivedMessage>> {
        let mut state = self.state.lock().await;
        let sub = state
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| Error::NotFound(format!("subscription {}", subscription)))?;

        let now = Instant::now();
        sub.reclaim_expired(now);

        let mut batch = Vec::new();
        while batch.len() < max_messages {
            let Some(mut pending) = sub.backlog.pop_front() else {
                break;
            };
            pending.attempts += 1;
            let ack_id = Uuid::new_v4().to_string();
            batch.push(ReceivedMessage {
                message_id: pending.message_id.clone(),
                ack_id: ack_id.clone(),
                data: pending.data.clone(),
                delivery_attempt: pending.attempts,
            });
            sub.leased.insert(
                ack_id,
                Lease {
                    pending,
                    deadline: now + sub.config.ack_deadline,
                },
            );
        }
        Ok(batch)
    }

    async fn acknowledge(&self, subscription: &str, ack_ids: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        let sub = state
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| Error::NotFound(format!("subscription {}", subscription)))?;
        for ack_id in ack_ids {
            sub.leased.remove(ack_id);
        }
        Ok(())
    }
}
