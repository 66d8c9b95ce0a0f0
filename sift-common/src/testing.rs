//! Fault-injecting test doubles for the broker, store and annotator ports
//!
//! Each double wraps the in-memory backend and can be told to fail specific
//! calls, so stage tests can check what is (and is not) acknowledged or
//! published when infrastructure misbehaves. [`LogCapture`] records tracing
//! events for assertions on log levels.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use crate::annotate::Annotator;
use crate::broker::{Broker, InMemoryBroker, ReceivedMessage, SubscriptionConfig};
use crate::store::{InMemoryObjectStore, ObjectInfo, ObjectStore};
use crate::{Error, Result};

/// [`InMemoryBroker`] with switchable publish and pull failures
#[derive(Default)]
pub struct FaultyBroker {
    inner: InMemoryBroker,
    fail_publishes: AtomicBool,
    fail_pulls: AtomicBool,
    publish_calls: AtomicUsize,
}

impl FaultyBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryBroker {
        &self.inner
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_pulls(&self, fail: bool) {
        self.fail_pulls.store(fail, Ordering::SeqCst);
    }

    /// Publish attempts, including failed ones
    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for FaultyBroker {
    async fn topic_exists(&self, topic: &str) -> Result<bool> {
        self.inner.topic_exists(topic).await
    }

    async fn create_topic(&self, topic: &str) -> Result<()> {
        self.inner.create_topic(topic).await
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<String> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(Error::Broker(format!("publish to {} refused", topic)));
        }
        self.inner.publish(topic, data).await
    }

    async fn subscription_exists(&self, subscription: &str) -> Result<bool> {
        self.inner.subscription_exists(subscription).await
    }

    async fn create_subscription(
        &self,
        subscription: &str,
        config: &SubscriptionConfig,
    ) -> Result<()> {
        self.inner.create_subscription(subscription, config).await
    }

    async fn delete_subscription(&self, subscription: &str) -> Result<()> {
        self.inner.delete_subscription(subscription).await
    }

    async fn pull(&self, subscription: &str, max_messages: usize) -> Result<Vec<ReceivedMessage>> {
        if self.fail_pulls.load(Ordering::SeqCst) {
            return Err(Error::Broker(format!("pull from {} refused", subscription)));
        }
        self.inner.pull(subscription, max_messages).await
    }

    async fn acknowledge(&self, subscription: &str, ack_ids: &[String]) -> Result<()> {
        self.inner.acknowledge(subscription, ack_ids).await
    }
}

/// [`InMemoryObjectStore`] with switchable failures
#[derive(Default)]
pub struct FaultyObjectStore {
    inner: InMemoryObjectStore,
    unreachable: AtomicBool,
    fail_puts: AtomicBool,
    truncate_puts: AtomicBool,
    fail_gets: AtomicBool,
    fail_removes: AtomicBool,
    put_calls: AtomicUsize,
}

impl FaultyObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryObjectStore {
        &self.inner
    }

    /// Every call fails, as if the endpoint were down
    pub fn set_unreachable(&self, down: bool) {
        self.unreachable.store(down, Ordering::SeqCst);
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Puts store (and report) one byte less than given
    pub fn truncate_puts(&self, truncate: bool) {
        self.truncate_puts.store(truncate, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Store("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FaultyObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.check_reachable()?;
        self.inner.bucket_exists(bucket).await
    }

    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        self.check_reachable()?;
        self.inner.make_bucket(bucket).await
    }

    async fn remove_bucket(&self, bucket: &str) -> Result<()> {
        self.check_reachable()?;
        self.inner.remove_bucket(bucket).await
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<u64> {
        self.check_reachable()?;
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Error::Store(format!("write of {}/{} refused", bucket, key)));
        }
        let data = if self.truncate_puts.load(Ordering::SeqCst) && !data.is_empty() {
            data.slice(..data.len() - 1)
        } else {
            data
        };
        self.inner.put_object(bucket, key, data).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        self.check_reachable()?;
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(Error::Store(format!("read of {}/{} refused", bucket, key)));
        }
        self.inner.get_object(bucket, key).await
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.check_reachable()?;
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(Error::Store(format!("delete of {}/{} refused", bucket, key)));
        }
        self.inner.remove_object(bucket, key).await
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectInfo>> {
        self.check_reachable()?;
        self.inner.list_objects(bucket).await
    }
}

/// Annotator returning fixed labels
#[derive(Default)]
pub struct StaticAnnotator {
    labels: Mutex<Vec<String>>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl StaticAnnotator {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: Mutex::new(labels.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn set_labels<I, S>(&self, labels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut current) = self.labels.lock() {
            *current = labels.into_iter().map(Into::into).collect();
        }
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Annotator for StaticAnnotator {
    async fn labels(&self, _image: &[u8], max_results: usize) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Annotation("quota exceeded".into()));
        }
        let labels = self
            .labels
            .lock()
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(labels.iter().take(max_results).cloned().collect())
    }
}

/// One captured tracing event
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
}

/// Tracing layer that keeps every event it sees
#[derive(Clone, Default)]
pub struct LogCapture {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture events on the current thread until the guard is dropped
    pub fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Levels of the events whose message contains `pattern`
    pub fn levels_matching(&self, pattern: &str) -> Vec<Level> {
        self.records()
            .into_iter()
            .filter(|record| record.message.contains(pattern))
            .map(|record| record.level)
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        struct MessageVisitor(String);

        impl Visit for MessageVisitor {
            fn record_str(&mut self, field: &Field, value: &str) {
                if field.name() == "message" {
                    self.0 = value.to_string();
                }
            }

            fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.0 = format!("{:?}", value);
                }
            }
        }

        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);

        if let Ok(mut records) = self.records.lock() {
            records.push(LogRecord {
                level: *event.metadata().level(),
                message: visitor.0,
            });
        }
    }
}
