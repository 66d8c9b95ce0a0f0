//! Subscription receive loop
//!
//! One loop per stage process pulls batches from its subscription and runs
//! handlers concurrently, bounded by `max_outstanding`. The acknowledge
//! policy is uniform across stages:
//! - handler succeeded: acknowledge
//! - malformed message: log, acknowledge (never retried)
//! - transient failure: leave unacknowledged; the broker redelivers after
//!   the ack deadline
//!
//! There is no local retry or backoff. Cancelling the token stops pulling
//! and dispatching; handlers already running finish before `receive`
//! returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error as ThisError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Broker, ReceivedMessage};
use crate::message::MalformedMessage;
use crate::{Error, Result};

/// How a handler failed, which decides whether the message is acknowledged
#[derive(Debug, ThisError)]
pub enum HandlerError {
    /// Permanent: the message can never be processed; acknowledge it
    #[error("malformed message: {0}")]
    Malformed(#[from] MalformedMessage),

    /// Retryable: leave unacknowledged for broker redelivery
    #[error("{context}: {source}")]
    Transient {
        context: String,
        #[source]
        source: Error,
    },
}

impl HandlerError {
    pub fn transient(context: impl Into<String>, source: Error) -> Self {
        HandlerError::Transient {
            context: context.into(),
            source,
        }
    }
}

/// Per-message processing for one pipeline stage
///
/// Handlers run concurrently and may see the same message more than once,
/// so every side effect must be safe to repeat.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: &ReceivedMessage) -> std::result::Result<(), HandlerError>;
}

/// Flow control for [`receive`]
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// Handlers allowed to run at once
    pub max_outstanding: usize,
    /// Upper bound on messages requested per pull
    pub max_batch: usize,
    /// Wait after an empty pull or a pull error
    pub poll_interval: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_outstanding: 10,
            max_batch: 10,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Totals for one run of [`receive`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveStats {
    pub delivered: u64,
    pub acked: u64,
    pub rejected: u64,
    pub retried: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    acked: AtomicU64,
    rejected: AtomicU64,
    retried: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ReceiveStats {
        ReceiveStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }
}

/// Pull from `subscription` and dispatch to `handler` until `cancel` fires
///
/// Returns an error only when the subscription no longer exists; other pull
/// failures are logged and retried after `poll_interval`.
pub async fn receive<H: MessageHandler>(
    broker: Arc<dyn Broker>,
    subscription: &str,
    handler: Arc<H>,
    options: ReceiveOptions,
    cancel: CancellationToken,
) -> Result<ReceiveStats> {
    let max_outstanding = options.max_outstanding.max(1);
    let permits = Arc::new(Semaphore::new(max_outstanding));
    let counters = Arc::new(Counters::default());

    info!(
        subscription,
        max_outstanding,
        max_batch = options.max_batch,
        "Receiving messages"
    );

    let outcome = loop {
        // Cancellation wins over a ready pull so a stage may delete its
        // subscription right after stopping
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(e) => break Err(Error::Internal(e.to_string())),
            },
        };

        let room = 1 + permits.available_permits();
        let max_messages = options.max_batch.clamp(1, room);

        let pulled = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            pulled = broker.pull(subscription, max_messages) => pulled,
        };

        let batch = match pulled {
            Ok(batch) => batch,
            Err(Error::NotFound(what)) => {
                error!(subscription, "Subscription no longer exists");
                break Err(Error::NotFound(what));
            }
            Err(e) => {
                warn!(subscription, error = %e, "Pull failed");
                drop(permit);
                if idle(&cancel, options.poll_interval).await {
                    break Ok(());
                }
                continue;
            }
        };

        if batch.is_empty() {
            drop(permit);
            if idle(&cancel, options.poll_interval).await {
                break Ok(());
            }
            continue;
        }

        let mut spare = Some(permit);
        for message in batch {
            // The batch never exceeds the permits available when it was requested
            let permit = match spare.take() {
                Some(permit) => permit,
                None => match permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return Err(Error::Internal(e.to_string())),
                },
            };
            counters.delivered.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(dispatch(
                broker.clone(),
                subscription.to_string(),
                handler.clone(),
                message,
                counters.clone(),
                permit,
            ));
        }
    };

    // Wait for in-flight handlers: each holds a permit until it finishes
    match permits.acquire_many(max_outstanding as u32).await {
        Ok(_all) => {}
        Err(e) => warn!(subscription, error = %e, "Could not wait for in-flight handlers"),
    }

    let stats = counters.snapshot();
    info!(
        subscription,
        delivered = stats.delivered,
        acked = stats.acked,
        rejected = stats.rejected,
        retried = stats.retried,
        "Stopped receiving messages"
    );
    outcome.map(|()| stats)
}

/// Sleep for `period`; true when cancelled first
async fn idle(cancel: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(period) => false,
    }
}

async fn dispatch<H: MessageHandler>(
    broker: Arc<dyn Broker>,
    subscription: String,
    handler: Arc<H>,
    message: ReceivedMessage,
    counters: Arc<Counters>,
    _permit: OwnedSemaphorePermit,
) {
    debug!(
        subscription = %subscription,
        message_id = %message.message_id,
        delivery_attempt = message.delivery_attempt,
        "Handling message"
    );

    match handler.handle(&message).await {
        Ok(()) => {
            counters.acked.fetch_add(1, Ordering::Relaxed);
            acknowledge(broker.as_ref(), &subscription, &message).await;
        }
        Err(HandlerError::Malformed(reason)) => {
            error!(
                subscription = %subscription,
                message_id = %message.message_id,
                data = %message.data_lossy(),
                error = %reason,
                "Bad message, rejecting"
            );
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            acknowledge(broker.as_ref(), &subscription, &message).await;
        }
        Err(e @ HandlerError::Transient { .. }) => {
            warn!(
                subscription = %subscription,
                message_id = %message.message_id,
                delivery_attempt = message.delivery_attempt,
                error = %e,
                "Processing failed, leaving message for redelivery"
            );
            counters.retried.fetch_add(1, Ordering::Relaxed);
        }
    }
}

async fn acknowledge(broker: &dyn Broker, subscription: &str, message: &ReceivedMessage) {
    if let Err(e) = broker
        .acknowledge(subscription, std::slice::from_ref(&message.ack_id))
        .await
    {
        // The handler already ran; redelivery repeats idempotent work
        warn!(
            subscription,
            message_id = %message.message_id,
            error = %e,
            "Acknowledge failed"
        );
    }
}
