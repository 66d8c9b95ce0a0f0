//! Retention sweep for the receiver's local bucket
//!
//! Objects older than the retention window are deleted whether or not the
//! pipeline has finished with them. The sweep races safely with the purger:
//! whichever deletes first wins, the other logs a failed delete.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sift_common::store::ObjectStore;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one pass over the bucket
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Delete every object in `bucket` last modified more than `retention` before `now`
///
/// Listing and deletion failures are logged; the pass continues with the
/// next object.
pub async fn sweep_once(
    store: &dyn ObjectStore,
    bucket: &str,
    retention: Duration,
    now: DateTime<Utc>,
) -> SweepReport {
    let mut report = SweepReport::default();

    let objects = match store.list_objects(bucket).await {
        Ok(objects) => objects,
        Err(e) => {
            error!(bucket, error = %e, "Problem listing contents of bucket");
            return report;
        }
    };

    for object in objects {
        report.examined += 1;
        // Objects stamped in the future count as brand new
        let age = (now - object.last_modified).to_std().unwrap_or_default();
        if age <= retention {
            continue;
        }

        match store.remove_object(bucket, &object.key).await {
            Ok(()) => {
                report.removed += 1;
                info!(bucket, key = %object.key, age_secs = age.as_secs(), "Removed expired object");
            }
            Err(e) => {
                report.failed += 1;
                error!(bucket, key = %object.key, error = %e, "Unable to remove object from local storage");
            }
        }
    }

    debug!(
        bucket,
        examined = report.examined,
        removed = report.removed,
        failed = report.failed,
        "Sweep complete"
    );
    report
}

/// Wall-clock time advanced by the runtime's monotonic clock
///
/// Ages are measured against this instead of `Utc::now()` on every tick so
/// that they follow `tokio::time`, paused or not.
#[derive(Debug, Clone, Copy)]
struct SweepClock {
    wall: DateTime<Utc>,
    started: Instant,
}

impl SweepClock {
    fn start() -> Self {
        Self {
            wall: Utc::now(),
            started: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall + elapsed
    }
}

/// Periodic sweep task owned by the receiver
///
/// The first pass runs one `period` after [`Sweeper::start`].
pub struct Sweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub fn start(
        store: Arc<dyn ObjectStore>,
        bucket: String,
        retention: Duration,
        period: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let clock = SweepClock::start();
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                bucket = %bucket,
                period_secs = period.as_secs(),
                retention_secs = retention.as_secs(),
                "Sweeper started"
            );

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        sweep_once(store.as_ref(), &bucket, retention, clock.now()).await;
                    }
                }
            }
            info!(bucket = %bucket, "Sweeper stopped");
        });

        Self { cancel, handle }
    }

    /// Cancel the task and wait for it; a pass in progress is abandoned at its next await
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Sweeper task ended abnormally");
        }
    }
}
