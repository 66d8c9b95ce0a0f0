//! Integration tests for the archiver stage

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use sift_common::broker::{Broker, HandlerError, MessageHandler, ReceivedMessage};
use sift_common::store::ObjectStore;
use sift_common::testing::{FaultyBroker, FaultyObjectStore};
use sift_common::{LabeledImage, Location};
use sift_ar::{build_router, Archiver, ArchiverConfig};
use tower::ServiceExt;

// ========================================
// Helpers
// ========================================

struct Harness {
    archiver: Arc<Archiver>,
    broker: Arc<FaultyBroker>,
    local: Arc<FaultyObjectStore>,
    archive: Arc<FaultyObjectStore>,
}

async fn setup_with(config: ArchiverConfig) -> Harness {
    let broker = Arc::new(FaultyBroker::new());

    let local = Arc::new(FaultyObjectStore::new());
    local.make_bucket("bucket").await.unwrap();
    local
        .put_object("bucket", "cat1.jpg", Bytes::from(vec![9u8; 200]))
        .await
        .unwrap();

    let archive = Arc::new(FaultyObjectStore::new());
    archive.make_bucket("archive").await.unwrap();

    let archiver = Arc::new(
        Archiver::new(broker.clone(), local.clone(), archive.clone(), config)
            .await
            .unwrap(),
    );

    Harness {
        archiver,
        broker,
        local,
        archive,
    }
}

/// Sole archiver on the labeled topic, purging after each copy
fn purging(instance: &str) -> ArchiverConfig {
    ArchiverConfig {
        purge_topic: Some("purge".into()),
        ..ArchiverConfig::new(instance, "archive")
    }
}

async fn setup() -> Harness {
    setup_with(purging("pod-1")).await
}

fn notification(labels: &[&str]) -> Vec<u8> {
    LabeledImage::new(
        Location::new("bucket", "cat1.jpg"),
        labels.iter().map(|l| l.to_string()).collect(),
    )
    .encode()
    .unwrap()
}

fn message(data: Vec<u8>) -> ReceivedMessage {
    ReceivedMessage {
        message_id: "m-1".into(),
        ack_id: "a-1".into(),
        data,
        delivery_attempt: 1,
    }
}

// ========================================
// Construction
// ========================================

#[tokio::test]
async fn test_new_creates_topics_and_instance_subscription() {
    let h = setup().await;
    assert_eq!(
        h.broker.inner().topics().await,
        vec!["labeled".to_string(), "purge".to_string()]
    );
    assert_eq!(
        h.broker.inner().subscriptions().await,
        vec!["pod-1+cat".to_string()]
    );
}

#[tokio::test]
async fn test_instances_get_separate_subscriptions() {
    let h = setup().await;
    Archiver::new(
        h.broker.clone(),
        h.local.clone(),
        h.archive.clone(),
        ArchiverConfig::new("pod-2", "archive"),
    )
    .await
    .unwrap();

    assert_eq!(
        h.broker.inner().subscriptions().await,
        vec!["pod-1+cat".to_string(), "pod-2+cat".to_string()]
    );
}

// ========================================
// Handler
// ========================================

#[tokio::test]
async fn test_matching_label_archives_and_requests_purge() {
    let h = setup().await;

    h.archiver
        .handle(&message(notification(&["tabby", "cat"])))
        .await
        .unwrap();

    assert_eq!(
        h.archive.inner().object("archive", "cat1.jpg").await.unwrap().len(),
        200
    );
    assert_eq!(
        h.broker.inner().published("purge").await,
        vec![b"bucket/cat1.jpg".to_vec()]
    );
    // Local copy is left for the purger
    assert!(h.local.inner().object("bucket", "cat1.jpg").await.is_some());
}

#[tokio::test]
async fn test_substring_match_is_case_sensitive() {
    let h = setup().await;

    h.archiver
        .handle(&message(notification(&["Cat", "CAT"])))
        .await
        .unwrap();
    assert_eq!(h.archive.put_calls(), 0);

    h.archiver
        .handle(&message(notification(&["wildcat"])))
        .await
        .unwrap();
    assert_eq!(h.archive.put_calls(), 1);
}

#[tokio::test]
async fn test_non_matching_labels_are_skipped() {
    let h = setup().await;

    h.archiver
        .handle(&message(notification(&["dog", "animal"])))
        .await
        .unwrap();

    assert_eq!(h.archive.put_calls(), 0);
    assert_eq!(h.broker.publish_calls(), 0);
}

#[tokio::test]
async fn test_other_target_ignores_cat_labels() {
    let h = setup_with(ArchiverConfig {
        target_label: "dog".into(),
        ..ArchiverConfig::new("pod-1", "archive")
    })
    .await;

    h.archiver
        .handle(&message(notification(&["tabby", "cat"])))
        .await
        .unwrap();

    assert_eq!(h.archive.put_calls(), 0);
    assert_eq!(h.broker.publish_calls(), 0);
}

#[tokio::test]
async fn test_malformed_notifications_are_rejected() {
    let h = setup().await;

    let bad: [&[u8]; 5] = [
        b"not json",
        br#"{"labels":["cat"]}"#,
        br#"{"location":"bucket/cat1.jpg"}"#,
        br#"{"location":"bucket/cat1.jpg","labels":[]}"#,
        br#"{"location":"a/b/c","labels":["cat"]}"#,
    ];
    for payload in bad {
        let result = h.archiver.handle(&message(payload.to_vec())).await;
        assert!(matches!(result, Err(HandlerError::Malformed(_))), "{payload:?}");
    }

    assert_eq!(h.archive.put_calls(), 0);
    assert_eq!(h.broker.publish_calls(), 0);
}

#[tokio::test]
async fn test_local_read_failure_is_transient() {
    let h = setup().await;
    h.local.fail_gets(true);

    let result = h.archiver.handle(&message(notification(&["cat"]))).await;

    assert!(matches!(result, Err(HandlerError::Transient { .. })));
    assert_eq!(h.archive.put_calls(), 0);
}

#[tokio::test]
async fn test_archive_write_failure_is_transient_without_purge() {
    let h = setup().await;
    h.archive.fail_puts(true);

    let result = h.archiver.handle(&message(notification(&["cat"]))).await;

    assert!(matches!(result, Err(HandlerError::Transient { .. })));
    assert_eq!(h.broker.publish_calls(), 0);
}

#[tokio::test]
async fn test_purge_publish_failure_is_transient() {
    let h = setup().await;
    h.broker.fail_publishes(true);

    let result = h.archiver.handle(&message(notification(&["cat"]))).await;

    assert!(matches!(result, Err(HandlerError::Transient { .. })));
    // Durable write already happened; redelivery overwrites it
    assert!(h.archive.inner().object("archive", "cat1.jpg").await.is_some());
}

#[tokio::test]
async fn test_purge_is_off_by_default() {
    let h = setup_with(ArchiverConfig::new("pod-1", "archive")).await;

    h.archiver
        .handle(&message(notification(&["cat"])))
        .await
        .unwrap();

    assert_eq!(h.archive.put_calls(), 1);
    assert_eq!(h.broker.publish_calls(), 0);
    assert_eq!(h.broker.inner().topics().await, vec!["labeled".to_string()]);
}

// ========================================
// Fan-out
// ========================================

#[tokio::test]
async fn test_archivers_with_overlapping_targets_each_get_a_copy() {
    let h = setup_with(ArchiverConfig::new("pod-1", "cats")).await;
    h.archive.make_bucket("cats").await.unwrap();
    h.archive.make_bucket("tabbies").await.unwrap();

    let tabby = Archiver::new(
        h.broker.clone(),
        h.local.clone(),
        h.archive.clone(),
        ArchiverConfig {
            subscription: sift_ar::subscription_name("pod-2", "tabby"),
            target_label: "tabby".into(),
            ..ArchiverConfig::new("pod-2", "tabbies")
        },
    )
    .await
    .unwrap();

    let labeled = message(notification(&["tabby", "cat"]));
    h.archiver.handle(&labeled).await.unwrap();
    tabby.handle(&labeled).await.unwrap();

    assert!(h.archive.inner().object("cats", "cat1.jpg").await.is_some());
    assert!(h.archive.inner().object("tabbies", "cat1.jpg").await.is_some());
    // Neither copy removed the shared local object
    assert!(h.local.inner().object("bucket", "cat1.jpg").await.is_some());
    assert!(h.broker.inner().published("purge").await.is_empty());
}

// ========================================
// Receive loop
// ========================================

#[tokio::test(start_paused = true)]
async fn test_run_redelivers_after_archive_failure() {
    let h = setup().await;
    h.archive.fail_puts(true);
    h.broker
        .publish("labeled", notification(&["cat"]))
        .await
        .unwrap();

    let archiver = h.archiver.clone();
    let run = tokio::spawn(async move { archiver.run().await });

    while h.archive.put_calls() == 0 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    h.archive.fail_puts(false);

    while h.broker.inner().published("purge").await.is_empty() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    h.archiver.stop();
    let stats = run.await.unwrap().unwrap();

    assert_eq!(stats.retried, 1);
    assert_eq!(stats.acked, 1);
    assert_eq!(h.broker.inner().unacked("pod-1+cat").await, Some(0));
}

// ========================================
// Lifecycle
// ========================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_run_and_deletes_subscription() {
    let h = setup().await;
    let archiver = h.archiver.clone();
    let run = tokio::spawn(async move { archiver.run().await });

    tokio::time::sleep(Duration::from_secs(5)).await;
    h.archiver.shutdown().await;

    let stats = run.await.unwrap().unwrap();
    assert_eq!(stats.delivered, 0);
    assert!(h.broker.inner().subscriptions().await.is_empty());
}

#[tokio::test]
async fn test_shutdown_keeps_subscription_when_not_owned() {
    let h = setup_with(ArchiverConfig {
        owns_subscription: false,
        ..ArchiverConfig::new("pod-1", "archive")
    })
    .await;

    h.archiver.shutdown().await;
    assert_eq!(
        h.broker.inner().subscriptions().await,
        vec!["pod-1+cat".to_string()]
    );
}

#[tokio::test]
async fn test_health_endpoints() {
    let h = setup().await;
    let app = build_router(h.archiver.clone());

    let status = |uri: &'static str| {
        let app = app.clone();
        async move {
            app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap()
                .status()
        }
    };

    assert_eq!(status("/_alive").await, StatusCode::OK);
    assert_eq!(status("/_ready").await, StatusCode::OK);

    // Readiness follows the durable store, not the local one
    h.local.set_unreachable(true);
    assert_eq!(status("/_ready").await, StatusCode::OK);
    h.archive.set_unreachable(true);
    assert_eq!(status("/_ready").await, StatusCode::EXPECTATION_FAILED);

    assert_eq!(status("/_prestop").await, StatusCode::OK);
    assert!(h.broker.inner().subscriptions().await.is_empty());
}
