//! sift-lb (Labeler) - image annotation stage
//!
//! Subscribes to the image topic, labels each image through Cloud Vision and
//! publishes a labeled-notification.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sift_common::annotate::{Annotator, VisionAnnotator, DEFAULT_VISION_ENDPOINT};
use sift_common::broker::Broker;
use sift_common::config::{
    pick, required, CommonArgs, DEFAULT_IMAGE_TOPIC, DEFAULT_LABELED_TOPIC,
};
use sift_common::logging::init_tracing;
use sift_common::server::{cancel_on_signal, serve};
use sift_common::store::ObjectStore;
use sift_lb::{build_router, Labeler, LabelerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command-line arguments for sift-lb
#[derive(Debug, Parser)]
#[command(name = "sift-lb", version, about = "SIFT labeler: image annotation stage")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Local bucket checked by the readiness check
    #[arg(long, env = "MINIO_BUCKET")]
    bucket: Option<String>,

    /// Topic for image-notifications
    #[arg(long, env = "SIFT_IMAGE_TOPIC")]
    image_topic: Option<String>,

    /// Topic for labeled-notifications
    #[arg(long, env = "SIFT_LABELED_TOPIC")]
    labeled_topic: Option<String>,

    /// Subscription to the image topic (default: image topic name)
    #[arg(long, env = "SIFT_SUBSCRIPTION")]
    subscription: Option<String>,

    /// Delete the subscription on shutdown and pre-stop
    #[arg(long, env = "SIFT_DELETE_SUBSCRIPTION_ON_STOP", num_args = 0..=1, default_missing_value = "true")]
    delete_subscription_on_stop: Option<bool>,

    /// Cloud Vision REST endpoint
    #[arg(long, env = "SIFT_VISION_ENDPOINT")]
    vision_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.common.log_level)?;

    info!("Starting SIFT labeler (sift-lb) v{}", env!("CARGO_PKG_VERSION"));

    let file = args.common.load_file();
    let settings = args.common.resolve(&file)?;

    let image_topic = pick(
        args.image_topic,
        file.image_topic,
        DEFAULT_IMAGE_TOPIC.to_string(),
    );
    let config = LabelerConfig {
        labeled_topic: pick(
            args.labeled_topic,
            file.labeled_topic,
            DEFAULT_LABELED_TOPIC.to_string(),
        ),
        subscription: pick(args.subscription, file.subscription, image_topic.clone()),
        delete_subscription_on_stop: pick(
            args.delete_subscription_on_stop,
            file.delete_subscription_on_stop,
            false,
        ),
        image_topic,
        ..LabelerConfig::new(required(
            "bucket (--bucket / MINIO_BUCKET)",
            args.bucket,
            file.bucket,
        )?)
    };
    let vision_endpoint = pick(
        args.vision_endpoint,
        file.vision_endpoint,
        DEFAULT_VISION_ENDPOINT.to_string(),
    );

    let store: Arc<dyn ObjectStore> = Arc::new(settings.local_store());
    let broker: Arc<dyn Broker> = Arc::new(settings.broker()?);
    let annotator: Arc<dyn Annotator> =
        Arc::new(VisionAnnotator::new(vision_endpoint, settings.token_source())?);

    let labeler = Arc::new(
        Labeler::new(broker, store, annotator, config)
            .await
            .context("labeler creation failed")?,
    );

    cancel_on_signal(labeler.stop_token());

    let server_cancel = CancellationToken::new();
    let server = tokio::spawn(serve(
        build_router(labeler.clone()),
        settings.port,
        server_cancel.clone(),
    ));

    let outcome = labeler.run().await;
    labeler.shutdown().await;
    server_cancel.cancel();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "HTTP server error"),
        Err(e) => warn!(error = %e, "HTTP server task failed"),
    }

    let stats = outcome.with_context(|| {
        format!("unable to receive from {}", labeler.config().subscription)
    })?;
    info!(handled = stats.delivered, "sift-lb stopped");
    Ok(())
}
