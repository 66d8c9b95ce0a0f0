//! sift-rx (Receiver) - image upload ingress
//!
//! Accepts `POST /receive` uploads, stores them in the local bucket and
//! publishes an image-notification per upload. Removes objects older than
//! the retention window every sweep interval.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sift_common::broker::Broker;
use sift_common::config::{
    pick, required, CommonArgs, DEFAULT_BODY_LIMIT, DEFAULT_IMAGE_TOPIC,
};
use sift_common::logging::init_tracing;
use sift_common::server::{cancel_on_signal, serve};
use sift_common::store::{ensure_bucket, ObjectStore};
use sift_rx::{build_router, Receiver, ReceiverConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Command-line arguments for sift-rx
#[derive(Debug, Parser)]
#[command(name = "sift-rx", version, about = "SIFT receiver: image upload ingress")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Local bucket for uploaded images
    #[arg(long, env = "MINIO_BUCKET")]
    bucket: Option<String>,

    /// Topic for image-notifications
    #[arg(long, env = "SIFT_IMAGE_TOPIC")]
    image_topic: Option<String>,

    /// Maximum upload request size in bytes
    #[arg(long, env = "SIFT_BODY_LIMIT")]
    body_limit: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.common.log_level)?;

    info!("Starting SIFT receiver (sift-rx) v{}", env!("CARGO_PKG_VERSION"));

    let file = args.common.load_file();
    let settings = args.common.resolve(&file)?;
    let bucket = required("bucket (--bucket / MINIO_BUCKET)", args.bucket, file.bucket)?;
    let image_topic = pick(
        args.image_topic,
        file.image_topic,
        DEFAULT_IMAGE_TOPIC.to_string(),
    );
    let body_limit = pick(args.body_limit, file.body_limit, DEFAULT_BODY_LIMIT);

    let store: Arc<dyn ObjectStore> = Arc::new(settings.local_store());
    ensure_bucket(store.as_ref(), &bucket)
        .await
        .with_context(|| format!("unable to prepare local bucket {}", bucket))?;

    let broker: Arc<dyn Broker> = Arc::new(settings.broker()?);

    let config = ReceiverConfig {
        image_topic,
        ..ReceiverConfig::new(&bucket)
    };
    let receiver = Arc::new(
        Receiver::new(store, broker, config)
            .await
            .context("receiver creation failed")?,
    );

    let cancel = CancellationToken::new();
    cancel_on_signal(cancel.clone());

    let app = build_router(receiver.clone(), body_limit);
    serve(app, settings.port, cancel)
        .await
        .context("HTTP server error")?;

    receiver.shutdown().await;
    info!("sift-rx stopped");
    Ok(())
}
