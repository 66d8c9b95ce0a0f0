//! sift-pg (Purger) - local delete stage
//!
//! Subscribes to the purge topic and removes each named object from the
//! local store.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sift_common::broker::Broker;
use sift_common::config::{pick, required, CommonArgs, DEFAULT_PURGE_TOPIC};
use sift_common::logging::init_tracing;
use sift_common::server::{cancel_on_signal, serve};
use sift_common::store::ObjectStore;
use sift_pg::{build_router, Purger, PurgerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command-line arguments for sift-pg
#[derive(Debug, Parser)]
#[command(name = "sift-pg", version, about = "SIFT purger: local delete stage")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Local bucket checked by the readiness check
    #[arg(long, env = "MINIO_BUCKET")]
    bucket: Option<String>,

    /// Topic for purge-notifications
    #[arg(long, env = "SIFT_PURGE_TOPIC")]
    purge_topic: Option<String>,

    /// Subscription to the purge topic (default: purge topic name)
    #[arg(long, env = "SIFT_SUBSCRIPTION")]
    subscription: Option<String>,

    /// Delete the subscription on shutdown and pre-stop
    #[arg(long, env = "SIFT_DELETE_SUBSCRIPTION_ON_STOP", num_args = 0..=1, default_missing_value = "true")]
    delete_subscription_on_stop: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.common.log_level)?;

    info!("Starting SIFT purger (sift-pg) v{}", env!("CARGO_PKG_VERSION"));

    let file = args.common.load_file();
    let settings = args.common.resolve(&file)?;

    let purge_topic = pick(
        args.purge_topic,
        file.purge_topic,
        DEFAULT_PURGE_TOPIC.to_string(),
    );
    let config = PurgerConfig {
        subscription: pick(args.subscription, file.subscription, purge_topic.clone()),
        delete_subscription_on_stop: pick(
            args.delete_subscription_on_stop,
            file.delete_subscription_on_stop,
            false,
        ),
        purge_topic,
        ..PurgerConfig::new(required(
            "bucket (--bucket / MINIO_BUCKET)",
            args.bucket,
            file.bucket,
        )?)
    };

    let store: Arc<dyn ObjectStore> = Arc::new(settings.local_store());
    let broker: Arc<dyn Broker> = Arc::new(settings.broker()?);

    let purger = Arc::new(
        Purger::new(broker, store, config)
            .await
            .context("purger creation failed")?,
    );

    cancel_on_signal(purger.stop_token());

    let server_cancel = CancellationToken::new();
    let server = tokio::spawn(serve(
        build_router(purger.clone()),
        settings.port,
        server_cancel.clone(),
    ));

    let outcome = purger.run().await;
    purger.shutdown().await;
    server_cancel.cancel();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "HTTP server error"),
        Err(e) => warn!(error = %e, "HTTP server task failed"),
    }

    let stats = outcome.with_context(|| {
        format!("unable to receive from {}", purger.config().subscription)
    })?;
    info!(handled = stats.delivered, "sift-pg stopped");
    Ok(())
}
