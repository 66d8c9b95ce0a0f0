//! sift-ar (Archiver) - durable copy of target-labeled images
//!
//! Subscribes to the labeled topic with an instance-owned subscription,
//! copies images whose labels contain the target label to the archive
//! bucket and, with `--purge-after-archive`, publishes a purge-notification
//! for each archived image.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sift_common::broker::Broker;
use sift_common::config::{
    pick, required, CommonArgs, DEFAULT_LABELED_TOPIC, DEFAULT_PURGE_TOPIC, DEFAULT_TARGET_LABEL,
};
use sift_common::logging::init_tracing;
use sift_common::server::{cancel_on_signal, serve};
use sift_common::store::{ObjectStore, S3Config, S3ObjectStore};
use sift_ar::{build_router, subscription_name, Archiver, ArchiverConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command-line arguments for sift-ar
#[derive(Debug, Parser)]
#[command(name = "sift-ar", version, about = "SIFT archiver: durable copy of target-labeled images")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Instance identity, used to scope the subscription
    #[arg(long, env = "POD_NAME")]
    instance: Option<String>,

    /// Label substring that selects images for archiving
    #[arg(long, env = "SIFT_TARGET_LABEL")]
    target_label: Option<String>,

    /// Topic for labeled-notifications
    #[arg(long, env = "SIFT_LABELED_TOPIC")]
    labeled_topic: Option<String>,

    /// Publish a purge-notification after each archive
    ///
    /// Only safe when this is the sole archiver on the labeled topic.
    /// Off by default, leaving local copies to the retention sweep.
    #[arg(long, env = "SIFT_PURGE_AFTER_ARCHIVE", num_args = 0..=1, default_missing_value = "true")]
    purge_after_archive: Option<bool>,

    /// Topic for purge-notifications, used with --purge-after-archive
    #[arg(long, env = "SIFT_PURGE_TOPIC")]
    purge_topic: Option<String>,

    /// Subscription to the labeled topic (default: "<instance>+<target label>")
    #[arg(long, env = "SIFT_SUBSCRIPTION")]
    subscription: Option<String>,

    /// Delete the subscription on shutdown and pre-stop
    #[arg(long, env = "SIFT_DELETE_SUBSCRIPTION_ON_STOP", num_args = 0..=1, default_missing_value = "true")]
    delete_subscription_on_stop: Option<bool>,

    /// Durable bucket for archived images
    #[arg(long, env = "SIFT_ARCHIVE_BUCKET")]
    archive_bucket: Option<String>,

    /// Durable store endpoint (default: AWS S3)
    #[arg(long, env = "SIFT_ARCHIVE_ENDPOINT")]
    archive_endpoint: Option<String>,

    #[arg(long, env = "SIFT_ARCHIVE_ACCESSKEYID", hide_env_values = true)]
    archive_access_key_id: Option<String>,

    #[arg(long, env = "SIFT_ARCHIVE_SECRETKEY", hide_env_values = true)]
    archive_secret_access_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.common.log_level)?;

    info!("Starting SIFT archiver (sift-ar) v{}", env!("CARGO_PKG_VERSION"));

    let file = args.common.load_file();
    let settings = args.common.resolve(&file)?;

    let instance = required("instance (--instance / POD_NAME)", args.instance, None)?;
    let target_label = pick(
        args.target_label,
        file.target_label,
        DEFAULT_TARGET_LABEL.to_string(),
    );
    let archive_bucket = required(
        "archive bucket (--archive-bucket / SIFT_ARCHIVE_BUCKET)",
        args.archive_bucket,
        file.archive_bucket,
    )?;

    let config = ArchiverConfig {
        labeled_topic: pick(
            args.labeled_topic,
            file.labeled_topic,
            DEFAULT_LABELED_TOPIC.to_string(),
        ),
        subscription: pick(
            args.subscription,
            file.subscription,
            subscription_name(&instance, &target_label),
        ),
        target_label,
        purge_topic: pick(args.purge_after_archive, file.purge_after_archive, false).then(|| {
            pick(
                args.purge_topic,
                file.purge_topic,
                DEFAULT_PURGE_TOPIC.to_string(),
            )
        }),
        owns_subscription: pick(
            args.delete_subscription_on_stop,
            file.delete_subscription_on_stop,
            true,
        ),
        ..ArchiverConfig::new(&instance, archive_bucket)
    };

    let archive_config = S3Config::new(
        args.archive_endpoint.or(file.archive_endpoint),
        &settings.region,
        pick(
            args.archive_access_key_id,
            file.archive_access_key_id,
            settings.access_key_id.clone(),
        ),
        pick(
            args.archive_secret_access_key,
            file.archive_secret_access_key,
            settings.secret_access_key.clone(),
        ),
    );

    let local: Arc<dyn ObjectStore> = Arc::new(settings.local_store());
    let archive: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(archive_config));
    let broker: Arc<dyn Broker> = Arc::new(settings.broker()?);

    let archiver = Arc::new(
        Archiver::new(broker, local, archive, config)
            .await
            .context("archiver creation failed")?,
    );

    cancel_on_signal(archiver.stop_token());

    let server_cancel = CancellationToken::new();
    let server = tokio::spawn(serve(
        build_router(archiver.clone()),
        settings.port,
        server_cancel.clone(),
    ));

    let outcome = archiver.run().await;
    archiver.shutdown().await;
    server_cancel.cancel();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "HTTP server error"),
        Err(e) => warn!(error = %e, "HTTP server task failed"),
    }

    let stats = outcome.with_context(|| {
        format!("unable to receive from {}", archiver.config().subscription)
    })?;
    info!(handled = stats.delivered, "sift-ar stopped");
    Ok(())
}
