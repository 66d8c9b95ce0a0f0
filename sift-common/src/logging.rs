//! Tracing subscriber setup for stage binaries

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

/// Install the global subscriber: `RUST_LOG` if set, else `default_level`
pub fn init_tracing(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| Error::Config(format!("invalid log level {:?}: {}", default_level, e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| Error::Internal(format!("tracing already initialised: {}", e)))
}
