//! sift-ar library - Archiver stage
//!
//! Consumes labeled-notifications and copies images carrying the target
//! label to durable storage, then optionally asks the purger to drop the
//! local copy.

use std::sync::Arc;

use axum::Router;
use sift_common::health::health_routes;
use tower_http::trace::TraceLayer;

pub mod archiver;

pub use archiver::{subscription_name, Archiver, ArchiverConfig};

/// Build application router (health endpoints only)
pub fn build_router(archiver: Arc<Archiver>) -> Router {
    health_routes(archiver).layer(TraceLayer::new_for_http())
}
