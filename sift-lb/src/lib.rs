//! sift-lb library - Labeler stage
//!
//! Consumes image-notifications, asks the annotation service for the top
//! labels of each image and publishes a labeled-notification.

use std::sync::Arc;

use axum::Router;
use sift_common::health::health_routes;
use tower_http::trace::TraceLayer;

pub mod labeler;

pub use labeler::{Labeler, LabelerConfig, STALE_DELIVERY_ATTEMPT};

/// Build application router (health endpoints only)
pub fn build_router(labeler: Arc<Labeler>) -> Router {
    health_routes(labeler).layer(TraceLayer::new_for_http())
}
