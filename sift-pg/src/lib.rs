//! sift-pg library - Purger stage
//!
//! Consumes purge-notifications and deletes the named objects from the
//! local store.

use std::sync::Arc;

use axum::Router;
use sift_common::health::health_routes;
use tower_http::trace::TraceLayer;

pub mod purger;

pub use purger::{Purger, PurgerConfig};

/// Build application router (health endpoints only)
pub fn build_router(purger: Arc<Purger>) -> Router {
    health_routes(purger).layer(TraceLayer::new_for_http())
}
