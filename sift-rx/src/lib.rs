//! sift-rx library - Receiver stage
//!
//! HTTP ingress for images: each upload is written to the local object
//! store and announced on the image topic. Also owns the retention sweep
//! of its local bucket.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::Router;
use sift_common::health::health_routes;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;
pub mod receiver;
pub mod sweeper;

pub use receiver::{Receiver, ReceiverConfig};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub receiver: Arc<Receiver>,
}

impl AppState {
    pub fn new(receiver: Arc<Receiver>) -> Self {
        Self { receiver }
    }
}

/// Build application router: `POST /receive` plus the health endpoints
pub fn build_router(receiver: Arc<Receiver>, body_limit: usize) -> Router {
    let upload = Router::new()
        .route("/receive", post(api::receive_upload))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(AppState::new(receiver.clone()));

    Router::new()
        .merge(upload)
        .merge(health_routes(receiver))
        .layer(TraceLayer::new_for_http())
}
