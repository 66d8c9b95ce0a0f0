//! Liveness, readiness and pre-stop endpoints
//!
//! - `GET /_alive`: 200 always
//! - `GET /_ready`: 200 when the stage can do work, else 417
//! - `GET /_prestop`: runs best-effort stage cleanup, 200 always

use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use tracing::warn;

use crate::store::ObjectStore;

/// Hooks a stage exposes to the health endpoints
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    async fn ready(&self) -> bool;

    /// Cleanup before the process is stopped; failures are logged, not returned
    async fn prestop(&self);
}

pub fn health_routes(stage: Arc<dyn Lifecycle>) -> Router {
    Router::new()
        .route("/_alive", get(alive))
        .route("/_ready", get(ready))
        .route("/_prestop", get(prestop))
        .with_state(stage)
}

async fn alive() -> StatusCode {
    StatusCode::OK
}

async fn ready(State(stage): State<Arc<dyn Lifecycle>>) -> StatusCode {
    if stage.ready().await {
        StatusCode::OK
    } else {
        StatusCode::EXPECTATION_FAILED
    }
}

async fn prestop(State(stage): State<Arc<dyn Lifecycle>>) -> StatusCode {
    stage.prestop().await;
    StatusCode::OK
}

/// True when the store answers and `bucket` exists
pub async fn bucket_ready(store: &dyn ObjectStore, bucket: &str) -> bool {
    match store.bucket_exists(bucket).await {
        Ok(exists) => exists,
        Err(e) => {
            warn!(bucket, error = %e, "Store not reachable");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tower::ServiceExt;

    #[derive(Default)]
    struct Stage {
        ready: AtomicBool,
        prestops: AtomicUsize,
    }

    #[async_trait]
    impl Lifecycle for Stage {
        async fn ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn prestop(&self) {
            self.prestops.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn alive_is_always_ok() {
        let app = health_routes(Arc::new(Stage::default()));
        assert_eq!(get_status(app, "/_alive").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_reflects_stage() {
        let stage = Arc::new(Stage::default());
        let app = health_routes(stage.clone());
        assert_eq!(
            get_status(app.clone(), "/_ready").await,
            StatusCode::EXPECTATION_FAILED
        );

        stage.ready.store(true, Ordering::SeqCst);
        assert_eq!(get_status(app, "/_ready").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn prestop_runs_cleanup() {
        let stage = Arc::new(Stage::default());
        let app = health_routes(stage.clone());
        assert_eq!(get_status(app, "/_prestop").await, StatusCode::OK);
        assert_eq!(stage.prestops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bucket_ready_needs_bucket() {
        let store = crate::store::InMemoryObjectStore::new();
        assert!(!bucket_ready(&store, "bucket").await);
        store.make_bucket("bucket").await.unwrap();
        assert!(bucket_ready(&store, "bucket").await);
    }
}
