//! Object store port
//!
//! Bucketed byte storage. The receiver's transient local store and the
//! archiver's durable store are both reached through [`ObjectStore`],
//! bound to different backends and buckets.

mod memory;
mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::Result;

pub use memory::InMemoryObjectStore;
pub use s3::{S3Config, S3ObjectStore};

/// Listing entry for one stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Missing buckets and objects are reported as `Error::NotFound`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Fails with `Error::AlreadyExists` when the bucket is already there
    async fn make_bucket(&self, bucket: &str) -> Result<()>;

    /// The bucket must be empty
    async fn remove_bucket(&self, bucket: &str) -> Result<()>;

    /// Write (or overwrite) `key`; returns the size the store reports afterwards
    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<u64>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes>;

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<()>;

    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectInfo>>;
}

/// Create `bucket` unless it already exists
pub async fn ensure_bucket(store: &dyn ObjectStore, bucket: &str) -> Result<()> {
    if store.bucket_exists(bucket).await? {
        return Ok(());
    }
    match store.make_bucket(bucket).await {
        Ok(()) => {
            tracing::info!(bucket, "Created bucket");
            Ok(())
        }
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_bucket_is_idempotent() {
        let store = InMemoryObjectStore::new();
        ensure_bucket(&store, "bucket").await.unwrap();
        ensure_bucket(&store, "bucket").await.unwrap();
        assert!(store.bucket_exists("bucket").await.unwrap());
    }
}
