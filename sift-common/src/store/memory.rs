//! InMemoryObjectStore - process-local object store
//!
//! Last-modified timestamps come from the wall clock; tests backdate objects
//! with [`InMemoryObjectStore::put_object_modified_at`] to exercise the
//! retention sweep.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{ObjectInfo, ObjectStore};
use crate::{Error, Result};

#[derive(Default)]
pub struct InMemoryObjectStore {
    buckets: RwLock<BTreeMap<String, BTreeMap<String, StoredObject>>>,
}

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

fn no_bucket(bucket: &str) -> Error {
    Error::NotFound(format!("bucket {}", bucket))
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with an explicit last-modified time
    pub async fn put_object_modified_at(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        last_modified: DateTime<Utc>,
    ) -> Result<u64> {
        let mut buckets = self.buckets.write().await;
        let objects = buckets.get_mut(bucket).ok_or_else(|| no_bucket(bucket))?;
        let size = data.len() as u64;
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified,
            },
        );
        Ok(size)
    }

    /// Keys in `bucket`, sorted; empty when the bucket is missing
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Bytes stored under `key`, if any
    pub async fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.data.clone())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.buckets.read().await.contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        if buckets.contains_key(bucket) {
            return Err(Error::AlreadyExists(format!("bucket {}", bucket)));
        }
        buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn remove_bucket(&self, bucket: &str) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        match buckets.get(bucket) {
            None => Err(no_bucket(bucket)),
            Some(objects) if !objects.is_empty() => Err(Error::Store(format!(
                "bucket {} is not empty ({} objects)",
                bucket,
                objects.len()
            ))),
            Some(_) => {
                buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<u64> {
        self.put_object_modified_at(bucket, key, data, Utc::now()).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let buckets = self.buckets.read().await;
        let objects = buckets.get(bucket).ok_or_else(|| no_bucket(bucket))?;
        objects
            .get(key)
            .map(|object| object.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object {}/{}", bucket, key)))
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        let objects = buckets.get_mut(bucket).ok_or_else(|| no_bucket(bucket))?;
        objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("object {}/{}", bucket, key)))
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectInfo>> {
        let buckets = self.buckets.read().await;
        let objects = buckets.get(bucket).ok_or_else(|| no_bucket(bucket))?;
        Ok(objects
            .iter()
            .map(|(key, object)| ObjectInfo {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: object.last_modified,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn store_with_bucket() -> InMemoryObjectStore {
        let store = InMemoryObjectStore::new();
        store.make_bucket("bucket").await.unwrap();
        store
    }

    #[tokio::test]
    async fn put_get_remove() {
        let store = store_with_bucket().await;
        let size = store
            .put_object("bucket", "cat1.jpg", Bytes::from_static(&[7u8; 200]))
            .await
            .unwrap();
        assert_eq!(size, 200);
        assert_eq!(store.get_object("bucket", "cat1.jpg").await.unwrap().len(), 200);

        store.remove_object("bucket", "cat1.jpg").await.unwrap();
        assert!(store.get_object("bucket", "cat1.jpg").await.unwrap_err().is_not_found());
        assert!(store.remove_object("bucket", "cat1.jpg").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn missing_bucket_is_not_found() {
        let store = InMemoryObjectStore::new();
        let err = store
            .put_object("nope", "k", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.list_objects("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn make_bucket_twice_reports_already_exists() {
        let store = store_with_bucket().await;
        assert!(store.make_bucket("bucket").await.unwrap_err().is_already_exists());
    }

    #[tokio::test]
    async fn remove_bucket_requires_empty() {
        let store = store_with_bucket().await;
        store
            .put_object("bucket", "a", Bytes::from_static(b"a"))
            .await
            .unwrap();
        assert!(matches!(
            store.remove_bucket("bucket").await,
            Err(Error::Store(_))
        ));

        store.remove_object("bucket", "a").await.unwrap();
        store.remove_bucket("bucket").await.unwrap();
        assert!(!store.bucket_exists("bucket").await.unwrap());
    }

    #[tokio::test]
    async fn listing_reports_backdated_time() {
        let store = store_with_bucket().await;
        let then = Utc::now() - Duration::minutes(6);
        store
            .put_object_modified_at("bucket", "old.jpg", Bytes::from_static(b"old"), then)
            .await
            .unwrap();

        let listed = store.list_objects("bucket").await.unwrap();
        assert_eq!(
            listed,
            vec![ObjectInfo {
                key: "old.jpg".into(),
                size: 3,
                last_modified: then,
            }]
        );
    }
}
