//! S3-compatible object store (MinIO, GCS interoperability, AWS)

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{http::HttpResponse, Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    types::{BucketLocationConstraint, CreateBucketConfiguration},
    Client,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{ObjectInfo, ObjectStore};
use crate::{Error, Result};

/// Connection settings for [`S3ObjectStore`]
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Endpoint URL or bare `host:port` (plain HTTP); `None` for AWS itself
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl S3Config {
    pub fn new(
        endpoint: Option<String>,
        region: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint,
            region: region.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }
}

pub struct S3ObjectStore {
    client: Client,
    region: String,
}

impl S3ObjectStore {
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "sift-static",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .behavior_version_latest();

        if let Some(endpoint) = config.endpoint {
            let endpoint = if endpoint.contains("://") {
                endpoint
            } else {
                format!("http://{}", endpoint)
            };
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            region: config.region,
        }
    }
}

fn map_sdk_error<E>(what: &str, err: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    match (err.code(), status) {
        (Some("NoSuchKey" | "NoSuchBucket" | "NotFound"), _) | (_, Some(404)) => {
            Error::NotFound(what.to_string())
        }
        (Some("BucketAlreadyOwnedByYou" | "BucketAlreadyExists"), _) => {
            Error::AlreadyExists(what.to_string())
        }
        _ => Error::Store(format!("{}: {}", what, DisplayErrorContext(&err))),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => match map_sdk_error(&format!("bucket {}", bucket), e) {
                Error::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        // us-east-1 is the implicit default and must not be sent as a constraint
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|e| map_sdk_error(&format!("bucket {}", bucket), e))?;
        Ok(())
    }

    async fn remove_bucket(&self, bucket: &str) -> Result<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| map_sdk_error(&format!("bucket {}", bucket), e))?;
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<u64> {
        let what = format!("object {}/{}", bucket, key);
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(data.len() as i64)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error(&what, e))?;

        let head = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(&what, e))?;

        let size = head.content_length().unwrap_or_default().max(0) as u64;
        debug!(bucket, key, size, "Stored object");
        Ok(size)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let what = format!("object {}/{}", bucket, key);
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(&what, e))?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| Error::Store(format!("{}: {}", what, e)))?;
        Ok(body.into_bytes())
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(&format!("object {}/{}", bucket, key), e))?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| map_sdk_error(&format!("bucket {}", bucket), e))?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                let last_modified = object
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
                    .unwrap_or_else(Utc::now);
                objects.push(ObjectInfo {
                    key: key.to_string(),
                    size: object.size().unwrap_or_default().max(0) as u64,
                    last_modified,
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_without_network_access() {
        let store = S3ObjectStore::new(S3Config::new(
            Some("minio:9000".into()),
            "us-east-1",
            "key",
            "secret",
        ));
        assert_eq!(store.region, "us-east-1");
        assert_eq!(
            store.client.config().region().map(|r| r.as_ref()),
            Some("us-east-1")
        );
    }
}
