//! Object storage connector (S3/MinIO compatible).
//!
//! Addresses are keys inside the configured bucket. Listing paginates
//! transparently through the underlying client. Note that bucket
//! listings are eventually consistent on some stores: a key written by
//! `store` is not guaranteed to appear in an immediately following
//! `list`, and callers must not treat that lag as an error.

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use hydro_common::{DataError, DataResult};
use object_store::{aws::AmazonS3Builder, path::Path, ObjectStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use super::{BackendKind, DataBackend};
use crate::retry::{self, RetryPolicy};

/// Default payload size above which uploads switch to multipart.
pub const DEFAULT_MULTIPART_THRESHOLD: usize = 64 * 1024 * 1024;

/// Configuration for an object storage connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectBackendConfig {
    /// S3/MinIO endpoint URL
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// AWS region (use "us-east-1" for MinIO)
    pub region: String,
    /// Allow HTTP (for local MinIO)
    #[serde(default)]
    pub allow_http: bool,
    /// Payload size threshold for multipart upload
    #[serde(default = "default_threshold")]
    pub multipart_threshold: usize,
}

fn default_threshold() -> usize {
    DEFAULT_MULTIPART_THRESHOLD
}

/// Connector for one bucket on an S3-compatible store.
pub struct ObjectBackend {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    multipart_threshold: usize,
    retry: RetryPolicy,
}

impl ObjectBackend {
    /// Create a connector from config.
    pub fn new(config: &ObjectBackendConfig) -> DataResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_region(&config.region);

        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder.build().map_err(|e| {
            DataError::Internal(format!("failed to create S3 client: {}", e))
        })?;

        Ok(Self {
            store: Arc::new(store),
            bucket: config.bucket.clone(),
            multipart_threshold: config.multipart_threshold,
            retry: RetryPolicy::default(),
        })
    }

    /// Connector over an already-built store. Used by tests with an
    /// in-memory `ObjectStore`.
    pub fn from_store(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_multipart_threshold(mut self, threshold: usize) -> Self {
        self.multipart_threshold = threshold;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// True when a payload of this size goes through multipart upload.
    pub fn uses_multipart(&self, size: usize) -> bool {
        size > self.multipart_threshold
    }
}

fn map_object(address: &str, err: object_store::Error) -> DataError {
    match err {
        object_store::Error::NotFound { .. } => DataError::not_found(address),
        object_store::Error::AlreadyExists { .. } => DataError::AlreadyExists {
            address: address.to_string(),
        },
        other => {
            let message = other.to_string();
            if message.contains("403") || message.contains("AccessDenied") {
                DataError::permission(address, message)
            } else {
                DataError::transport(address, message)
            }
        }
    }
}

#[async_trait]
impl DataBackend for ObjectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    #[instrument(skip(self), fields(bucket = %self.bucket, address = %address))]
    async fn fetch(&self, address: &str) -> DataResult<Bytes> {
        let location = Path::from(address);
        let store = Arc::clone(&self.store);
        let bytes = retry::with_retry(&self.retry, "fetch", address, || {
            let store = Arc::clone(&store);
            let location = location.clone();
            async move {
                let result = store
                    .get(&location)
                    .await
                    .map_err(|e| map_object(location.as_ref(), e))?;
                result
                    .bytes()
                    .await
                    .map_err(|e| map_object(location.as_ref(), e))
            }
        })
        .await?;
        debug!(size = bytes.len(), "Read object");
        Ok(bytes)
    }

    #[instrument(skip(self, data), fields(bucket = %self.bucket, address = %address, size = data.len()))]
    async fn store(&self, address: &str, data: Bytes, overwrite: bool) -> DataResult<()> {
        let location = Path::from(address);

        // Head-based existence check; a freshly deleted key may still
        // appear for a short while on eventually consistent stores.
        if !overwrite && self.exists(address).await? {
            return Err(DataError::AlreadyExists {
                address: address.to_string(),
            });
        }

        if self.uses_multipart(data.len()) {
            // Multipart is single-attempt: the writer's part state cannot
            // be replayed, so the retry policy applies only to the
            // single-shot path below.
            debug!(threshold = self.multipart_threshold, "Multipart upload");
            let (id, mut writer) = self
                .store
                .put_multipart(&location)
                .await
                .map_err(|e| map_object(address, e))?;
            let uploaded = match writer.write_all(&data).await {
                Ok(()) => writer.shutdown().await,
                Err(e) => Err(e),
            };
            if let Err(e) = uploaded {
                // Abandon the parts already uploaded; otherwise they
                // accumulate in the bucket with no owning object.
                if let Err(abort_err) = self.store.abort_multipart(&location, &id).await {
                    warn!(error = %abort_err, "Failed to abort multipart upload");
                }
                return Err(DataError::transport(address, e.to_string()));
            }
            return Ok(());
        }

        let store = Arc::clone(&self.store);
        retry::with_retry(&self.retry, "store", address, || {
            let store = Arc::clone(&store);
            let location = location.clone();
            let data = data.clone();
            async move {
                store
                    .put(&location, data)
                    .await
                    .map(|_| ())
                    .map_err(|e| map_object(location.as_ref(), e))
            }
        })
        .await
    }

    async fn list(&self, prefix: &str) -> DataResult<Vec<String>> {
        let prefix_path = Path::from(prefix);
        let mut addresses = Vec::new();

        let mut stream = self.store.list(Some(&prefix_path));
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| map_object(prefix, e))?
        {
            addresses.push(meta.location.to_string());
        }

        Ok(addresses)
    }

    async fn exists(&self, address: &str) -> DataResult<bool> {
        let location = Path::from(address);
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(map_object(address, e)),
        }
    }

    #[instrument(skip(self), fields(bucket = %self.bucket, address = %address))]
    async fn delete(&self, address: &str) -> DataResult<()> {
        self.store
            .delete(&Path::from(address))
            .await
            .map_err(|e| map_object(address, e))
    }
}
