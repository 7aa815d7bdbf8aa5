//! Object storage seam for partition files.

use crate::config::StorageConfig;
use crate::error::SinkError;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;

/// Destination for encoded partition files.
///
/// `put_object` must be idempotent: writing the same path twice leaves one
/// object holding the last payload.
#[async_trait]
pub trait PartitionStore: Send + Sync {
    /// Write `data` to `path`, relative to the dataset root.
    async fn put_object(&self, path: &str, data: Bytes) -> std::result::Result<(), SinkError>;

    /// Human-readable dataset root, for logs.
    fn root(&self) -> String;
}

/// [`PartitionStore`] backed by an `object_store` implementation.
pub struct ObjectStoreSink {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    root: String,
}

impl ObjectStoreSink {
    /// Wrap an existing store; objects are written under `prefix`.
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self {
            root: format!("{}/{}", store, prefix),
            store,
            prefix,
        }
    }

    /// In-memory store, for tests and dry runs.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "")
    }

    /// Create the store named by `storage.root_path`.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let root_path = config.root_path.trim_end_matches('/');

        if let Some(location) = root_path.strip_prefix("s3://") {
            let (bucket, prefix) = location.split_once('/').unwrap_or((location, ""));
            if bucket.is_empty() {
                return Err(Error::Config(format!("Invalid S3 root path: {}", root_path)));
            }
            let store = Self::create_s3_store(config, bucket)?;
            let mut sink = Self::new(store, prefix);
            sink.root = config.root_path.clone();
            Ok(sink)
        } else {
            let store = Self::create_local_store(root_path)?;
            let mut sink = Self::new(store, "");
            sink.root = root_path.to_string();
            Ok(sink)
        }
    }

    fn create_s3_store(config: &StorageConfig, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        use object_store::aws::AmazonS3Builder;

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

        if let Some(ref region) = config.aws_region {
            builder = builder.with_region(region);
        }

        if let Some(ref access_key) = config.aws_access_key_id {
            builder = builder.with_access_key_id(access_key);
        }

        if let Some(ref secret_key) = config.aws_secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }

        if let Some(ref endpoint) = config.s3_endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to create S3 store: {}", e)))?;

        Ok(Arc::new(store))
    }

    fn create_local_store(root_path: &str) -> Result<Arc<dyn ObjectStore>> {
        use object_store::local::LocalFileSystem;

        let path = std::path::Path::new(root_path);

        if !path.exists() {
            std::fs::create_dir_all(path)?;
        }

        let store = LocalFileSystem::new_with_prefix(path).map_err(|e| {
            Error::Config(format!("Failed to create local file system store: {}", e))
        })?;

        Ok(Arc::new(store))
    }

    /// Underlying object store.
    pub fn inner(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Full object path for a dataset-relative path.
    pub fn object_path(&self, path: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(path)
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix, path))
        }
    }
}

#[async_trait]
impl PartitionStore for ObjectStoreSink {
    async fn put_object(&self, path: &str, data: Bytes) -> std::result::Result<(), SinkError> {
        let object_path = self.object_path(path);
        self.store
            .put(&object_path, PutPayload::from_bytes(data))
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }

    fn root(&self) -> String {
        self.root.clone()
    }
}

/// Classify an object store error for the write retry policy.
pub fn classify(err: &object_store::Error) -> SinkError {
    use object_store::Error as StoreError;

    let message = err.to_string();
    match err {
        StoreError::PermissionDenied { .. }
        | StoreError::Unauthenticated { .. }
        | StoreError::InvalidPath { .. }
        | StoreError::NotFound { .. }
        | StoreError::NotSupported { .. }
        | StoreError::NotImplemented
        | StoreError::UnknownConfigurationKey { .. }
        | StoreError::AlreadyExists { .. }
        | StoreError::Precondition { .. } => SinkError::Permanent(message),
        StoreError::Generic { .. } if is_denied(&message) => SinkError::Permanent(message),
        _ => SinkError::Transient(message),
    }
}

fn is_denied(message: &str) -> bool {
    ["AccessDenied", "403 Forbidden", "InvalidAccessKeyId", "NoSuchBucket"]
        .iter()
        .any(|marker| message.contains(marker))
}
