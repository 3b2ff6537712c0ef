//! Read-only access to the published forecast archive.
//!
//! NOAA mirrors HRRR to a public S3 bucket that needs no credentials, so the
//! default client talks plain HTTPS to the bucket's virtual-hosted endpoint.
//! Credentials switch to the S3 client (for private mirrors and MinIO), and
//! tests seed an in-memory store.

use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    aws::AmazonS3Builder, http::HttpBuilder, memory::InMemory, path::Path, ObjectStore,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use crate::error::{Result, StorageError};

/// Public bucket holding the HRRR archive.
pub const DEFAULT_BUCKET: &str = "noaa-hrrr-bdp-pds";

/// Connection settings for the remote archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSourceConfig {
    pub bucket: String,
    /// Base URL. Defaults to `https://{bucket}.s3.amazonaws.com` for anonymous access.
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Allow plain HTTP endpoints (local MinIO)
    pub allow_http: bool,
}

impl Default for RemoteSourceConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            endpoint: None,
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            allow_http: false,
        }
    }
}

impl RemoteSourceConfig {
    fn base_url(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}.s3.amazonaws.com", self.bucket))
    }

    fn has_credentials(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }
}

/// Object access for GRIB2 files and their `.idx` inventories.
#[derive(Clone)]
pub struct RemoteSource {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl std::fmt::Debug for RemoteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSource")
            .field("bucket", &self.bucket)
            .field("store", &self.store.to_string())
            .finish()
    }
}

impl RemoteSource {
    /// Create a client from config.
    pub fn new(config: &RemoteSourceConfig) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = if config.has_credentials() {
            let mut builder = AmazonS3Builder::new()
                .with_bucket_name(&config.bucket)
                .with_region(&config.region)
                .with_allow_http(config.allow_http);
            if let Some(endpoint) = &config.endpoint {
                builder = builder.with_endpoint(endpoint);
            }
            if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
                builder = builder
                    .with_access_key_id(key)
                    .with_secret_access_key(secret);
            }
            let store = builder
                .build()
                .map_err(|e| StorageError::Config(format!("S3 client: {}", e)))?;
            Arc::new(store)
        } else {
            let store = HttpBuilder::new()
                .with_url(config.base_url())
                .build()
                .map_err(|e| StorageError::Config(format!("HTTP client: {}", e)))?;
            Arc::new(store)
        };

        Ok(Self {
            store,
            bucket: config.bucket.clone(),
        })
    }

    /// Wrap an existing store.
    pub fn from_store(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Empty in-memory archive, seeded with [`RemoteSource::put`].
    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(InMemory::new()), "memory")
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Write an object. The public archive is read-only; this exists to seed
    /// in-memory and local mirrors.
    #[instrument(skip(self, data), fields(bucket = %self.bucket, path = %path))]
    pub async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let location = Path::from(path);
        debug!(size = data.len(), "Writing object");

        self.store
            .put(&location, data.into())
            .await
            .map_err(|e| StorageError::object_store(path, e))?;

        Ok(())
    }

    /// Read a whole object.
    #[instrument(skip(self), fields(bucket = %self.bucket, path = %path))]
    pub async fn get(&self, path: &str) -> Result<Bytes> {
        let location = Path::from(path);

        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| StorageError::object_store(path, e))?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| StorageError::object_store(path, e))?;

        debug!(size = bytes.len(), "Read object");
        Ok(bytes)
    }

    /// Read a byte range `[start, end)` of an object.
    #[instrument(skip(self), fields(bucket = %self.bucket, path = %path))]
    pub async fn get_range(&self, path: &str, range: Range<usize>) -> Result<Bytes> {
        let location = Path::from(path);

        let bytes = self
            .store
            .get_range(&location, range)
            .await
            .map_err(|e| StorageError::object_store(path, e))?;

        Ok(bytes)
    }

    /// Object size in bytes, or `None` if it does not exist.
    pub async fn head(&self, path: &str) -> Result<Option<u64>> {
        let location = Path::from(path);

        match self.store.head(&location).await {
            Ok(meta) => Ok(Some(meta.size as u64)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(StorageError::object_store(path, e)),
        }
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.head(path).await?.is_some())
    }

    /// Stream an object into `writer` chunk by chunk, returning the byte count.
    #[instrument(skip(self, writer), fields(bucket = %self.bucket, path = %path))]
    pub async fn get_to_writer<W>(&self, path: &str, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let location = Path::from(path);

        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| StorageError::object_store(path, e))?;

        let mut stream = result.into_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream
            .try_next()
            .await
            .map_err(|e| StorageError::object_store(path, e))?
        {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;

        debug!(size = written, "Downloaded object");
        Ok(written)
    }
}
