//! # Storage backends
//!
//! Configuration and a shared handle over the blob storage drivers.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use tokio::io;

pub(crate) mod local;
pub(crate) mod memory;

#[doc(inline)]
pub use local::LocalDriver;

#[doc(inline)]
pub use memory::MemoryStorage;

#[doc(inline)]
pub use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

/// Which blob storage engine to use.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StorageConfig {
    /// Keep objects in memory; buckets are created at initialization.
    #[default]
    Memory,

    /// Keep each bucket as a directory under `path`.
    Local {
        /// Root directory for every bucket.
        path: Utf8PathBuf,
    },
}

impl StorageConfig {
    /// Construct the configured driver.
    #[tracing::instrument]
    pub async fn build(self) -> Result<Storage, StorageError> {
        let client: Storage = match self {
            StorageConfig::Memory => MemoryStorage::new().into(),
            StorageConfig::Local { path } => LocalDriver::new(path).into(),
        };
        Ok(client)
    }
}

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// A cloneable handle to a storage driver.
#[derive(Debug, Clone)]
pub struct Storage {
    driver: ArcDriver,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    /// Wrap a driver.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// The driver name.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// A handle scoped to a single bucket.
    pub fn bucket<S: Into<String>>(&self, bucket: S) -> StorageBucket {
        StorageBucket {
            driver: self.driver.clone(),
            bucket: bucket.into(),
        }
    }

    /// Create `bucket` unless it already exists.
    ///
    /// Returns whether the bucket was created.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<bool, StorageError> {
        if self.driver.bucket_exists(bucket).await? {
            tracing::info!(%bucket, "Bucket already exists");
            return Ok(false);
        }

        tracing::info!(%bucket, "Creating bucket");
        match self.driver.create_bucket(bucket).await {
            Ok(()) => Ok(true),
            // Lost a race with another initializer.
            Err(error) if error.kind() == StorageErrorKind::AlreadyExists => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Size and creation time of an object.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn metadata(
        &self,
        bucket: &str,
        remote: &Utf8Path,
    ) -> Result<Metadata, StorageError> {
        self.driver.metadata(bucket, remote).await
    }

    /// Copy an object into `writer`.
    #[tracing::instrument(skip(self, writer), fields(driver=self.driver.name()))]
    pub async fn download<'d, W>(
        &'d self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut W,
    ) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Downloading from: {bucket}/{remote}");
        self.driver.download(bucket, remote, writer).await
    }

    /// Write an object from `reader`, replacing any existing object.
    #[tracing::instrument(skip(self, reader), fields(driver=self.driver.name()))]
    pub async fn upload<'d, R>(
        &'d self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut R,
    ) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Uploading to: {bucket}/{remote}");
        self.driver.upload(bucket, remote, reader).await
    }

    /// Object paths, optionally under `prefix`.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.driver.list(bucket, prefix).await
    }

    /// Remove an object.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn delete(&self, bucket: &str, path: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(bucket, path).await
    }
}

/// A [`Storage`] handle bound to one bucket.
#[derive(Debug, Clone)]
pub struct StorageBucket {
    bucket: String,
    driver: ArcDriver,
}

impl StorageBucket {
    /// The bucket name.
    pub fn name(&self) -> &str {
        &self.bucket
    }

    /// The driver name.
    pub fn driver(&self) -> &'static str {
        self.driver.name()
    }

    /// Size and creation time of an object.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn metadata(&self, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.driver.metadata(&self.bucket, remote).await
    }

    /// Copy an object into `writer`.
    #[tracing::instrument(skip(self, writer), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn download<'d, W>(
        &'d self,
        remote: &Utf8Path,
        writer: &mut W,
    ) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Downloading from: {}/{remote}", self.bucket);
        self.driver.download(&self.bucket, remote, writer).await
    }

    /// Write an object from `reader`, replacing any existing object.
    #[tracing::instrument(skip(self, reader), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn upload<'d, R>(
        &'d self,
        remote: &Utf8Path,
        reader: &mut R,
    ) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Uploading to: {}/{remote}", self.bucket);
        self.driver.upload(&self.bucket, remote, reader).await
    }

    /// Object paths, optionally under `prefix`.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn list(&self, prefix: Option<&Utf8Path>) -> Result<Vec<String>, StorageError> {
        self.driver.list(&self.bucket, prefix).await
    }

    /// Remove an object.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn delete(&self, path: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(&self.bucket, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_bucket_is_idempotent() {
        let storage = StorageConfig::Memory.build().await.unwrap();
        assert!(storage.ensure_bucket("modules").await.unwrap());
        assert!(!storage.ensure_bucket("modules").await.unwrap());

        let bucket = storage.bucket("modules");
        bucket
            .upload(Utf8Path::new("a/1.0.0.zip"), &mut &b"zip"[..])
            .await
            .unwrap();
        assert_eq!(bucket.list(None).await.unwrap(), vec!["a/1.0.0.zip"]);
    }

    #[test]
    fn config_from_toml() {
        #[derive(Debug, Deserialize)]
        struct Wrapper {
            storage: StorageConfig,
        }

        let config: Wrapper = toml_edit::de::from_str("storage = \"memory\"").unwrap();
        assert_eq!(config.storage, StorageConfig::Memory);

        let config: Wrapper =
            toml_edit::de::from_str("[storage.local]\npath = \"/var/lib/registry\"").unwrap();
        assert_eq!(
            config.storage,
            StorageConfig::Local {
                path: "/var/lib/registry".into()
            }
        );
    }
}
