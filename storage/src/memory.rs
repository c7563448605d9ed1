use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::{io::AsyncWriteExt, sync::RwLock};

use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

const ENGINE: &str = "memory";

fn missing_bucket(bucket: &str) -> StorageError {
    StorageError::builder(
        ENGINE,
        StorageErrorKind::NotFound,
        format!("no bucket named {bucket}"),
    )
    .bucket(bucket)
    .build()
}

fn missing_object(bucket: &str, remote: &Utf8Path) -> StorageError {
    StorageError::builder(
        ENGINE,
        StorageErrorKind::NotFound,
        format!("no object at {remote}"),
    )
    .bucket(bucket)
    .path(remote.as_str())
    .build()
}

#[derive(Debug)]
struct MemoryObject {
    created: DateTime<Utc>,
    data: Vec<u8>,
}

impl From<Vec<u8>> for MemoryObject {
    fn from(data: Vec<u8>) -> Self {
        Self {
            created: Utc::now(),
            data,
        }
    }
}

impl From<&MemoryObject> for Metadata {
    fn from(value: &MemoryObject) -> Self {
        Self {
            created: value.created,
            size: value.data.len() as u64,
        }
    }
}

type Bucket = HashMap<Utf8PathBuf, MemoryObject>;

/// Storage driver that keeps every object in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryStorage {
    /// Create a store with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given (empty) buckets.
    pub fn with_buckets(buckets: &[&str]) -> Self {
        let map = buckets
            .iter()
            .map(|bucket| (bucket.to_string(), Bucket::new()))
            .collect();

        Self {
            buckets: RwLock::new(map),
        }
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        Ok(self.buckets.read().await.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        if bucket.is_empty() {
            return Err(StorageError::new(
                ENGINE,
                StorageErrorKind::InvalidRequest,
                "bucket name is empty",
            ));
        }

        let mut buckets = self.buckets.write().await;
        if buckets.contains_key(bucket) {
            return Err(StorageError::builder(
                ENGINE,
                StorageErrorKind::AlreadyExists,
                format!("bucket {bucket} already exists"),
            )
            .bucket(bucket)
            .build());
        }
        buckets.insert(bucket.to_owned(), Bucket::new());
        Ok(())
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let buckets = self.buckets.read().await;
        let objects = buckets.get(bucket).ok_or_else(|| missing_bucket(bucket))?;
        objects
            .get(remote)
            .map(Metadata::from)
            .ok_or_else(|| missing_object(bucket, remote))
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| missing_bucket(bucket))?;
        objects.remove(remote);
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        if !self.bucket_exists(bucket).await? {
            return Err(missing_bucket(bucket));
        }

        let mut buf = Vec::new();
        tokio::io::copy_buf(reader, &mut buf)
            .await
            .map_err(|error| StorageError::io(ENGINE, error))?;

        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| missing_bucket(bucket))?;
        objects.insert(remote.to_owned(), buf.into());
        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let buckets = self.buckets.read().await;
        let objects = buckets.get(bucket).ok_or_else(|| missing_bucket(bucket))?;
        let object = objects
            .get(remote)
            .ok_or_else(|| missing_object(bucket, remote))?;

        writer
            .write_all(&object.data)
            .await
            .map_err(|error| StorageError::io(ENGINE, error))?;
        writer
            .flush()
            .await
            .map_err(|error| StorageError::io(ENGINE, error))?;
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        tracing::trace!(%bucket, ?prefix, "list memory bucket");

        let buckets = self.buckets.read().await;
        let objects = buckets.get(bucket).ok_or_else(|| missing_bucket(bucket))?;

        let mut paths: Vec<String> = objects
            .keys()
            .filter(|path| prefix.is_none_or(|prefix| path.starts_with(prefix)))
            .map(|path| path.to_string())
            .collect();
        paths.sort();
        Ok(paths)
    }
}
