//! Chunked transfer of module archives and provider artifacts.
//!
//! Uploads accumulate every chunk and then write the object once. Downloads
//! read the whole object, check its length against the store's metadata,
//! then stream it back in fixed-size chunks.

use bytes::{Bytes, BytesMut};
use camino::Utf8PathBuf;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use storage::{Storage, StorageBucket};

use crate::error::{RegistryError, RegistryResult};
use crate::messages::{
    ArtifactKind, DataChunk, ProviderArtifact, UploadAck, UploadProviderArtifactRequest,
    UploadSourceZipRequest, VersionedModule, split_address,
};
use crate::rows::{ensure_bucket, failed};
use crate::rpc::{ProviderStorage, RequestStream, ResponseStream, SourceStorage, server_stream};

/// Default size of each streamed download chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Object key of a module archive: `<name>/<version>.zip`.
pub fn source_zip_path(module: &VersionedModule) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{}/{}.zip", module.name, module.version))
}

/// Object key of a provider artifact under `<name>/<version>/`.
pub fn artifact_path(artifact: &ProviderArtifact) -> RegistryResult<Utf8PathBuf> {
    let provider = &artifact.provider;
    let [_, kind] = split_address::<2>("provider", &provider.name)?;
    let stem = format!("terraform-provider-{kind}_{}", provider.version);
    let file = match &artifact.kind {
        ArtifactKind::Binary { os, arch } => format!("{stem}_{os}_{arch}.zip"),
        ArtifactKind::Shasums => format!("{stem}_SHA256SUMS"),
        ArtifactKind::ShasumsSignature => format!("{stem}_SHA256SUMS.sig"),
    };
    Ok(Utf8PathBuf::from(format!(
        "{}/{}/{file}",
        provider.name, provider.version
    )))
}

/// Drain an upload stream, taking the target from the first chunk.
async fn receive_upload<T, K>(
    mut chunks: RequestStream<T>,
    what: &'static str,
    split: impl Fn(T) -> (Option<K>, Bytes),
) -> RegistryResult<(K, Bytes)> {
    let mut target = None;
    let mut buffer = BytesMut::new();
    let mut first = true;

    while let Some(chunk) = chunks.next().await {
        let (identity, data) = split(chunk.map_err(failed(RegistryError::Receive(what)))?);
        if first {
            target = identity;
            first = false;
        }
        buffer.extend_from_slice(&data);
    }

    let target = target.ok_or_else(|| {
        RegistryError::InvalidArgument(format!("{what} upload must name its target in the first chunk"))
    })?;
    Ok((target, buffer.freeze()))
}

/// Write `data` as one object and acknowledge it.
async fn store(
    bucket: &StorageBucket,
    path: &Utf8PathBuf,
    data: Bytes,
    what: &'static str,
) -> RegistryResult<UploadAck> {
    let size = data.len() as u64;
    let sha256 = hex::encode(Sha256::digest(&data));

    bucket
        .upload(path, &mut data.as_ref())
        .await
        .map_err(failed(RegistryError::Put(what)))?;

    tracing::info!(%path, size, %sha256, "Stored {what}");
    Ok(UploadAck {
        message: format!("{what} uploaded."),
        size,
        sha256,
    })
}

/// Read a whole object, verifying its length against the store's metadata.
async fn fetch(bucket: &StorageBucket, path: &Utf8PathBuf, what: &'static str) -> RegistryResult<Bytes> {
    let metadata = bucket.metadata(path).await.map_err(|error| {
        if error.is_not_found() {
            RegistryError::NotFound(format!("{what} {path}"))
        } else {
            failed(RegistryError::Get(what))(error)
        }
    })?;

    let mut data = Vec::new();
    bucket.download(path, &mut data).await.map_err(|error| {
        if error.is_not_found() {
            RegistryError::NotFound(format!("{what} {path}"))
        } else {
            failed(RegistryError::Get(what))(error)
        }
    })?;

    let actual = data.len() as u64;
    if actual != metadata.size {
        tracing::error!(%path, expected = metadata.size, actual, "Content length mismatch");
        return Err(RegistryError::ContentLength {
            expected: metadata.size,
            actual,
        });
    }
    Ok(data.into())
}

/// Stream `data` in order as chunks of at most `chunk_size` bytes.
fn chunked(data: Bytes, chunk_size: usize, what: &'static str) -> ResponseStream<DataChunk> {
    let chunk_size = chunk_size.max(1);
    server_stream(move |sender| async move {
        let mut offset = 0;
        while offset < data.len() {
            let end = usize::min(offset + chunk_size, data.len());
            sender
                .send(DataChunk {
                    data: data.slice(offset..end),
                })
                .await
                .map_err(failed(RegistryError::Send(what)))?;
            offset = end;
        }
        Ok::<_, RegistryError>(())
    })
}

/// Stores module archives in a bucket.
#[derive(Debug, Clone)]
pub struct SourceStorageService {
    storage: Storage,
    bucket: StorageBucket,
    chunk_size: usize,
}

impl SourceStorageService {
    /// Keep archives in `bucket`, streaming downloads in `chunk_size` pieces.
    pub fn new(storage: Storage, bucket: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            bucket: storage.bucket(bucket),
            storage,
            chunk_size,
        }
    }

    /// Create the archive bucket unless it exists.
    pub async fn initialize(&self) -> RegistryResult<()> {
        ensure_bucket(&self.storage, self.bucket.name()).await
    }
}

#[async_trait::async_trait]
impl SourceStorage for SourceStorageService {
    #[tracing::instrument(skip(self, chunks), fields(name, version))]
    async fn upload_source_zip(
        &self,
        chunks: RequestStream<UploadSourceZipRequest>,
    ) -> RegistryResult<UploadAck> {
        let (module, data) = receive_upload(chunks, "source zip", |chunk| {
            (chunk.module, chunk.zip_data_chunk)
        })
        .await?;

        let span = tracing::Span::current();
        span.record("name", module.name.as_str());
        span.record("version", module.version.as_str());
        store(&self.bucket, &source_zip_path(&module), data, "source zip").await
    }

    #[tracing::instrument(skip(self, module), fields(name = %module.name, version = %module.version))]
    async fn download_source_zip(
        &self,
        module: VersionedModule,
    ) -> RegistryResult<ResponseStream<DataChunk>> {
        let data = fetch(&self.bucket, &source_zip_path(&module), "source zip").await?;
        Ok(chunked(data, self.chunk_size, "source zip"))
    }
}

/// Stores provider binaries and checksum files in a bucket.
#[derive(Debug, Clone)]
pub struct ProviderStorageService {
    storage: Storage,
    bucket: StorageBucket,
    chunk_size: usize,
}

impl ProviderStorageService {
    /// Keep artifacts in `bucket`, streaming downloads in `chunk_size` pieces.
    pub fn new(storage: Storage, bucket: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            bucket: storage.bucket(bucket),
            storage,
            chunk_size,
        }
    }

    /// Create the artifact bucket unless it exists.
    pub async fn initialize(&self) -> RegistryResult<()> {
        ensure_bucket(&self.storage, self.bucket.name()).await
    }
}

#[async_trait::async_trait]
impl ProviderStorage for ProviderStorageService {
    #[tracing::instrument(skip(self, chunks))]
    async fn upload_artifact(
        &self,
        chunks: RequestStream<UploadProviderArtifactRequest>,
    ) -> RegistryResult<UploadAck> {
        let (artifact, data) = receive_upload(chunks, "provider artifact", |chunk| {
            (chunk.artifact, chunk.data_chunk)
        })
        .await?;

        let path = artifact_path(&artifact)?;
        store(&self.bucket, &path, data, "provider artifact").await
    }

    #[tracing::instrument(skip(self, artifact), fields(name = %artifact.provider.name, version = %artifact.provider.version))]
    async fn download_artifact(
        &self,
        artifact: ProviderArtifact,
    ) -> RegistryResult<ResponseStream<DataChunk>> {
        let path = artifact_path(&artifact)?;
        let data = fetch(&self.bucket, &path, "provider artifact").await?;
        Ok(chunked(data, self.chunk_size, "provider artifact"))
    }
}
