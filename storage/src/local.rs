use camino::{Utf8Path, Utf8PathBuf};
use eyre::WrapErr;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

const ENGINE: &str = "local";

/// Wrap an I/O failure with context, keeping its classification.
fn local_error(context: &'static str) -> impl FnOnce(std::io::Error) -> StorageError {
    move |error| {
        let kind = StorageErrorKind::from(error.kind());
        StorageError::new(ENGINE, kind, eyre::Report::new(error).wrap_err(context))
    }
}

/// Storage driver which keeps each bucket as a directory under `root`.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at `root`. Buckets are created on demand by
    /// [`Driver::create_bucket`].
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn bucket_path(&self, bucket: &str) -> Utf8PathBuf {
        self.root.join(bucket)
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Utf8PathBuf {
        self.bucket_path(bucket).join(remote)
    }

    async fn require_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        if self.bucket_exists(bucket).await? {
            Ok(())
        } else {
            Err(StorageError::builder(
                ENGINE,
                StorageErrorKind::NotFound,
                format!("no bucket named {bucket}"),
            )
            .bucket(bucket)
            .build())
        }
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        tokio::fs::try_exists(self.bucket_path(bucket))
            .await
            .map_err(local_error("check bucket directory"))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        if bucket.is_empty() {
            return Err(StorageError::new(
                ENGINE,
                StorageErrorKind::InvalidRequest,
                "bucket name is empty",
            ));
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(local_error("create storage root"))?;
        tokio::fs::create_dir(self.bucket_path(bucket))
            .await
            .map_err(local_error("create bucket directory"))
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let path = self.path(bucket, remote);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|error| {
                StorageError::builder(ENGINE, error.kind().into(), error)
                    .bucket(bucket)
                    .path(remote.as_str())
                    .build()
            })?;

        // Not every filesystem records a birth time.
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map_err(local_error("read object timestamps"))?;

        Ok(Metadata {
            size: metadata.len(),
            created: created.into(),
        })
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        tokio::fs::remove_file(self.path(bucket, remote))
            .await
            .map_err(local_error("remove object"))
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        self.require_bucket(bucket).await?;
        let path = self.path(bucket, remote);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(local_error("create object directory"))?;
        }

        let mut writer = tokio::io::BufWriter::new(
            tokio::fs::File::create(&path)
                .await
                .map_err(local_error("open object for writing"))?,
        );

        tokio::io::copy_buf(reader, &mut writer)
            .await
            .map_err(local_error("write object"))?;

        writer
            .shutdown()
            .await
            .map_err(local_error("flush object"))?;
        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let mut reader = tokio::io::BufReader::new(
            tokio::fs::File::open(self.path(bucket, remote))
                .await
                .map_err(local_error("open object for reading"))?,
        );

        tokio::io::copy_buf(&mut reader, writer)
            .await
            .map_err(local_error("read object"))?;

        writer.flush().await.map_err(local_error("flush writer"))?;
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.require_bucket(bucket).await?;
        let root = self.bucket_path(bucket);

        let items = tokio::task::spawn_blocking(move || collect_list(&root))
            .in_current_span()
            .await
            .map_err(|error| StorageError::new(ENGINE, StorageErrorKind::Other, error))?
            .map_err(|error| StorageError::new(ENGINE, StorageErrorKind::Io, error))?;

        tracing::debug!("Found {} entries", items.len());

        let mut items: Vec<String> = items
            .into_iter()
            .filter(|path| prefix.is_none_or(|prefix| path.starts_with(prefix)))
            .map(|path| path.to_string())
            .collect();
        items.sort();
        Ok(items)
    }
}

#[tracing::instrument]
fn collect_list(root: &Utf8Path) -> eyre::Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();
    visit(root, &mut files).wrap_err_with(|| format!("walk {root}"))?;

    Ok(files
        .into_iter()
        .filter_map(|path| path.strip_prefix(root).ok().map(|path| path.to_owned()))
        .collect())
}

fn visit(path: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> eyre::Result<()> {
    for entry in path.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            visit(entry.path(), files)?;
        } else {
            files.push(entry.path().to_owned())
        }
    }

    Ok(())
}
