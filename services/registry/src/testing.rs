//! Store wrappers that fail on demand.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use camino::Utf8Path;
use storage::{Driver, MemoryStorage, Metadata, Reader, StorageError, StorageErrorKind, Writer};
use tables::{
    Item, Key, MemoryTables, Scan, TableDriver, TableError, TableErrorKind, TableSchema,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TableOp {
    Describe,
    Create,
    Get,
    Put,
    Update,
    Delete,
    Scan,
}

const TABLE_OPS: [TableOp; 7] = [
    TableOp::Describe,
    TableOp::Create,
    TableOp::Get,
    TableOp::Put,
    TableOp::Update,
    TableOp::Delete,
    TableOp::Scan,
];

#[derive(Debug, Default)]
struct FaultyTablesInner {
    tables: MemoryTables,
    failing: Mutex<HashSet<TableOp>>,
}

/// In-memory tables whose operations can be made to fail.
#[derive(Debug, Clone, Default)]
pub(crate) struct FaultyTables {
    inner: Arc<FaultyTablesInner>,
}

impl FaultyTables {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail(&self, op: TableOp) {
        self.inner.failing.lock().unwrap().insert(op);
    }

    pub(crate) fn fail_all(&self) {
        self.inner.failing.lock().unwrap().extend(TABLE_OPS);
    }

    pub(crate) fn fail_none(&self) {
        self.inner.failing.lock().unwrap().clear();
    }

    fn check(&self, op: TableOp) -> Result<(), TableError> {
        if self.inner.failing.lock().unwrap().contains(&op) {
            Err(TableError::new(
                "faulty",
                TableErrorKind::Unavailable,
                format!("{op:?} is switched off"),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl TableDriver for FaultyTables {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn describe_table(&self, table: &str) -> Result<TableSchema, TableError> {
        self.check(TableOp::Describe)?;
        self.inner.tables.describe_table(table).await
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<(), TableError> {
        self.check(TableOp::Create)?;
        self.inner.tables.create_table(schema).await
    }

    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, TableError> {
        self.check(TableOp::Get)?;
        self.inner.tables.get_item(table, key).await
    }

    async fn put_item(&self, table: &str, item: Item) -> Result<(), TableError> {
        self.check(TableOp::Put)?;
        self.inner.tables.put_item(table, item).await
    }

    async fn update_item(&self, table: &str, key: &Key, updates: Item) -> Result<(), TableError> {
        self.check(TableOp::Update)?;
        self.inner.tables.update_item(table, key, updates).await
    }

    async fn delete_item(&self, table: &str, key: &Key) -> Result<(), TableError> {
        self.check(TableOp::Delete)?;
        self.inner.tables.delete_item(table, key).await
    }

    async fn scan(&self, table: &str, scan: &Scan) -> Result<Vec<Item>, TableError> {
        self.check(TableOp::Scan)?;
        self.inner.tables.scan(table, scan).await
    }
}

#[derive(Debug, Default)]
struct FaultyStorageInner {
    storage: MemoryStorage,
    fail_writes: AtomicBool,
    fail_buckets: AtomicBool,
    size_skew: AtomicI64,
}

/// In-memory blob storage which can fail writes or misreport object sizes.
#[derive(Debug, Clone, Default)]
pub(crate) struct FaultyStorage {
    inner: Arc<FaultyStorageInner>,
}

impl FaultyStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_writes(&self) {
        self.inner.fail_writes.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_buckets(&self) {
        self.inner.fail_buckets.store(true, Ordering::SeqCst);
    }

    /// Report object sizes off by `skew` bytes.
    pub(crate) fn skew_sizes(&self, skew: i64) {
        self.inner.size_skew.store(skew, Ordering::SeqCst);
    }

    fn unavailable(&self) -> StorageError {
        StorageError::new(
            "faulty",
            StorageErrorKind::ServiceUnavailable,
            "switched off",
        )
    }
}

#[async_trait::async_trait]
impl Driver for FaultyStorage {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        if self.inner.fail_buckets.load(Ordering::SeqCst) {
            return Err(self.unavailable());
        }
        self.inner.storage.bucket_exists(bucket).await
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        if self.inner.fail_buckets.load(Ordering::SeqCst) {
            return Err(self.unavailable());
        }
        self.inner.storage.create_bucket(bucket).await
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        self.inner.storage.delete(bucket, remote).await
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let mut metadata = self.inner.storage.metadata(bucket, remote).await?;
        let skew = self.inner.size_skew.load(Ordering::SeqCst);
        metadata.size = metadata.size.saturating_add_signed(skew);
        Ok(metadata)
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(self.unavailable());
        }
        self.inner.storage.upload(bucket, remote, reader).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        self.inner.storage.download(bucket, remote, writer).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.inner.storage.list(bucket, prefix).await
    }
}
