use std::{fmt, ops::Deref, sync::Arc};

use crate::{Item, Key, Scan, TableError, TableSchema};

/// A key/attribute table store with point reads, upserts and filtered scans.
#[async_trait::async_trait]
pub trait TableDriver: fmt::Debug {
    /// The name of the driver, used in logs and errors.
    fn name(&self) -> &'static str;

    /// Describe an existing table. Fails with `TableNotFound` if it is absent.
    async fn describe_table(&self, table: &str) -> Result<TableSchema, TableError>;

    /// Create a table. Fails with `AlreadyExists` if it is present.
    async fn create_table(&self, schema: &TableSchema) -> Result<(), TableError>;

    /// Point read by full primary key.
    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, TableError>;

    /// Write a whole item, replacing any item with the same primary key.
    async fn put_item(&self, table: &str, item: Item) -> Result<(), TableError>;

    /// Set the given attributes on the item at `key`, creating it when absent.
    async fn update_item(&self, table: &str, key: &Key, updates: Item) -> Result<(), TableError>;

    /// Remove the item at `key`. Removing a missing item succeeds.
    async fn delete_item(&self, table: &str, key: &Key) -> Result<(), TableError>;

    /// Read every item matching the scan filters, applying its projection.
    async fn scan(&self, table: &str, scan: &Scan) -> Result<Vec<Item>, TableError>;
}

#[async_trait::async_trait]
impl<D> TableDriver for Arc<D>
where
    D: TableDriver + Send + Sync + ?Sized,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    async fn describe_table(&self, table: &str) -> Result<TableSchema, TableError> {
        self.deref().describe_table(table).await
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<(), TableError> {
        self.deref().create_table(schema).await
    }

    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, TableError> {
        self.deref().get_item(table, key).await
    }

    async fn put_item(&self, table: &str, item: Item) -> Result<(), TableError> {
        self.deref().put_item(table, item).await
    }

    async fn update_item(&self, table: &str, key: &Key, updates: Item) -> Result<(), TableError> {
        self.deref().update_item(table, key, updates).await
    }

    async fn delete_item(&self, table: &str, key: &Key) -> Result<(), TableError> {
        self.deref().delete_item(table, key).await
    }

    async fn scan(&self, table: &str, scan: &Scan) -> Result<Vec<Item>, TableError> {
        self.deref().scan(table, scan).await
    }
}
