//! # Tables
//!
//! A small key/attribute table abstraction: items are JSON objects addressed
//! by a hash key and an optional range key, with point reads, upserts and
//! filtered scans. Drivers implement [`TableDriver`]; services hold the
//! cloneable [`Tables`] handle.

use std::sync::Arc;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod driver;
mod error;
mod local;
pub(crate) mod memory;

pub use driver::TableDriver;
pub use error::{TableError, TableErrorKind};
pub use local::LocalTables;
#[doc(inline)]
pub use memory::MemoryTables;

/// A stored item: a map of attribute names to JSON values.
pub type Item = serde_json::Map<String, Value>;

/// How a table is billed by its backing service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BillingMode {
    /// Pay for each request; no capacity planning.
    #[default]
    PayPerRequest,

    /// Fixed read and write capacity units.
    Provisioned {
        /// Read capacity units.
        read: u64,
        /// Write capacity units.
        write: u64,
    },
}

/// Table name, primary key layout and billing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// The partition attribute.
    pub hash_key: String,
    /// The sort attribute, if the table has a composite key.
    pub range_key: Option<String>,
    /// Billing mode.
    #[serde(default)]
    pub billing: BillingMode,
}

impl TableSchema {
    /// A pay-per-request table keyed by `hash_key` alone.
    pub fn new(name: impl Into<String>, hash_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash_key: hash_key.into(),
            range_key: None,
            billing: BillingMode::PayPerRequest,
        }
    }

    /// Add a range key, making the primary key composite.
    pub fn with_range_key(mut self, range_key: impl Into<String>) -> Self {
        self.range_key = Some(range_key.into());
        self
    }

    /// Whether `attribute` is part of the primary key.
    pub fn is_key_attribute(&self, attribute: &str) -> bool {
        self.hash_key == attribute || self.range_key.as_deref() == Some(attribute)
    }
}

/// A primary key: attribute names paired with string values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    attributes: Vec<(String, String)>,
}

impl Key {
    /// A key with a single attribute.
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attributes: vec![(attribute.into(), value.into())],
        }
    }

    /// Add another key attribute.
    pub fn and(mut self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((attribute.into(), value.into()));
        self
    }

    /// The value of a key attribute.
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == attribute)
            .map(|(_, value)| value.as_str())
    }

    /// Iterate over `(attribute, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

/// A filter applied to each item during a scan.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The attribute equals the value.
    Equals(String, Value),
    /// The attribute is present.
    Exists(String),
}

impl Condition {
    fn matches(&self, item: &Item) -> bool {
        match self {
            Condition::Equals(attribute, value) => item.get(attribute) == Some(value),
            Condition::Exists(attribute) => item.contains_key(attribute),
        }
    }
}

/// A scan request: conditions which must all hold, plus an optional projection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scan {
    conditions: Vec<Condition>,
    projection: Option<Vec<String>>,
}

impl Scan {
    /// Match every item.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `attribute == value`.
    pub fn equals(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Equals(attribute.into(), value.into()));
        self
    }

    /// Require that `attribute` is present.
    pub fn exists(mut self, attribute: impl Into<String>) -> Self {
        self.conditions.push(Condition::Exists(attribute.into()));
        self
    }

    /// Return only these attributes from each matching item.
    pub fn project<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    /// The filter conditions.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Whether `item` satisfies every condition.
    pub fn matches(&self, item: &Item) -> bool {
        self.conditions.iter().all(|condition| condition.matches(item))
    }

    /// Apply the projection to a matching item.
    pub fn project_item(&self, item: &Item) -> Item {
        match &self.projection {
            None => item.clone(),
            Some(attributes) => attributes
                .iter()
                .filter_map(|name| item.get(name).map(|value| (name.clone(), value.clone())))
                .collect(),
        }
    }
}

/// Which table engine to use.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TablesConfig {
    /// Keep every table in memory.
    #[default]
    Memory,

    /// Keep each table as a JSON file under `path`.
    Local {
        /// Directory for the table files.
        path: Utf8PathBuf,
    },
}

impl TablesConfig {
    /// Construct the configured driver.
    pub fn build(self) -> Tables {
        match self {
            TablesConfig::Memory => MemoryTables::new().into(),
            TablesConfig::Local { path } => LocalTables::new(path).into(),
        }
    }
}

/// A cloneable handle to a table driver.
#[derive(Debug, Clone)]
pub struct Tables {
    driver: Arc<dyn TableDriver + Send + Sync>,
}

impl<D> From<D> for Tables
where
    D: TableDriver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Tables::new(value)
    }
}

impl Tables {
    /// Wrap a driver.
    pub fn new<D: TableDriver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// The driver name.
    pub fn name(&self) -> &'static str {
        self.driver.name()
    }

    /// Create the table described by `schema` unless it already exists.
    ///
    /// Returns whether the table was created.
    #[tracing::instrument(skip(self, schema), fields(driver=self.driver.name(), table=%schema.name))]
    pub async fn ensure_table(&self, schema: &TableSchema) -> Result<bool, TableError> {
        match self.driver.describe_table(&schema.name).await {
            Ok(existing) => {
                if existing.hash_key != schema.hash_key || existing.range_key != schema.range_key {
                    tracing::warn!(
                        expected = ?schema,
                        found = ?existing,
                        "Table exists with a different key layout"
                    );
                }
                tracing::info!("Table already exists");
                return Ok(false);
            }
            Err(error) if error.kind() == TableErrorKind::TableNotFound => {}
            Err(error) => return Err(error),
        }

        tracing::info!("Creating table");
        match self.driver.create_table(schema).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == TableErrorKind::AlreadyExists => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Describe an existing table.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn describe_table(&self, table: &str) -> Result<TableSchema, TableError> {
        self.driver.describe_table(table).await
    }

    /// Point read by full primary key.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, TableError> {
        self.driver.get_item(table, key).await
    }

    /// Write a whole item, replacing any item with the same key.
    #[tracing::instrument(skip(self, item), fields(driver=self.driver.name()))]
    pub async fn put_item(&self, table: &str, item: Item) -> Result<(), TableError> {
        self.driver.put_item(table, item).await
    }

    /// Set attributes on the item at `key`, creating it when absent.
    #[tracing::instrument(skip(self, updates), fields(driver=self.driver.name()))]
    pub async fn update_item(
        &self,
        table: &str,
        key: &Key,
        updates: Item,
    ) -> Result<(), TableError> {
        self.driver.update_item(table, key, updates).await
    }

    /// Remove the item at `key`; a missing item is not an error.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn delete_item(&self, table: &str, key: &Key) -> Result<(), TableError> {
        self.driver.delete_item(table, key).await
    }

    /// Every item matching `scan`, with its projection applied.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn scan(&self, table: &str, scan: &Scan) -> Result<Vec<Item>, TableError> {
        let items = self.driver.scan(table, scan).await?;
        tracing::trace!(count = items.len(), "Scanned items");
        Ok(items)
    }
}
