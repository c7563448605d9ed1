use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tokio::sync::RwLock;

use crate::{Item, Key, Scan, TableDriver, TableError, TableErrorKind, TableSchema};

const ENGINE: &str = "memory";

/// Primary key values in schema order: hash value, then range value.
type RowKey = (String, Option<String>);

/// One table's rows, ordered by primary key.
#[derive(Debug)]
pub(crate) struct MemoryTable {
    engine: &'static str,
    schema: TableSchema,
    rows: BTreeMap<RowKey, Item>,
}

impl MemoryTable {
    pub(crate) fn new(engine: &'static str, schema: TableSchema) -> Self {
        Self {
            engine,
            schema,
            rows: BTreeMap::new(),
        }
    }

    /// Rebuild a table from stored items, re-deriving each primary key.
    pub(crate) fn from_items(
        engine: &'static str,
        schema: TableSchema,
        items: Vec<Item>,
    ) -> Result<Self, TableError> {
        let mut table = Self::new(engine, schema);
        for item in items {
            table.put(item)?;
        }
        Ok(table)
    }

    pub(crate) fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Items in primary key order.
    pub(crate) fn items(&self) -> impl Iterator<Item = &Item> {
        self.rows.values()
    }

    fn invalid(&self, message: String) -> TableError {
        TableError::new(self.engine, TableErrorKind::InvalidRequest, message)
            .with_table(&self.schema.name)
    }

    fn key_of(&self, key: &Key) -> Result<RowKey, TableError> {
        let hash = key
            .get(&self.schema.hash_key)
            .ok_or_else(|| self.invalid(format!("key is missing {}", self.schema.hash_key)))?;
        let range = match &self.schema.range_key {
            Some(attribute) => Some(
                key.get(attribute)
                    .ok_or_else(|| self.invalid(format!("key is missing {attribute}")))?
                    .to_owned(),
            ),
            None => None,
        };
        Ok((hash.to_owned(), range))
    }

    fn attribute<'i>(&self, item: &'i Item, attribute: &str) -> Result<&'i str, TableError> {
        match item.get(attribute) {
            Some(Value::String(value)) => Ok(value),
            Some(_) => Err(self.invalid(format!("key attribute {attribute} must be a string"))),
            None => Err(self.invalid(format!("item is missing key attribute {attribute}"))),
        }
    }

    fn item_key(&self, item: &Item) -> Result<RowKey, TableError> {
        let hash = self.attribute(item, &self.schema.hash_key)?.to_owned();
        let range = match &self.schema.range_key {
            Some(attribute) => Some(self.attribute(item, attribute)?.to_owned()),
            None => None,
        };
        Ok((hash, range))
    }

    fn key_item(&self, key: &RowKey) -> Item {
        let mut item = Item::new();
        item.insert(self.schema.hash_key.clone(), Value::String(key.0.clone()));
        if let (Some(attribute), Some(value)) = (&self.schema.range_key, &key.1) {
            item.insert(attribute.clone(), Value::String(value.clone()));
        }
        item
    }

    pub(crate) fn get(&self, key: &Key) -> Result<Option<Item>, TableError> {
        let key = self.key_of(key)?;
        Ok(self.rows.get(&key).cloned())
    }

    pub(crate) fn put(&mut self, item: Item) -> Result<(), TableError> {
        let key = self.item_key(&item)?;
        self.rows.insert(key, item);
        Ok(())
    }

    pub(crate) fn update(&mut self, key: &Key, updates: Item) -> Result<(), TableError> {
        let key = self.key_of(key)?;
        let fresh = self.key_item(&key);
        let item = self.rows.entry(key).or_insert(fresh);
        for (attribute, value) in updates {
            if !self.schema.is_key_attribute(&attribute) {
                item.insert(attribute, value);
            }
        }
        Ok(())
    }

    pub(crate) fn delete(&mut self, key: &Key) -> Result<(), TableError> {
        let key = self.key_of(key)?;
        self.rows.remove(&key);
        Ok(())
    }

    pub(crate) fn scan(&self, scan: &Scan) -> Vec<Item> {
        self.rows
            .values()
            .filter(|item| scan.matches(item))
            .map(|item| scan.project_item(item))
            .collect()
    }
}

pub(crate) fn missing_table(engine: &'static str, table: &str) -> TableError {
    TableError::new(
        engine,
        TableErrorKind::TableNotFound,
        format!("no table named {table}"),
    )
    .with_table(table)
}

pub(crate) fn already_exists(engine: &'static str, table: &str) -> TableError {
    TableError::new(
        engine,
        TableErrorKind::AlreadyExists,
        format!("table {table} already exists"),
    )
    .with_table(table)
}

pub(crate) fn empty_name(engine: &'static str) -> TableError {
    TableError::new(engine, TableErrorKind::InvalidRequest, "table name is empty")
}

/// Table driver that keeps every table in memory.
///
/// Scans return items in primary key order.
#[derive(Debug, Default)]
pub struct MemoryTables {
    tables: RwLock<HashMap<String, MemoryTable>>,
}

impl MemoryTables {
    /// Create a store with no tables.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TableDriver for MemoryTables {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn describe_table(&self, table: &str) -> Result<TableSchema, TableError> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .map(|table| table.schema().clone())
            .ok_or_else(|| missing_table(ENGINE, table))
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<(), TableError> {
        if schema.name.is_empty() {
            return Err(empty_name(ENGINE));
        }

        let mut tables = self.tables.write().await;
        if tables.contains_key(&schema.name) {
            return Err(already_exists(ENGINE, &schema.name));
        }

        tables.insert(schema.name.clone(), MemoryTable::new(ENGINE, schema.clone()));
        Ok(())
    }

    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, TableError> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .ok_or_else(|| missing_table(ENGINE, table))?
            .get(key)
    }

    async fn put_item(&self, table: &str, item: Item) -> Result<(), TableError> {
        let mut tables = self.tables.write().await;
        tables
            .get_mut(table)
            .ok_or_else(|| missing_table(ENGINE, table))?
            .put(item)
    }

    async fn update_item(&self, table: &str, key: &Key, updates: Item) -> Result<(), TableError> {
        let mut tables = self.tables.write().await;
        tables
            .get_mut(table)
            .ok_or_else(|| missing_table(ENGINE, table))?
            .update(key, updates)
    }

    async fn delete_item(&self, table: &str, key: &Key) -> Result<(), TableError> {
        let mut tables = self.tables.write().await;
        tables
            .get_mut(table)
            .ok_or_else(|| missing_table(ENGINE, table))?
            .delete(key)
    }

    async fn scan(&self, table: &str, scan: &Scan) -> Result<Vec<Item>, TableError> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .ok_or_else(|| missing_table(ENGINE, table))?
            .scan(scan))
    }
}
