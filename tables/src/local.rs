use std::collections::HashMap;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::memory::{already_exists, empty_name, missing_table, MemoryTable};
use crate::{Item, Key, Scan, TableDriver, TableError, TableErrorKind, TableSchema};

const ENGINE: &str = "local";

/// Wrap an I/O failure with context.
fn local_error(context: &'static str, table: &str) -> impl FnOnce(io::Error) -> TableError {
    let table = table.to_owned();
    move |error| {
        TableError::new(
            ENGINE,
            TableErrorKind::Unavailable,
            eyre::Report::new(error).wrap_err(context),
        )
        .with_table(table)
    }
}

fn corrupt(context: String, table: &str) -> impl FnOnce(serde_json::Error) -> TableError {
    let table = table.to_owned();
    move |error| {
        TableError::new(
            ENGINE,
            TableErrorKind::Other,
            eyre::Report::new(error).wrap_err(context),
        )
        .with_table(table)
    }
}

#[derive(Debug, Serialize)]
struct TableFileRef<'t> {
    schema: &'t TableSchema,
    items: Vec<&'t Item>,
}

#[derive(Debug, Deserialize)]
struct TableFile {
    schema: TableSchema,
    #[serde(default)]
    items: Vec<Item>,
}

/// Table driver which keeps each table as a JSON file under `root`.
///
/// Tables are read on first use and cached. Every write rewrites the whole
/// table file through a staging file and a rename.
#[derive(Debug)]
pub struct LocalTables {
    root: Utf8PathBuf,
    tables: Mutex<HashMap<String, MemoryTable>>,
}

impl LocalTables {
    /// Create a driver rooted at `root`. The directory is created with the
    /// first table.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// The directory holding the table files.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn path(&self, table: &str) -> Result<Utf8PathBuf, TableError> {
        if table.is_empty() {
            return Err(empty_name(ENGINE));
        }
        if table.starts_with('.') || table.contains(['/', '\\']) {
            return Err(TableError::new(
                ENGINE,
                TableErrorKind::InvalidRequest,
                format!("table name {table} is not a plain file name"),
            )
            .with_table(table));
        }
        Ok(self.root.join(format!("{table}.json")))
    }

    async fn read(&self, table: &str) -> Result<Option<MemoryTable>, TableError> {
        let path = self.path(table)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(local_error("read table file", table)(error)),
        };
        let file: TableFile =
            serde_json::from_slice(&data).map_err(corrupt(format!("parse {path}"), table))?;
        tracing::debug!(%path, items = file.items.len(), "Loaded table");
        MemoryTable::from_items(ENGINE, file.schema, file.items).map(Some)
    }

    async fn load<'t>(
        &self,
        tables: &'t mut HashMap<String, MemoryTable>,
        table: &str,
    ) -> Result<&'t mut MemoryTable, TableError> {
        if !tables.contains_key(table) {
            let loaded = self
                .read(table)
                .await?
                .ok_or_else(|| missing_table(ENGINE, table))?;
            tables.insert(table.to_owned(), loaded);
        }
        tables
            .get_mut(table)
            .ok_or_else(|| missing_table(ENGINE, table))
    }

    async fn persist(&self, table: &MemoryTable) -> Result<(), TableError> {
        let name = &table.schema().name;
        let path = self.path(name)?;
        let file = TableFileRef {
            schema: table.schema(),
            items: table.items().collect(),
        };
        let data = serde_json::to_vec_pretty(&file).map_err(corrupt(format!("encode {path}"), name))?;

        let staging = self.root.join(format!(".{name}.json.tmp"));
        tokio::fs::write(&staging, data)
            .await
            .map_err(local_error("write table file", name))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(local_error("replace table file", name))
    }

    /// Apply `change` to a table and write it back. A table which fails to
    /// persist is dropped from the cache so the next access re-reads the file.
    async fn write<F>(&self, table: &str, change: F) -> Result<(), TableError>
    where
        F: FnOnce(&mut MemoryTable) -> Result<(), TableError> + Send,
    {
        let mut tables = self.tables.lock().await;
        let loaded = self.load(&mut tables, table).await?;
        change(loaded)?;
        let persisted = self.persist(loaded).await;
        if let Err(error) = persisted {
            tables.remove(table);
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TableDriver for LocalTables {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn describe_table(&self, table: &str) -> Result<TableSchema, TableError> {
        let mut tables = self.tables.lock().await;
        Ok(self.load(&mut tables, table).await?.schema().clone())
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<(), TableError> {
        let path = self.path(&schema.name)?;
        let mut tables = self.tables.lock().await;

        let on_disk = tokio::fs::try_exists(&path)
            .await
            .map_err(local_error("check table file", &schema.name))?;
        if tables.contains_key(&schema.name) || on_disk {
            return Err(already_exists(ENGINE, &schema.name));
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(local_error("create tables root", &schema.name))?;
        let table = MemoryTable::new(ENGINE, schema.clone());
        self.persist(&table).await?;
        tracing::info!(%path, "Created table");
        tables.insert(schema.name.clone(), table);
        Ok(())
    }

    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, TableError> {
        let mut tables = self.tables.lock().await;
        self.load(&mut tables, table).await?.get(key)
    }

    async fn put_item(&self, table: &str, item: Item) -> Result<(), TableError> {
        self.write(table, |loaded| loaded.put(item)).await
    }

    async fn update_item(&self, table: &str, key: &Key, updates: Item) -> Result<(), TableError> {
        self.write(table, |loaded| loaded.update(key, updates)).await
    }

    async fn delete_item(&self, table: &str, key: &Key) -> Result<(), TableError> {
        self.write(table, |loaded| loaded.delete(key)).await
    }

    async fn scan(&self, table: &str, scan: &Scan) -> Result<Vec<Item>, TableError> {
        let mut tables = self.tables.lock().await;
        Ok(self.load(&mut tables, table).await?.scan(scan))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn item(value: Value) -> Item {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn root(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join("tables")).unwrap()
    }

    fn versions() -> TableSchema {
        TableSchema::new("versions", "name").with_range_key("version")
    }

    #[tokio::test]
    async fn rows_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let key = Key::new("name", "acme/vpc/aws").and("version", "1.0.0");

        {
            let tables = LocalTables::new(root(&dir));
            tables.create_table(&versions()).await.unwrap();
            tables
                .put_item(
                    "versions",
                    item(json!({ "name": "acme/vpc/aws", "version": "1.0.0", "created_on": "t0" })),
                )
                .await
                .unwrap();
            tables
                .update_item("versions", &key, item(json!({ "published_on": "t1" })))
                .await
                .unwrap();
            tables
                .put_item(
                    "versions",
                    item(json!({ "name": "acme/vpc/aws", "version": "2.0.0" })),
                )
                .await
                .unwrap();
            tables
                .delete_item(
                    "versions",
                    &Key::new("name", "acme/vpc/aws").and("version", "2.0.0"),
                )
                .await
                .unwrap();
        }

        let reopened = LocalTables::new(root(&dir));
        assert_eq!(reopened.describe_table("versions").await.unwrap(), versions());
        assert_eq!(
            reopened.get_item("versions", &key).await.unwrap(),
            Some(item(json!({
                "name": "acme/vpc/aws",
                "version": "1.0.0",
                "created_on": "t0",
                "published_on": "t1",
            })))
        );
        assert_eq!(
            reopened.scan("versions", &Scan::new()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn existing_file_is_an_existing_table() {
        let dir = tempfile::tempdir().unwrap();
        LocalTables::new(root(&dir))
            .create_table(&versions())
            .await
            .unwrap();

        let reopened = LocalTables::new(root(&dir));
        let error = reopened.create_table(&versions()).await.unwrap_err();
        assert_eq!(error.kind(), TableErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn missing_table() {
        let dir = tempfile::tempdir().unwrap();
        let tables = LocalTables::new(root(&dir));
        let error = tables.scan("nope", &Scan::new()).await.unwrap_err();
        assert_eq!(error.kind(), TableErrorKind::TableNotFound);
        assert_eq!(error.table(), Some("nope"));
    }

    #[tokio::test]
    async fn path_like_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tables = LocalTables::new(root(&dir));
        for name in ["../escape", "a/b", ".hidden", ""] {
            let error = tables
                .create_table(&TableSchema::new(name, "name"))
                .await
                .unwrap_err();
            assert_eq!(error.kind(), TableErrorKind::InvalidRequest, "{name}");
        }
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let root = root(&dir);
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("versions.json"), b"{ not json").unwrap();

        let tables = LocalTables::new(root);
        let error = tables.describe_table("versions").await.unwrap_err();
        assert_eq!(error.kind(), TableErrorKind::Other);
    }
}
