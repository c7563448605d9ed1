//! Free-text module tags.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tables::{Key, TableSchema, Tables};

use crate::error::{RegistryError, RegistryResult};
use crate::messages::{Ack, PublishTagRequest};
use crate::rows::{ensure_table, failed, from_item, to_item};
use crate::rpc::TagManager;

#[derive(Debug, Deserialize)]
struct TagRow {
    #[serde(default)]
    tags: BTreeSet<String>,
}

#[derive(Debug, Serialize)]
struct NewTagRow<'t> {
    name: &'t str,
    tags: &'t BTreeSet<String>,
    created_on: DateTime<Utc>,
    modified_on: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct TagUpdate<'t> {
    tags: &'t BTreeSet<String>,
    modified_on: DateTime<Utc>,
}

/// Stores the tag set of each module in a table keyed by module address.
#[derive(Debug, Clone)]
pub struct ModuleTagManager {
    tables: Tables,
    table: String,
}

impl ModuleTagManager {
    /// Keep tags in `table`.
    pub fn new(tables: Tables, table: impl Into<String>) -> Self {
        Self {
            tables,
            table: table.into(),
        }
    }

    /// The tags table layout.
    pub fn schema(&self) -> TableSchema {
        TableSchema::new(&self.table, "name")
    }

    /// Create the tags table unless it exists.
    pub async fn initialize(&self) -> RegistryResult<()> {
        ensure_table(&self.tables, &self.schema()).await
    }

    /// The tags of a module; empty when it was never tagged.
    #[tracing::instrument(skip(self))]
    pub async fn get_tags(&self, name: &str) -> RegistryResult<BTreeSet<String>> {
        let item = self
            .tables
            .get_item(&self.table, &Key::new("name", name))
            .await
            .map_err(failed(RegistryError::Get("module tags")))?;
        match item {
            Some(item) => Ok(from_item::<TagRow>(item, "module tags")?.tags),
            None => Ok(BTreeSet::new()),
        }
    }
}

#[async_trait::async_trait]
impl TagManager for ModuleTagManager {
    #[tracing::instrument(skip(self, request), fields(name = %request.name))]
    async fn publish_tag(&self, request: PublishTagRequest) -> RegistryResult<Ack> {
        if request.name.is_empty() {
            return Err(RegistryError::InvalidArgument("module name is empty".into()));
        }

        let tags: BTreeSet<String> = request
            .tags
            .iter()
            .map(|tag| tag.trim().to_owned())
            .filter(|tag| !tag.is_empty())
            .collect();

        let key = Key::new("name", &request.name);
        let existing = self
            .tables
            .get_item(&self.table, &key)
            .await
            .map_err(failed(RegistryError::Get("module tags")))?;

        let now = Utc::now();
        if existing.is_none() {
            let row = NewTagRow {
                name: &request.name,
                tags: &tags,
                created_on: now,
                modified_on: now,
            };
            self.tables
                .put_item(&self.table, to_item(&row, "module tags")?)
                .await
                .map_err(failed(RegistryError::Create("module tags")))?;
        } else {
            let update = TagUpdate {
                tags: &tags,
                modified_on: now,
            };
            self.tables
                .update_item(&self.table, &key, to_item(&update, "module tags")?)
                .await
                .map_err(failed(RegistryError::Update("module tags")))?;
        }

        tracing::info!(count = tags.len(), "Tags published");
        Ok(Ack::new("Tags published."))
    }
}
