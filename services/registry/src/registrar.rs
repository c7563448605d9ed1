//! Module metadata registration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tables::{Key, Scan, TableSchema, Tables};

use crate::error::{RegistryError, RegistryResult};
use crate::messages::{Ack, Maturity, ModuleMetadata, RegisterModuleRequest, split_address};
use crate::rows::{ensure_table, failed, from_item, to_item};
use crate::rpc::Registrar;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModuleRow {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    source_url: String,
    #[serde(default)]
    maturity: String,
    created_on: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modified_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct ModuleUpdate<'r> {
    description: &'r str,
    source_url: &'r str,
    maturity: &'static str,
    modified_on: DateTime<Utc>,
}

impl ModuleRow {
    fn into_metadata(self) -> RegistryResult<ModuleMetadata> {
        let [organization, name, provider] = split_address::<3>("module", &self.name)?;
        Ok(ModuleMetadata {
            organization: organization.to_owned(),
            name: name.to_owned(),
            provider: provider.to_owned(),
            description: self.description,
            source_url: self.source_url,
            maturity: Maturity::from_name(&self.maturity),
        })
    }
}

/// Stores module metadata in a table keyed by module address.
#[derive(Debug, Clone)]
pub struct ModuleRegistrar {
    tables: Tables,
    table: String,
}

impl ModuleRegistrar {
    /// Register modules in `table`.
    pub fn new(tables: Tables, table: impl Into<String>) -> Self {
        Self {
            tables,
            table: table.into(),
        }
    }

    /// The modules table layout.
    pub fn schema(&self) -> TableSchema {
        TableSchema::new(&self.table, "name")
    }

    /// Create the modules table unless it exists.
    pub async fn initialize(&self) -> RegistryResult<()> {
        ensure_table(&self.tables, &self.schema()).await
    }
}

#[async_trait::async_trait]
impl Registrar for ModuleRegistrar {
    #[tracing::instrument(skip(self, request), fields(name = %request.name))]
    async fn register(&self, request: RegisterModuleRequest) -> RegistryResult<Ack> {
        split_address::<3>("module", &request.name)?;

        let key = Key::new("name", &request.name);
        let existing = self
            .tables
            .get_item(&self.table, &key)
            .await
            .map_err(failed(RegistryError::Get("module")))?;

        if existing.is_none() {
            let row = ModuleRow {
                name: request.name.clone(),
                description: request.description,
                source_url: request.source_url,
                maturity: request.maturity.as_str().to_owned(),
                created_on: Utc::now(),
                modified_on: None,
            };
            self.tables
                .put_item(&self.table, to_item(&row, "module")?)
                .await
                .map_err(failed(RegistryError::Create("module")))?;
            tracing::info!("Module registered");
        } else {
            let update = ModuleUpdate {
                description: &request.description,
                source_url: &request.source_url,
                maturity: request.maturity.as_str(),
                modified_on: Utc::now(),
            };
            self.tables
                .update_item(&self.table, &key, to_item(&update, "module")?)
                .await
                .map_err(failed(RegistryError::Update("module")))?;
            tracing::info!("Module updated");
        }

        Ok(Ack::new("Module registered."))
    }

    #[tracing::instrument(skip(self))]
    async fn get_module(&self, name: &str) -> RegistryResult<ModuleMetadata> {
        let item = self
            .tables
            .get_item(&self.table, &Key::new("name", name))
            .await
            .map_err(failed(RegistryError::Get("module")))?
            .ok_or_else(|| RegistryError::NotFound(format!("module {name}")))?;
        from_item::<ModuleRow>(item, "module")?.into_metadata()
    }

    #[tracing::instrument(skip(self))]
    async fn list_modules(&self) -> RegistryResult<Vec<ModuleMetadata>> {
        let items = self
            .tables
            .scan(&self.table, &Scan::new())
            .await
            .map_err(failed(RegistryError::Scan("modules")))?;

        items
            .into_iter()
            .map(|item| from_item::<ModuleRow>(item, "module")?.into_metadata())
            .collect()
    }
}
