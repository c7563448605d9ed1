//! Provider registration, version lifecycle and download metadata.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tables::{Key, Scan, TableSchema, Tables};

use crate::error::{RegistryError, RegistryResult};
use crate::messages::{
    Ack, Maturity, Platform, PlatformItem, PlatformMetadata, ProviderMetadata,
    ProviderVersionItem, RegisterProviderRequest, VersionDataRequest, VersionedProvider,
    split_address,
};
use crate::rows::{ensure_table, failed, from_item, to_item};
use crate::rpc::ProviderManager;
use crate::versions::sort_by_version;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProviderRow {
    name: String,
    version: String,
    #[serde(default)]
    protocols: Vec<String>,
    #[serde(default)]
    platforms: Vec<PlatformItem>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    source_repo_url: String,
    #[serde(default)]
    maturity: String,
    created_on: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modified_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    published_on: Option<DateTime<Utc>>,
}

impl ProviderRow {
    fn metadata(&self) -> RegistryResult<ProviderMetadata> {
        let [organization, name] = split_address::<2>("provider", &self.name)?;
        Ok(ProviderMetadata {
            organization: organization.to_owned(),
            name: name.to_owned(),
            description: self.description.clone(),
            source_repo_url: self.source_repo_url.clone(),
            maturity: Maturity::from_name(&self.maturity),
        })
    }
}

#[derive(Debug, Serialize)]
struct ProviderUpdate<'r> {
    description: &'r str,
    source_repo_url: &'r str,
    maturity: &'static str,
    platforms: &'r [PlatformItem],
    protocols: &'r [String],
    modified_on: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct Published {
    published_on: DateTime<Utc>,
}

fn provider_key(name: &str, version: &str) -> Key {
    Key::new("name", name).and("version", version)
}

/// Stores provider versions in a table keyed by name and version.
#[derive(Debug, Clone)]
pub struct ProviderVersionManager {
    tables: Tables,
    table: String,
}

impl ProviderVersionManager {
    /// Manage providers in `table`.
    pub fn new(tables: Tables, table: impl Into<String>) -> Self {
        Self {
            tables,
            table: table.into(),
        }
    }

    /// The providers table layout.
    pub fn schema(&self) -> TableSchema {
        TableSchema::new(&self.table, "name").with_range_key("version")
    }

    /// Create the providers table unless it exists.
    pub async fn initialize(&self) -> RegistryResult<()> {
        ensure_table(&self.tables, &self.schema()).await
    }

    async fn scan(&self, scan: &Scan) -> RegistryResult<Vec<ProviderRow>> {
        self.tables
            .scan(&self.table, scan)
            .await
            .map_err(failed(RegistryError::Scan("providers")))?
            .into_iter()
            .map(|item| from_item(item, "provider"))
            .collect()
    }
}

#[async_trait::async_trait]
impl ProviderManager for ProviderVersionManager {
    #[tracing::instrument(skip(self, request), fields(name = %request.name, version = %request.version))]
    async fn register(&self, request: RegisterProviderRequest) -> RegistryResult<Ack> {
        split_address::<2>("provider", &request.name)?;

        let key = provider_key(&request.name, &request.version);
        let existing = self
            .tables
            .get_item(&self.table, &key)
            .await
            .map_err(failed(RegistryError::Get("provider")))?;

        if existing.is_none() {
            let row = ProviderRow {
                name: request.name,
                version: request.version,
                protocols: request.protocols,
                platforms: request.platforms,
                description: request.description,
                source_repo_url: request.source_repo_url,
                maturity: request.maturity.as_str().to_owned(),
                created_on: Utc::now(),
                modified_on: None,
                published_on: None,
            };
            self.tables
                .put_item(&self.table, to_item(&row, "provider")?)
                .await
                .map_err(failed(RegistryError::Create("provider")))?;
            tracing::info!("Provider registered");
        } else {
            let update = ProviderUpdate {
                description: &request.description,
                source_repo_url: &request.source_repo_url,
                maturity: request.maturity.as_str(),
                platforms: &request.platforms,
                protocols: &request.protocols,
                modified_on: Utc::now(),
            };
            self.tables
                .update_item(&self.table, &key, to_item(&update, "provider")?)
                .await
                .map_err(failed(RegistryError::Update("provider")))?;
            tracing::info!("Provider updated");
        }

        Ok(Ack::new("Provider registered."))
    }

    #[tracing::instrument(skip(self, provider), fields(name = %provider.name, version = %provider.version))]
    async fn abort_version(&self, provider: VersionedProvider) -> RegistryResult<Ack> {
        self.tables
            .delete_item(&self.table, &provider_key(&provider.name, &provider.version))
            .await
            .map_err(failed(RegistryError::Abort("provider version")))?;

        tracing::info!("Provider version aborted");
        Ok(Ack::new("Version aborted."))
    }

    #[tracing::instrument(skip(self, provider), fields(name = %provider.name, version = %provider.version))]
    async fn publish_version(&self, provider: VersionedProvider) -> RegistryResult<Ack> {
        let update = Published {
            published_on: Utc::now(),
        };
        self.tables
            .update_item(
                &self.table,
                &provider_key(&provider.name, &provider.version),
                to_item(&update, "provider version")?,
            )
            .await
            .map_err(failed(RegistryError::Publish("provider version")))?;

        tracing::info!("Provider version published");
        Ok(Ack::new("Version published."))
    }

    #[tracing::instrument(skip(self))]
    async fn list_provider_versions(&self, name: &str) -> RegistryResult<Vec<ProviderVersionItem>> {
        let rows = self
            .scan(&Scan::new().equals("name", name).exists("published_on"))
            .await?;

        let items = rows
            .into_iter()
            .map(|row| ProviderVersionItem {
                version: row.version,
                protocols: row.protocols,
                platforms: row
                    .platforms
                    .into_iter()
                    .map(|platform| Platform {
                        os: platform.os,
                        arch: platform.arch,
                    })
                    .collect(),
            })
            .collect();
        Ok(sort_by_version(items, |item| item.version.as_str()))
    }

    #[tracing::instrument(skip(self, request), fields(name = %request.name, version = %request.version, os = %request.os, arch = %request.arch))]
    async fn get_version_data(&self, request: VersionDataRequest) -> RegistryResult<PlatformMetadata> {
        let item = self
            .tables
            .get_item(&self.table, &provider_key(&request.name, &request.version))
            .await
            .map_err(failed(RegistryError::Get("provider version")))?
            .ok_or_else(|| {
                RegistryError::NotFound(format!(
                    "provider version {}@{}",
                    request.name, request.version
                ))
            })?;
        let row: ProviderRow = from_item(item, "provider version")?;

        let platform = row
            .platforms
            .into_iter()
            .find(|platform| platform.os == request.os && platform.arch == request.arch)
            .ok_or_else(|| {
                RegistryError::NotFound(format!(
                    "platform {}/{} for provider version {}@{}",
                    request.os, request.arch, request.name, request.version
                ))
            })?;

        Ok(PlatformMetadata {
            protocols: row.protocols,
            os: platform.os,
            arch: platform.arch,
            filename: platform.filename,
            download_url: platform.download_url,
            shasums_url: platform.shasums_url,
            shasums_signature_url: platform.shasums_signature_url,
            shasum: platform.shasum,
            signing_keys: platform.signing_keys,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn list_providers(&self) -> RegistryResult<Vec<ProviderMetadata>> {
        let mut unique = BTreeMap::new();
        for row in self.scan(&Scan::new()).await? {
            if !unique.contains_key(&row.name) {
                let metadata = row.metadata()?;
                unique.insert(row.name, metadata);
            }
        }
        Ok(unique.into_values().collect())
    }

    #[tracing::instrument(skip(self))]
    async fn get_provider(&self, name: &str) -> RegistryResult<ProviderMetadata> {
        self.scan(&Scan::new().equals("name", name))
            .await?
            .first()
            .ok_or_else(|| RegistryError::NotFound(format!("provider {name}")))?
            .metadata()
    }
}
