//! Module version lifecycle: an in-flight version is begun, then either
//! published or aborted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use tables::{Item, Key, Scan, TableSchema, Tables};

use crate::error::{RegistryError, RegistryResult};
use crate::messages::{Ack, Session, VersionedModule};
use crate::release::{Release, ReleasePublisher, notify};
use crate::rows::{ensure_table, failed, from_item, to_item};
use crate::rpc::VersionManager;
use crate::versions::{parse, sort_by_version};

/// A stored module version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Module address, `<organization>/<name>/<provider>`.
    pub name: String,

    /// Version string as submitted.
    pub version: String,

    /// When the version was begun.
    pub created_on: DateTime<Utc>,

    /// When the version was published, if it has been.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_on: Option<DateTime<Utc>>,
}

impl VersionRecord {
    /// Whether the version has been published.
    pub fn is_published(&self) -> bool {
        self.published_on.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct VersionOnly {
    version: String,
}

fn version_key(module: &VersionedModule) -> Key {
    Key::new("name", &module.name).and("version", &module.version)
}

/// Stores module versions in a table keyed by name and version.
#[derive(Debug, Clone)]
pub struct ModuleVersionManager {
    tables: Tables,
    table: String,
    releases: Arc<dyn ReleasePublisher>,
}

impl ModuleVersionManager {
    /// Manage versions in `table`, notifying `releases` on publish.
    pub fn new(tables: Tables, table: impl Into<String>, releases: Arc<dyn ReleasePublisher>) -> Self {
        Self {
            tables,
            table: table.into(),
            releases,
        }
    }

    /// The versions table layout.
    pub fn schema(&self) -> TableSchema {
        TableSchema::new(&self.table, "name").with_range_key("version")
    }

    /// Create the versions table unless it exists.
    pub async fn initialize(&self) -> RegistryResult<()> {
        ensure_table(&self.tables, &self.schema()).await
    }

    /// Look up a single version.
    #[tracing::instrument(skip(self, module), fields(name = %module.name, version = %module.version))]
    pub async fn get_version(&self, module: &VersionedModule) -> RegistryResult<VersionRecord> {
        let item = self
            .tables
            .get_item(&self.table, &version_key(module))
            .await
            .map_err(failed(RegistryError::Get("module version")))?
            .ok_or_else(|| RegistryError::NotFound(format!("module version {module}")))?;
        from_item(item, "module version")
    }

    fn announce(&self, module: &VersionedModule) {
        match parse(&module.version) {
            Ok(version) if version > Version::new(0, 0, 0) => {
                let release = Release {
                    kind: "module".into(),
                    organization: module.organization().to_owned(),
                    name: module.name.clone(),
                    version: module.version.clone(),
                    description: format!("Module {} version {} published", module.name, module.version),
                    links: Vec::new(),
                };
                notify(self.releases.clone(), release);
            }
            Ok(_) => tracing::debug!("Not announcing version 0.0.0"),
            Err(error) => tracing::warn!(%error, "Not announcing unparsable version"),
        }
    }
}

#[async_trait::async_trait]
impl VersionManager for ModuleVersionManager {
    #[tracing::instrument(skip(self, module), fields(name = %module.name, version = %module.version))]
    async fn begin_version(&self, module: VersionedModule) -> RegistryResult<Session> {
        let record = VersionRecord {
            name: module.name.clone(),
            version: module.version.clone(),
            created_on: Utc::now(),
            published_on: None,
        };
        let item = to_item(&record, "module version")?;
        self.tables
            .put_item(&self.table, item)
            .await
            .map_err(failed(RegistryError::Create("module version")))?;

        tracing::info!("Version begun");
        Ok(Session {
            key: module.to_string(),
            message: "Version created.".into(),
        })
    }

    #[tracing::instrument(skip(self, module), fields(name = %module.name, version = %module.version))]
    async fn abort_version(&self, module: VersionedModule) -> RegistryResult<Ack> {
        self.tables
            .delete_item(&self.table, &version_key(&module))
            .await
            .map_err(failed(RegistryError::Abort("module version")))?;

        tracing::info!("Version aborted");
        Ok(Ack::new("Version aborted."))
    }

    #[tracing::instrument(skip(self, module), fields(name = %module.name, version = %module.version))]
    async fn publish_version(&self, module: VersionedModule) -> RegistryResult<Ack> {
        let key = version_key(&module);
        let now = Utc::now();
        let existing = self
            .tables
            .get_item(&self.table, &key)
            .await
            .map_err(failed(RegistryError::Publish("module version")))?;

        if existing.is_some() {
            let mut updates = Item::new();
            updates.insert(
                "published_on".into(),
                serde_json::to_value(now).map_err(failed(RegistryError::Marshal("module version")))?,
            );
            self.tables
                .update_item(&self.table, &key, updates)
                .await
                .map_err(failed(RegistryError::Publish("module version")))?;
        } else {
            tracing::warn!("Publishing a version which was never begun");
            let record = VersionRecord {
                name: module.name.clone(),
                version: module.version.clone(),
                created_on: now,
                published_on: Some(now),
            };
            self.tables
                .put_item(&self.table, to_item(&record, "module version")?)
                .await
                .map_err(failed(RegistryError::Publish("module version")))?;
        }

        tracing::info!("Version published");
        self.announce(&module);
        Ok(Ack::new("Version published."))
    }

    #[tracing::instrument(skip(self))]
    async fn list_module_versions(&self, name: &str) -> RegistryResult<Vec<String>> {
        let scan = Scan::new()
            .equals("name", name)
            .exists("published_on")
            .project(["version"]);
        let items = self
            .tables
            .scan(&self.table, &scan)
            .await
            .map_err(failed(RegistryError::Scan("module versions")))?;

        let versions = items
            .into_iter()
            .map(|item| from_item::<VersionOnly>(item, "module version").map(|row| row.version))
            .collect::<RegistryResult<Vec<_>>>()?;

        Ok(sort_by_version(versions, |version| version.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use tables::MemoryTables;

    use super::*;
    use crate::release::{NoopReleasePublisher, RecordingPublisher};
    use crate::testing::FaultyTables;

    async fn manager_with(releases: Arc<dyn ReleasePublisher>) -> (Tables, ModuleVersionManager) {
        let tables: Tables = MemoryTables::new().into();
        let manager = ModuleVersionManager::new(tables.clone(), "versions", releases);
        manager.initialize().await.unwrap();
        (tables, manager)
    }

    async fn manager() -> ModuleVersionManager {
        manager_with(Arc::new(NoopReleasePublisher)).await.1
    }

    fn module(version: &str) -> VersionedModule {
        VersionedModule::new("acme/vpc/aws", version)
    }

    #[tokio::test]
    async fn begin_is_idempotent() {
        let (tables, manager) = manager_with(Arc::new(NoopReleasePublisher)).await;
        let session = manager.begin_version(module("1.0.0")).await.unwrap();
        assert_eq!(session.key, "acme/vpc/aws@1.0.0");
        manager.begin_version(module("1.0.0")).await.unwrap();

        let rows = tables.scan("versions", &Scan::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!manager.get_version(&module("1.0.0")).await.unwrap().is_published());
    }

    #[tokio::test]
    async fn abort_removes_version() {
        let manager = manager().await;
        manager.begin_version(module("1.0.0")).await.unwrap();
        manager.abort_version(module("1.0.0")).await.unwrap();

        assert!(matches!(
            manager.get_version(&module("1.0.0")).await,
            Err(RegistryError::NotFound(_))
        ));

        // Aborting again is not an error.
        manager.abort_version(module("1.0.0")).await.unwrap();
    }

    #[tokio::test]
    async fn publish_keeps_created_on() {
        let manager = manager().await;
        manager.begin_version(module("1.0.0")).await.unwrap();
        let begun = manager.get_version(&module("1.0.0")).await.unwrap();

        manager.publish_version(module("1.0.0")).await.unwrap();
        let published = manager.get_version(&module("1.0.0")).await.unwrap();
        assert!(published.is_published());
        assert_eq!(published.created_on, begun.created_on);
    }

    #[tokio::test]
    async fn publish_without_begin_creates_version() {
        let manager = manager().await;
        manager.publish_version(module("1.0.0")).await.unwrap();

        let record = manager.get_version(&module("1.0.0")).await.unwrap();
        assert!(record.is_published());
        assert_eq!(record.published_on, Some(record.created_on));
        assert_eq!(
            manager.list_module_versions("acme/vpc/aws").await.unwrap(),
            vec!["1.0.0"]
        );
    }

    #[tokio::test]
    async fn begin_after_abort_starts_fresh() {
        let manager = manager().await;
        manager.begin_version(module("1.0.0")).await.unwrap();
        manager.publish_version(module("1.0.0")).await.unwrap();
        let first = manager.get_version(&module("1.0.0")).await.unwrap();
        manager.abort_version(module("1.0.0")).await.unwrap();

        manager.begin_version(module("1.0.0")).await.unwrap();
        let second = manager.get_version(&module("1.0.0")).await.unwrap();
        assert_eq!(second.published_on, None);
        assert!(second.created_on >= first.created_on);
        assert!(second.created_on >= first.published_on.unwrap());
        assert!(manager.list_module_versions("acme/vpc/aws").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_published_versions_are_listed() {
        let manager = manager().await;
        for version in ["1.0.10", "1.0.2", "2.0.0-rc.1", "not-a-version"] {
            manager.begin_version(module(version)).await.unwrap();
            manager.publish_version(module(version)).await.unwrap();
        }
        manager.begin_version(module("3.0.0")).await.unwrap();

        let versions = manager.list_module_versions("acme/vpc/aws").await.unwrap();
        assert_eq!(versions, vec!["1.0.2", "1.0.10", "2.0.0-rc.1"]);
        assert!(manager.list_module_versions("acme/other/aws").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_announces_release() {
        let recorder = Arc::new(RecordingPublisher::default());
        let (_, manager) = manager_with(recorder.clone()).await;

        manager.begin_version(module("v1.2.0")).await.unwrap();
        manager.publish_version(module("v1.2.0")).await.unwrap();

        let releases = recorder.wait_for(1).await;
        assert_eq!(releases[0].organization, "acme");
        assert_eq!(releases[0].name, "acme/vpc/aws");
        assert_eq!(releases[0].version, "v1.2.0");
        assert_eq!(releases[0].kind, "module");
    }

    #[tokio::test]
    async fn zero_version_is_not_announced() {
        let recorder = Arc::new(RecordingPublisher::default());
        let (_, manager) = manager_with(recorder.clone()).await;

        manager.publish_version(module("0.0.0")).await.unwrap();
        manager.publish_version(module("garbage")).await.unwrap();
        manager.publish_version(module("0.0.1")).await.unwrap();

        let releases = recorder.wait_for(1).await;
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].version, "0.0.1");
    }

    #[tokio::test]
    async fn store_failures_have_stable_kinds() {
        let faulty = FaultyTables::new();
        let manager = ModuleVersionManager::new(
            faulty.clone().into(),
            "versions",
            Arc::new(NoopReleasePublisher),
        );
        manager.initialize().await.unwrap();
        faulty.fail_all();

        assert_eq!(
            manager.begin_version(module("1.0.0")).await,
            Err(RegistryError::Create("module version"))
        );
        assert_eq!(
            manager.abort_version(module("1.0.0")).await,
            Err(RegistryError::Abort("module version"))
        );
        assert_eq!(
            manager.publish_version(module("1.0.0")).await,
            Err(RegistryError::Publish("module version"))
        );
        assert_eq!(
            manager.get_version(&module("1.0.0")).await,
            Err(RegistryError::Get("module version"))
        );
        assert_eq!(
            manager.list_module_versions("acme/vpc/aws").await,
            Err(RegistryError::Scan("module versions"))
        );
    }
}
