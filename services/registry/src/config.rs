//! Registry configuration, loaded once at startup.

use std::net::{Ipv4Addr, SocketAddr};

use serde::Deserialize;
use storage::StorageConfig;
use tables::TablesConfig;

use crate::dependency::Traversal;
use crate::transfer::DEFAULT_CHUNK_SIZE;

/// Names of the backing tables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TableNames {
    /// Registered modules.
    pub modules: String,
    /// Module versions.
    pub module_versions: String,
    /// Module dependency edges.
    pub module_dependencies: String,
    /// Container image dependencies.
    pub container_dependencies: String,
    /// Module tags.
    pub tags: String,
    /// Provider versions.
    pub providers: String,
    /// Release notifications.
    pub releases: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            modules: "terrarium-modules".into(),
            module_versions: "terrarium-module-versions".into(),
            module_dependencies: "terrarium-module-dependencies".into(),
            container_dependencies: "terrarium-module-container-dependencies".into(),
            tags: "terrarium-module-tags".into(),
            providers: "terrarium-providers".into(),
            releases: "terrarium-releases".into(),
        }
    }
}

/// Names of the backing buckets.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BucketNames {
    /// Module source archives.
    pub modules: String,
    /// Provider binaries and checksums.
    pub providers: String,
}

impl Default for BucketNames {
    fn default() -> Self {
        Self {
            modules: "terrarium-modules".into(),
            providers: "terrarium-providers".into(),
        }
    }
}

/// Top level registry configuration.
///
/// ```toml
/// listen = "0.0.0.0:3001"
/// chunk-size = 65536
/// traversal = "memoized"
/// storage = { local = { path = "/var/lib/registry" } }
///
/// [table-names]
/// modules = "modules"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RegistryConfig {
    /// Address for the HTTP server.
    pub listen: SocketAddr,

    /// Size of each streamed download chunk, in bytes.
    pub chunk_size: usize,

    /// How dependency graphs are walked.
    pub traversal: Traversal,

    /// Record a release whenever a module version is published.
    pub release_notifications: bool,

    /// Blob store engine.
    pub storage: StorageConfig,

    /// Table store engine.
    pub tables: TablesConfig,

    /// Table names.
    pub table_names: TableNames,

    /// Bucket names.
    pub bucket_names: BucketNames,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 3001)),
            chunk_size: DEFAULT_CHUNK_SIZE,
            traversal: Traversal::default(),
            release_notifications: true,
            storage: StorageConfig::default(),
            tables: TablesConfig::default(),
            table_names: TableNames::default(),
            bucket_names: BucketNames::default(),
        }
    }
}

impl RegistryConfig {
    /// Chunk size, never zero.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: RegistryConfig = toml_edit::de::from_str(
            r#"
            traversal = "memoized"
            release-notifications = false

            [storage.local]
            path = "/tmp/registry"

            [table-names]
            modules = "modules"
            "#,
        )
        .unwrap();

        assert_eq!(config.traversal, Traversal::Memoized);
        assert!(!config.release_notifications);
        assert_eq!(config.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(config.table_names.modules, "modules");
        assert_eq!(
            config.table_names.module_versions,
            TableNames::default().module_versions
        );
        assert_eq!(
            config.storage,
            StorageConfig::Local {
                path: "/tmp/registry".into()
            }
        );
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        let config = RegistryConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert_eq!(config.chunk_size(), 1);
    }
}
