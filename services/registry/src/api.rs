//! Registry assembly and the top level router

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use serde_json::json;
use storage::Storage;
use tables::Tables;

use crate::config::RegistryConfig;
use crate::dependency::DependencyService;
use crate::error::{RegistryError, RegistryResult};
use crate::gateway::{Backends, Gateway, LocalConnector};
use crate::provider_manager::ProviderVersionManager;
use crate::registrar::ModuleRegistrar;
use crate::release::{NoopReleasePublisher, ReleasePublisher, TableReleasePublisher};
use crate::rows::failed;
use crate::rpc::{
    DependencyManager, ProviderManager, ProviderStorage, Registrar, SourceStorage, TagManager,
    VersionManager,
};
use crate::tags::ModuleTagManager;
use crate::transfer::{ProviderStorageService, SourceStorageService};
use crate::version_manager::ModuleVersionManager;

/// Registry builder for configuring and creating every registry service
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    config: RegistryConfig,
    storage: Option<Storage>,
    tables: Option<Tables>,
    releases: Option<Arc<dyn ReleasePublisher>>,
}

impl RegistryBuilder {
    /// Create a new registry builder with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this blob store instead of the configured one
    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Use this table store instead of the configured one
    pub fn tables(mut self, tables: Tables) -> Self {
        self.tables = Some(tables);
        self
    }

    /// Send release notifications here instead of the releases table
    pub fn releases(mut self, releases: Arc<dyn ReleasePublisher>) -> Self {
        self.releases = Some(releases);
        self
    }

    /// Build every service and wire the gateway to them
    ///
    /// Stores are not touched until [`Registry::initialize`] is called.
    pub async fn build(self) -> RegistryResult<Registry> {
        let config = self.config;
        let storage = match self.storage {
            Some(storage) => storage,
            None => config
                .storage
                .clone()
                .build()
                .await
                .map_err(failed(RegistryError::BucketInitialization(
                    config.bucket_names.modules.clone(),
                )))?,
        };
        let tables = self
            .tables
            .unwrap_or_else(|| config.tables.clone().build());
        let names = &config.table_names;

        let release_table = (config.release_notifications && self.releases.is_none())
            .then(|| TableReleasePublisher::new(tables.clone(), &names.releases));
        let releases: Arc<dyn ReleasePublisher> = match (self.releases, &release_table) {
            (Some(releases), _) => releases,
            (None, Some(table)) => Arc::new(table.clone()),
            (None, None) => Arc::new(NoopReleasePublisher),
        };

        let services = Services {
            registrar: Arc::new(ModuleRegistrar::new(tables.clone(), &names.modules)),
            versions: Arc::new(ModuleVersionManager::new(
                tables.clone(),
                &names.module_versions,
                releases,
            )),
            storage: Arc::new(SourceStorageService::new(
                storage.clone(),
                &config.bucket_names.modules,
                config.chunk_size(),
            )),
            dependencies: Arc::new(DependencyService::new(
                tables.clone(),
                &names.module_dependencies,
                &names.container_dependencies,
                config.traversal,
            )),
            tags: Arc::new(ModuleTagManager::new(tables.clone(), &names.tags)),
            providers: Arc::new(ProviderVersionManager::new(tables, &names.providers)),
            provider_storage: Arc::new(ProviderStorageService::new(
                storage,
                &config.bucket_names.providers,
                config.chunk_size(),
            )),
            releases: release_table,
        };

        let gateway = Gateway::new(services.backends());
        Ok(Registry { services, gateway })
    }
}

#[derive(Debug)]
struct Services {
    registrar: Arc<ModuleRegistrar>,
    versions: Arc<ModuleVersionManager>,
    storage: Arc<SourceStorageService>,
    dependencies: Arc<DependencyService>,
    tags: Arc<ModuleTagManager>,
    providers: Arc<ProviderVersionManager>,
    provider_storage: Arc<ProviderStorageService>,
    releases: Option<TableReleasePublisher>,
}

impl Services {
    fn backends(&self) -> Backends {
        Backends {
            registrar: LocalConnector::<dyn Registrar>::shared(self.registrar.clone()),
            versions: LocalConnector::<dyn VersionManager>::shared(self.versions.clone()),
            storage: LocalConnector::<dyn SourceStorage>::shared(self.storage.clone()),
            dependencies: LocalConnector::<dyn DependencyManager>::shared(
                self.dependencies.clone(),
            ),
            tags: LocalConnector::<dyn TagManager>::shared(self.tags.clone()),
            providers: LocalConnector::<dyn ProviderManager>::shared(self.providers.clone()),
            provider_storage: LocalConnector::<dyn ProviderStorage>::shared(
                self.provider_storage.clone(),
            ),
        }
    }
}

/// Every registry service behind one gateway
#[derive(Debug)]
pub struct Registry {
    services: Services,
    gateway: Gateway,
}

impl Registry {
    /// Create every backing table and bucket which does not exist yet
    ///
    /// Any failure here should stop the server from starting.
    #[tracing::instrument(skip(self))]
    pub async fn initialize(&self) -> RegistryResult<()> {
        let services = &self.services;
        services.registrar.initialize().await?;
        services.versions.initialize().await?;
        services.dependencies.initialize().await?;
        services.tags.initialize().await?;
        services.providers.initialize().await?;
        if let Some(releases) = &services.releases {
            releases.initialize().await?;
        }
        services.storage.initialize().await?;
        services.provider_storage.initialize().await?;

        tracing::info!("Registry stores initialized");
        Ok(())
    }

    /// The gateway in front of every service
    pub fn gateway(&self) -> Gateway {
        self.gateway.clone()
    }

    /// The HTTP router for the Terraform registry protocols
    ///
    /// Returns a Router that can be served with any tower-compatible server
    pub fn router(&self) -> Router {
        router(self.gateway.clone())
    }
}

/// Build the HTTP router over `gateway`
pub fn router(gateway: Gateway) -> Router {
    Router::new()
        .route("/.well-known/terraform.json", get(service_discovery))
        .route("/healthz", get(health_check))
        .nest("/modules/v1", crate::modules::router())
        .nest("/providers/v1", crate::providers::router())
        .with_state(gateway)
}

/// Terraform service discovery
async fn service_discovery() -> Json<serde_json::Value> {
    Json(json!({
        "modules.v1": "/modules/v1/",
        "providers.v1": "/providers/v1/",
    }))
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({ "code": 200, "data": "OK" })))
}
