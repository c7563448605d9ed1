//! Dependency registration and the transitive dependency resolver.
//!
//! The resolver walks the module graph breadth first from a root version.
//! Each visited node costs two point reads (module edges and container
//! images) and produces one streamed message.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tables::{Key, TableSchema, Tables};

use crate::error::{RegistryError, RegistryResult};
use crate::messages::{
    Ack, ContainerDependencies, ContainerDependenciesResponse, ModuleDependenciesResponse,
    RegisterContainerDependenciesRequest, RegisterModuleDependenciesRequest, VersionedModule,
};
use crate::rows::{ensure_table, failed, from_item, to_item};
use crate::rpc::{DependencyManager, ResponseStream, server_stream};

/// How the resolver treats nodes it has already visited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Traversal {
    /// Re-visit a node every time it is reached. Shared dependencies are
    /// reported once per path and a cyclic graph never ends the stream.
    #[default]
    Naive,

    /// Visit each module version at most once.
    Memoized,
}

/// The pending nodes of one traversal.
#[derive(Debug)]
struct Frontier {
    pending: VecDeque<VersionedModule>,
    visited: Option<HashSet<VersionedModule>>,
}

impl Frontier {
    fn new(root: VersionedModule, traversal: Traversal) -> Self {
        Self {
            pending: VecDeque::from([root]),
            visited: match traversal {
                Traversal::Naive => None,
                Traversal::Memoized => Some(HashSet::new()),
            },
        }
    }

    fn next(&mut self) -> Option<VersionedModule> {
        while let Some(module) = self.pending.pop_front() {
            if let Some(visited) = &mut self.visited {
                if !visited.insert(module.clone()) {
                    continue;
                }
            }
            return Some(module);
        }
        None
    }

    fn extend(&mut self, dependencies: impl IntoIterator<Item = VersionedModule>) {
        self.pending.extend(dependencies);
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ModuleDependenciesRow {
    name: String,
    version: String,
    #[serde(default)]
    modules: Vec<VersionedModule>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContainerDependenciesRow {
    name: String,
    version: String,
    #[serde(default)]
    images: ContainerDependencies,
}

fn dependency_key(module: &VersionedModule) -> Key {
    Key::new("name", &module.name).and("version", &module.version)
}

/// Stores dependency edges and resolves them transitively.
#[derive(Debug, Clone)]
pub struct DependencyService {
    tables: Tables,
    module_table: String,
    container_table: String,
    traversal: Traversal,
}

impl DependencyService {
    /// Keep module edges in `module_table` and container images in `container_table`.
    pub fn new(
        tables: Tables,
        module_table: impl Into<String>,
        container_table: impl Into<String>,
        traversal: Traversal,
    ) -> Self {
        Self {
            tables,
            module_table: module_table.into(),
            container_table: container_table.into(),
            traversal,
        }
    }

    /// Both dependency table layouts.
    pub fn schemas(&self) -> [TableSchema; 2] {
        [
            TableSchema::new(&self.module_table, "name").with_range_key("version"),
            TableSchema::new(&self.container_table, "name").with_range_key("version"),
        ]
    }

    /// Create both dependency tables unless they exist.
    pub async fn initialize(&self) -> RegistryResult<()> {
        for schema in self.schemas() {
            ensure_table(&self.tables, &schema).await?;
        }
        Ok(())
    }

    async fn module_edges(&self, module: &VersionedModule) -> RegistryResult<Vec<VersionedModule>> {
        let item = self
            .tables
            .get_item(&self.module_table, &dependency_key(module))
            .await
            .map_err(failed(RegistryError::Get("module dependencies")))?;
        match item {
            Some(item) => Ok(from_item::<ModuleDependenciesRow>(item, "module dependencies")?.modules),
            None => Ok(Vec::new()),
        }
    }

    async fn container_images(&self, module: &VersionedModule) -> RegistryResult<ContainerDependencies> {
        let item = self
            .tables
            .get_item(&self.container_table, &dependency_key(module))
            .await
            .map_err(failed(RegistryError::Get("container dependencies")))?;
        match item {
            Some(item) => {
                Ok(from_item::<ContainerDependenciesRow>(item, "container dependencies")?.images)
            }
            None => Ok(ContainerDependencies::new()),
        }
    }
}

#[async_trait::async_trait]
impl DependencyManager for DependencyService {
    #[tracing::instrument(skip(self, request), fields(name = %request.module.name, version = %request.module.version))]
    async fn register_module_dependencies(
        &self,
        request: RegisterModuleDependenciesRequest,
    ) -> RegistryResult<Ack> {
        let row = ModuleDependenciesRow {
            name: request.module.name,
            version: request.module.version,
            modules: request.dependencies,
        };
        self.tables
            .put_item(&self.module_table, to_item(&row, "module dependencies")?)
            .await
            .map_err(failed(RegistryError::Put("module dependencies")))?;

        tracing::info!(count = row.modules.len(), "Module dependencies registered");
        Ok(Ack::new("Module dependencies registered."))
    }

    #[tracing::instrument(skip(self, request), fields(name = %request.module.name, version = %request.module.version))]
    async fn register_container_dependencies(
        &self,
        request: RegisterContainerDependenciesRequest,
    ) -> RegistryResult<Ack> {
        let row = ContainerDependenciesRow {
            name: request.module.name,
            version: request.module.version,
            images: request.dependencies,
        };
        self.tables
            .put_item(&self.container_table, to_item(&row, "container dependencies")?)
            .await
            .map_err(failed(RegistryError::Put("container dependencies")))?;

        tracing::info!(count = row.images.len(), "Container dependencies registered");
        Ok(Ack::new("Container dependencies registered."))
    }

    #[tracing::instrument(skip(self, module), fields(name = %module.name, version = %module.version))]
    async fn get_module_dependencies(
        &self,
        module: VersionedModule,
    ) -> RegistryResult<Vec<VersionedModule>> {
        self.module_edges(&module).await
    }

    #[tracing::instrument(skip(self, module), fields(name = %module.name, version = %module.version))]
    async fn get_container_dependencies(
        &self,
        module: VersionedModule,
    ) -> RegistryResult<ContainerDependencies> {
        self.container_images(&module).await
    }

    #[tracing::instrument(skip(self, root), fields(name = %root.name, version = %root.version, traversal = ?self.traversal))]
    async fn retrieve_module_dependencies(
        &self,
        root: VersionedModule,
    ) -> RegistryResult<ResponseStream<ModuleDependenciesResponse>> {
        let service = self.clone();
        Ok(server_stream(move |sender| async move {
            let mut frontier = Frontier::new(root, service.traversal);
            while let Some(module) = frontier.next() {
                let dependencies = service.module_edges(&module).await?;
                frontier.extend(dependencies.iter().cloned());
                sender
                    .send(ModuleDependenciesResponse {
                        module,
                        dependencies,
                    })
                    .await
                    .map_err(failed(RegistryError::Send("module dependencies")))?;
            }
            Ok::<_, RegistryError>(())
        }))
    }

    #[tracing::instrument(skip(self, root), fields(name = %root.name, version = %root.version, traversal = ?self.traversal))]
    async fn retrieve_container_dependencies(
        &self,
        root: VersionedModule,
    ) -> RegistryResult<ResponseStream<ContainerDependenciesResponse>> {
        let service = self.clone();
        Ok(server_stream(move |sender| async move {
            let mut frontier = Frontier::new(root, service.traversal);
            while let Some(module) = frontier.next() {
                let (dependencies, images) = tokio::try_join!(
                    service.module_edges(&module),
                    service.container_images(&module)
                )?;
                sender
                    .send(ContainerDependenciesResponse {
                        module,
                        dependencies: images,
                    })
                    .await
                    .map_err(failed(RegistryError::Send("container dependencies")))?;
                frontier.extend(dependencies);
            }
            Ok::<_, RegistryError>(())
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use tables::MemoryTables;

    use super::*;
    use crate::messages::{ContainerImageDetails, ContainerImageRef};
    use crate::testing::{FaultyTables, TableOp};

    async fn service(traversal: Traversal) -> DependencyService {
        let service = DependencyService::new(
            MemoryTables::new().into(),
            "module-deps",
            "container-deps",
            traversal,
        );
        service.initialize().await.unwrap();
        service
    }

    fn module(name: &str) -> VersionedModule {
        VersionedModule::new(format!("acme/{name}/aws"), "1.0.0")
    }

    async fn depends(service: &DependencyService, from: &str, to: &[&str]) {
        service
            .register_module_dependencies(RegisterModuleDependenciesRequest {
                module: module(from),
                dependencies: to.iter().map(|name| module(name)).collect(),
            })
            .await
            .unwrap();
    }

    async fn uses_image(service: &DependencyService, from: &str, image: &str) {
        let details = ContainerImageDetails {
            tag: "1.25".into(),
            namespace: "library".into(),
            images: vec![ContainerImageRef {
                arch: "amd64".into(),
                image: format!("{image}:1.25"),
            }],
        };
        service
            .register_container_dependencies(RegisterContainerDependenciesRequest {
                module: module(from),
                dependencies: ContainerDependencies::from([(image.to_owned(), details)]),
            })
            .await
            .unwrap();
    }

    async fn visited(stream: ResponseStream<ContainerDependenciesResponse>) -> Vec<String> {
        stream
            .map(|message| message.unwrap().module.name)
            .collect()
            .await
    }

    #[tokio::test]
    async fn breadth_first_order() {
        let service = service(Traversal::Naive).await;
        depends(&service, "a", &["b", "c"]).await;
        depends(&service, "b", &["d"]).await;
        uses_image(&service, "c", "nginx").await;

        let stream = service
            .retrieve_container_dependencies(module("a"))
            .await
            .unwrap();
        let messages: Vec<_> = stream.map(Result::unwrap).collect().await;

        let names: Vec<_> = messages.iter().map(|m| m.module.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["acme/a/aws", "acme/b/aws", "acme/c/aws", "acme/d/aws"]
        );
        assert!(messages[0].dependencies.is_empty());
        assert!(messages[2].dependencies.contains_key("nginx"));
    }

    #[tokio::test]
    async fn missing_rows_are_leaves() {
        let service = service(Traversal::Naive).await;
        let names = visited(
            service
                .retrieve_container_dependencies(module("lonely"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(names, vec!["acme/lonely/aws"]);
        assert!(service.get_module_dependencies(module("lonely")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shared_dependency_visited_per_path() {
        let service = service(Traversal::Naive).await;
        depends(&service, "a", &["b", "c"]).await;
        depends(&service, "b", &["d"]).await;
        depends(&service, "c", &["d"]).await;

        let names = visited(
            service
                .retrieve_container_dependencies(module("a"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(names.iter().filter(|name| *name == "acme/d/aws").count(), 2);
    }

    #[tokio::test]
    async fn naive_cycle_never_ends() {
        let service = service(Traversal::Naive).await;
        depends(&service, "a", &["b"]).await;
        depends(&service, "b", &["a"]).await;

        let mut stream = service
            .retrieve_container_dependencies(module("a"))
            .await
            .unwrap();

        let first: Vec<_> = stream
            .by_ref()
            .take(50)
            .map(|message| message.unwrap().module.name)
            .collect()
            .await;
        assert_eq!(first.len(), 50);
        assert_eq!(first[0], "acme/a/aws");
        assert_eq!(first[1], "acme/b/aws");
        assert_eq!(first[2], "acme/a/aws");

        let more = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert!(matches!(more, Some(Ok(_))));
    }

    #[tokio::test]
    async fn memoized_cycle_ends() {
        let service = service(Traversal::Memoized).await;
        depends(&service, "a", &["b"]).await;
        depends(&service, "b", &["a"]).await;

        let names = visited(
            service
                .retrieve_container_dependencies(module("a"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(names, vec!["acme/a/aws", "acme/b/aws"]);
    }

    #[tokio::test]
    async fn module_dependency_stream() {
        let service = service(Traversal::Memoized).await;
        depends(&service, "a", &["b", "c"]).await;
        depends(&service, "c", &["b"]).await;

        let messages: Vec<_> = service
            .retrieve_module_dependencies(module("a"))
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect()
            .await;

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].dependencies, vec![module("b"), module("c")]);
        assert_eq!(messages[2].module, module("c"));
        assert_eq!(messages[2].dependencies, vec![module("b")]);
    }

    #[tokio::test]
    async fn registration_replaces_edges() {
        let service = service(Traversal::Naive).await;
        depends(&service, "a", &["b", "c"]).await;
        depends(&service, "a", &["d"]).await;
        assert_eq!(
            service.get_module_dependencies(module("a")).await.unwrap(),
            vec![module("d")]
        );
    }

    #[tokio::test]
    async fn read_failure_aborts_traversal() {
        let faulty = FaultyTables::new();
        let service = DependencyService::new(
            faulty.clone().into(),
            "module-deps",
            "container-deps",
            Traversal::Naive,
        );
        service.initialize().await.unwrap();
        faulty.fail(TableOp::Get);

        let messages: Vec<_> = service
            .retrieve_container_dependencies(module("a"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], Err(RegistryError::Get(_))));
    }

    #[tokio::test]
    async fn register_failure() {
        let faulty = FaultyTables::new();
        let service = DependencyService::new(
            faulty.clone().into(),
            "module-deps",
            "container-deps",
            Traversal::Naive,
        );
        service.initialize().await.unwrap();
        faulty.fail(TableOp::Put);

        assert_eq!(
            service
                .register_module_dependencies(RegisterModuleDependenciesRequest {
                    module: module("a"),
                    dependencies: vec![module("b")],
                })
                .await,
            Err(RegistryError::Put("module dependencies"))
        );
    }
}
