//! The single entry point to the registry services.
//!
//! The gateway holds no request state. Each call dials its backend through a
//! [`Connect`] implementation, invokes it once and hands back whatever the
//! backend returned. Backend errors pass through unchanged; the gateway adds
//! only [`RegistryError::BackendUnreachable`] when dialing fails.
//!
//! Streaming calls are pumped rather than handed through: uploads forward the
//! caller's chunks into a fresh backend stream while the backend call runs,
//! and downloads re-send each backend message to the caller. A failure on
//! either side stops both.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;

use crate::error::{RegistryError, RegistryResult};
use crate::messages::{
    Ack, ContainerDependenciesResponse, DataChunk, EndAction, ModuleDependenciesResponse,
    ModuleMetadata, PlatformMetadata, ProviderArtifact, ProviderMetadata, ProviderVersionItem,
    PublishTagRequest, RegisterContainerDependenciesRequest, RegisterModuleDependenciesRequest,
    RegisterModuleRequest, RegisterProviderRequest, Session, UploadAck,
    UploadProviderArtifactRequest, UploadSourceZipRequest, VersionDataRequest, VersionedModule,
    VersionedProvider,
};
use crate::rows::failed;
use crate::rpc::{
    DependencyManager, ProviderManager, ProviderStorage, Registrar, RequestStream,
    ResponseStream, SourceStorage, TagManager, VersionManager, channel, server_stream,
};

const REGISTRAR: &str = "registrar";
const VERSION_MANAGER: &str = "version manager";
const STORAGE: &str = "storage";
const DEPENDENCY_MANAGER: &str = "dependency manager";
const TAG_MANAGER: &str = "tag manager";
const PROVIDER_MANAGER: &str = "provider manager";
const PROVIDER_STORAGE: &str = "provider storage";

/// A backend connection could not be opened.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to connect to {service}: {reason}")]
pub struct DialError {
    service: &'static str,
    reason: String,
}

impl DialError {
    /// A dial failure for `service`.
    pub fn new(service: &'static str, reason: impl Into<String>) -> Self {
        Self {
            service,
            reason: reason.into(),
        }
    }

    /// The service which could not be reached.
    pub fn service(&self) -> &'static str {
        self.service
    }
}

/// Opens a connection to a backend service. Called once per gateway call.
#[async_trait::async_trait]
pub trait Connect<S: ?Sized + Send + Sync>: fmt::Debug + Send + Sync {
    /// Dial the backend.
    async fn connect(&self) -> Result<Arc<S>, DialError>;
}

/// Connects to a service running in the same process.
pub struct LocalConnector<S: ?Sized> {
    service: Arc<S>,
}

impl<S: ?Sized> fmt::Debug for LocalConnector<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalConnector").finish_non_exhaustive()
    }
}

impl<S: ?Sized + Send + Sync + 'static> LocalConnector<S> {
    /// Connect to `service`.
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    /// A shared connector to `service`, ready to put in [`Backends`].
    pub fn shared(service: Arc<S>) -> Arc<dyn Connect<S>> {
        Arc::new(Self::new(service))
    }
}

#[async_trait::async_trait]
impl<S: ?Sized + Send + Sync> Connect<S> for LocalConnector<S> {
    async fn connect(&self) -> Result<Arc<S>, DialError> {
        Ok(self.service.clone())
    }
}

/// How to reach each backend service.
#[derive(Debug, Clone)]
pub struct Backends {
    /// Module metadata.
    pub registrar: Arc<dyn Connect<dyn Registrar>>,
    /// Module version lifecycle.
    pub versions: Arc<dyn Connect<dyn VersionManager>>,
    /// Module archives.
    pub storage: Arc<dyn Connect<dyn SourceStorage>>,
    /// Dependency registration and resolution.
    pub dependencies: Arc<dyn Connect<dyn DependencyManager>>,
    /// Module tags.
    pub tags: Arc<dyn Connect<dyn TagManager>>,
    /// Provider registration and version lifecycle.
    pub providers: Arc<dyn Connect<dyn ProviderManager>>,
    /// Provider artifacts.
    pub provider_storage: Arc<dyn Connect<dyn ProviderStorage>>,
}

async fn dial<S>(connector: &dyn Connect<S>, service: &'static str) -> RegistryResult<Arc<S>>
where
    S: ?Sized + Send + Sync,
{
    connector.connect().await.map_err(|error| {
        tracing::error!(%error, "Failed to connect to {service}");
        RegistryError::BackendUnreachable(service)
    })
}

/// Log the outcome of a backend call and hand it back untouched.
fn delegated<T>(service: &'static str, result: RegistryResult<T>) -> RegistryResult<T> {
    match &result {
        Ok(_) => tracing::debug!("Done <= {service}"),
        Err(error) => tracing::warn!(%error, "Failed <= {service}"),
    }
    result
}

/// Forward every message of a backend stream to a fresh caller stream.
fn forward<T: Send + 'static>(what: &'static str, mut upstream: ResponseStream<T>) -> ResponseStream<T> {
    server_stream(move |sender| async move {
        while let Some(message) = upstream.next().await {
            sender
                .send(message?)
                .await
                .map_err(failed(RegistryError::Send(what)))?;
        }
        Ok::<_, RegistryError>(())
    })
}

/// Pump a caller's upload stream into a backend call, replying with the
/// backend's answer once both sides are done.
async fn pump_upload<T, R, F, Fut>(
    what: &'static str,
    mut inbound: RequestStream<T>,
    backend: F,
) -> RegistryResult<R>
where
    T: Send + 'static,
    F: FnOnce(RequestStream<T>) -> Fut,
    Fut: Future<Output = RegistryResult<R>>,
{
    let (sink, outbound) = channel();

    let pump = async move {
        while let Some(message) = inbound.next().await {
            let message = message.map_err(failed(RegistryError::Receive(what)))?;
            if sink.send(message).await.is_err() {
                tracing::debug!("Backend finished reading {what} early");
                break;
            }
        }
        // Closing the backend stream lets the backend reply.
        drop(sink);
        Ok::<_, RegistryError>(())
    };

    let ((), reply) = tokio::try_join!(pump, backend(outbound))?;
    Ok(reply)
}

/// The registry's public call surface.
#[derive(Debug, Clone)]
pub struct Gateway {
    backends: Arc<Backends>,
}

impl Gateway {
    /// Proxy calls to `backends`.
    pub fn new(backends: Backends) -> Self {
        Self {
            backends: Arc::new(backends),
        }
    }

    /// Register or update a module.
    #[tracing::instrument(skip_all, fields(name = %request.name))]
    pub async fn register(&self, request: RegisterModuleRequest) -> RegistryResult<Ack> {
        tracing::debug!("Register => {REGISTRAR}");
        let client = dial(&*self.backends.registrar, REGISTRAR).await?;
        delegated(REGISTRAR, client.register(request).await)
    }

    /// Metadata for one module.
    #[tracing::instrument(skip(self))]
    pub async fn get_module(&self, name: &str) -> RegistryResult<ModuleMetadata> {
        let client = dial(&*self.backends.registrar, REGISTRAR).await?;
        delegated(REGISTRAR, client.get_module(name).await)
    }

    /// Every registered module.
    #[tracing::instrument(skip(self))]
    pub async fn list_modules(&self) -> RegistryResult<Vec<ModuleMetadata>> {
        let client = dial(&*self.backends.registrar, REGISTRAR).await?;
        delegated(REGISTRAR, client.list_modules().await)
    }

    /// Replace a module's tags.
    #[tracing::instrument(skip_all, fields(name = %request.name))]
    pub async fn publish_tag(&self, request: PublishTagRequest) -> RegistryResult<Ack> {
        let client = dial(&*self.backends.tags, TAG_MANAGER).await?;
        delegated(TAG_MANAGER, client.publish_tag(request).await)
    }

    /// Start a module version.
    #[tracing::instrument(skip_all, fields(name = %module.name, version = %module.version))]
    pub async fn begin_version(&self, module: VersionedModule) -> RegistryResult<Session> {
        tracing::debug!("Begin version => {VERSION_MANAGER}");
        let client = dial(&*self.backends.versions, VERSION_MANAGER).await?;
        delegated(VERSION_MANAGER, client.begin_version(module).await)
    }

    /// Publish or discard a module version.
    #[tracing::instrument(skip_all, fields(name = %module.name, version = %module.version, action = ?action))]
    pub async fn end_version(&self, module: VersionedModule, action: EndAction) -> RegistryResult<Ack> {
        let client = dial(&*self.backends.versions, VERSION_MANAGER).await?;
        let result = match action {
            EndAction::Discard => client.abort_version(module).await,
            EndAction::Publish => client.publish_version(module).await,
        };
        delegated(VERSION_MANAGER, result)
    }

    /// Published versions of a module, ascending.
    #[tracing::instrument(skip(self))]
    pub async fn list_module_versions(&self, name: &str) -> RegistryResult<Vec<String>> {
        let client = dial(&*self.backends.versions, VERSION_MANAGER).await?;
        delegated(VERSION_MANAGER, client.list_module_versions(name).await)
    }

    /// Upload a module archive.
    #[tracing::instrument(skip_all)]
    pub async fn upload_source_zip(
        &self,
        chunks: RequestStream<UploadSourceZipRequest>,
    ) -> RegistryResult<UploadAck> {
        tracing::debug!("Upload source zip => {STORAGE}");
        let client = dial(&*self.backends.storage, STORAGE).await?;
        let result = pump_upload("source zip", chunks, |outbound| async move {
            client.upload_source_zip(outbound).await
        })
        .await;
        delegated(STORAGE, result)
    }

    /// Stream a module archive.
    #[tracing::instrument(skip_all, fields(name = %module.name, version = %module.version))]
    pub async fn download_source_zip(
        &self,
        module: VersionedModule,
    ) -> RegistryResult<ResponseStream<DataChunk>> {
        let client = dial(&*self.backends.storage, STORAGE).await?;
        let upstream = delegated(STORAGE, client.download_source_zip(module).await)?;
        Ok(forward("source zip", upstream))
    }

    /// Replace a module version's module dependencies.
    #[tracing::instrument(skip_all, fields(name = %request.module.name, version = %request.module.version))]
    pub async fn register_module_dependencies(
        &self,
        request: RegisterModuleDependenciesRequest,
    ) -> RegistryResult<Ack> {
        let client = dial(&*self.backends.dependencies, DEPENDENCY_MANAGER).await?;
        delegated(
            DEPENDENCY_MANAGER,
            client.register_module_dependencies(request).await,
        )
    }

    /// Replace a module version's container dependencies.
    #[tracing::instrument(skip_all, fields(name = %request.module.name, version = %request.module.version))]
    pub async fn register_container_dependencies(
        &self,
        request: RegisterContainerDependenciesRequest,
    ) -> RegistryResult<Ack> {
        let client = dial(&*self.backends.dependencies, DEPENDENCY_MANAGER).await?;
        delegated(
            DEPENDENCY_MANAGER,
            client.register_container_dependencies(request).await,
        )
    }

    /// Stream the transitive module dependencies of `root`.
    #[tracing::instrument(skip_all, fields(name = %root.name, version = %root.version))]
    pub async fn retrieve_module_dependencies(
        &self,
        root: VersionedModule,
    ) -> RegistryResult<ResponseStream<ModuleDependenciesResponse>> {
        let client = dial(&*self.backends.dependencies, DEPENDENCY_MANAGER).await?;
        let upstream = delegated(
            DEPENDENCY_MANAGER,
            client.retrieve_module_dependencies(root).await,
        )?;
        Ok(forward("module dependencies", upstream))
    }

    /// Stream the container images of `root` and every module it depends on.
    #[tracing::instrument(skip_all, fields(name = %root.name, version = %root.version))]
    pub async fn retrieve_container_dependencies(
        &self,
        root: VersionedModule,
    ) -> RegistryResult<ResponseStream<ContainerDependenciesResponse>> {
        let client = dial(&*self.backends.dependencies, DEPENDENCY_MANAGER).await?;
        let upstream = delegated(
            DEPENDENCY_MANAGER,
            client.retrieve_container_dependencies(root).await,
        )?;
        Ok(forward("container dependencies", upstream))
    }

    /// Register or update a provider version.
    #[tracing::instrument(skip_all, fields(name = %request.name, version = %request.version))]
    pub async fn register_provider(&self, request: RegisterProviderRequest) -> RegistryResult<Ack> {
        let client = dial(&*self.backends.providers, PROVIDER_MANAGER).await?;
        delegated(PROVIDER_MANAGER, client.register(request).await)
    }

    /// Publish or discard a provider version.
    #[tracing::instrument(skip_all, fields(name = %provider.name, version = %provider.version, action = ?action))]
    pub async fn end_provider_version(
        &self,
        provider: VersionedProvider,
        action: EndAction,
    ) -> RegistryResult<Ack> {
        let client = dial(&*self.backends.providers, PROVIDER_MANAGER).await?;
        let result = match action {
            EndAction::Discard => client.abort_version(provider).await,
            EndAction::Publish => client.publish_version(provider).await,
        };
        delegated(PROVIDER_MANAGER, result)
    }

    /// Published versions of a provider, ascending.
    #[tracing::instrument(skip(self))]
    pub async fn list_provider_versions(&self, name: &str) -> RegistryResult<Vec<ProviderVersionItem>> {
        let client = dial(&*self.backends.providers, PROVIDER_MANAGER).await?;
        delegated(PROVIDER_MANAGER, client.list_provider_versions(name).await)
    }

    /// Download metadata for one platform build.
    #[tracing::instrument(skip_all, fields(name = %request.name, version = %request.version, os = %request.os, arch = %request.arch))]
    pub async fn get_version_data(&self, request: VersionDataRequest) -> RegistryResult<PlatformMetadata> {
        let client = dial(&*self.backends.providers, PROVIDER_MANAGER).await?;
        delegated(PROVIDER_MANAGER, client.get_version_data(request).await)
    }

    /// Every provider, once per name.
    #[tracing::instrument(skip(self))]
    pub async fn list_providers(&self) -> RegistryResult<Vec<ProviderMetadata>> {
        let client = dial(&*self.backends.providers, PROVIDER_MANAGER).await?;
        delegated(PROVIDER_MANAGER, client.list_providers().await)
    }

    /// Metadata for one provider.
    #[tracing::instrument(skip(self))]
    pub async fn get_provider(&self, name: &str) -> RegistryResult<ProviderMetadata> {
        let client = dial(&*self.backends.providers, PROVIDER_MANAGER).await?;
        delegated(PROVIDER_MANAGER, client.get_provider(name).await)
    }

    /// Upload a provider binary or checksum file.
    #[tracing::instrument(skip_all)]
    pub async fn upload_provider_artifact(
        &self,
        chunks: RequestStream<UploadProviderArtifactRequest>,
    ) -> RegistryResult<UploadAck> {
        let client = dial(&*self.backends.provider_storage, PROVIDER_STORAGE).await?;
        let result = pump_upload("provider artifact", chunks, |outbound| async move {
            client.upload_artifact(outbound).await
        })
        .await;
        delegated(PROVIDER_STORAGE, result)
    }

    /// Stream a provider binary or checksum file.
    #[tracing::instrument(skip_all, fields(name = %artifact.provider.name, version = %artifact.provider.version))]
    pub async fn download_provider_artifact(
        &self,
        artifact: ProviderArtifact,
    ) -> RegistryResult<ResponseStream<DataChunk>> {
        let client = dial(&*self.backends.provider_storage, PROVIDER_STORAGE).await?;
        let upstream = delegated(PROVIDER_STORAGE, client.download_artifact(artifact).await)?;
        Ok(forward("provider artifact", upstream))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::messages::ContainerDependencies;
    use crate::rpc::request_stream;

    /// A backend which answers every unary call with the same error, and
    /// counts upload chunks until `stop_after` of them have arrived.
    #[derive(Debug)]
    struct Stub {
        error: RegistryError,
        stop_after: Option<usize>,
        received: Mutex<Vec<Bytes>>,
    }

    impl Stub {
        fn failing(error: RegistryError) -> Arc<Self> {
            Arc::new(Self {
                error,
                stop_after: None,
                received: Mutex::default(),
            })
        }

        fn stopping_after(count: usize) -> Arc<Self> {
            Arc::new(Self {
                error: RegistryError::Cancelled,
                stop_after: Some(count),
                received: Mutex::default(),
            })
        }

        fn fail<T>(&self) -> RegistryResult<T> {
            Err(self.error.clone())
        }
    }

    #[async_trait::async_trait]
    impl Registrar for Stub {
        async fn register(&self, _: RegisterModuleRequest) -> RegistryResult<Ack> {
            self.fail()
        }
        async fn get_module(&self, _: &str) -> RegistryResult<ModuleMetadata> {
            self.fail()
        }
        async fn list_modules(&self) -> RegistryResult<Vec<ModuleMetadata>> {
            self.fail()
        }
    }

    #[async_trait::async_trait]
    impl VersionManager for Stub {
        async fn begin_version(&self, _: VersionedModule) -> RegistryResult<Session> {
            self.fail()
        }
        async fn abort_version(&self, _: VersionedModule) -> RegistryResult<Ack> {
            self.fail()
        }
        async fn publish_version(&self, _: VersionedModule) -> RegistryResult<Ack> {
            self.fail()
        }
        async fn list_module_versions(&self, _: &str) -> RegistryResult<Vec<String>> {
            self.fail()
        }
    }

    #[async_trait::async_trait]
    impl SourceStorage for Stub {
        async fn upload_source_zip(
            &self,
            mut chunks: RequestStream<UploadSourceZipRequest>,
        ) -> RegistryResult<UploadAck> {
            let mut size = 0;
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                size += chunk.zip_data_chunk.len() as u64;
                self.received.lock().unwrap().push(chunk.zip_data_chunk);
                if Some(self.received.lock().unwrap().len()) == self.stop_after {
                    break;
                }
            }
            Ok(UploadAck {
                message: "stored".into(),
                size,
                sha256: String::new(),
            })
        }

        async fn download_source_zip(
            &self,
            _: VersionedModule,
        ) -> RegistryResult<ResponseStream<DataChunk>> {
            let error = self.error.clone();
            Ok(server_stream(move |sender| async move {
                sender
                    .send(DataChunk {
                        data: Bytes::from_static(b"PK"),
                    })
                    .await
                    .map_err(|_| RegistryError::Send("chunk"))?;
                Err::<(), _>(error)
            }))
        }
    }

    #[async_trait::async_trait]
    impl DependencyManager for Stub {
        async fn register_module_dependencies(
            &self,
            _: RegisterModuleDependenciesRequest,
        ) -> RegistryResult<Ack> {
            self.fail()
        }
        async fn register_container_dependencies(
            &self,
            _: RegisterContainerDependenciesRequest,
        ) -> RegistryResult<Ack> {
            self.fail()
        }
        async fn get_module_dependencies(
            &self,
            _: VersionedModule,
        ) -> RegistryResult<Vec<VersionedModule>> {
            self.fail()
        }
        async fn get_container_dependencies(
            &self,
            _: VersionedModule,
        ) -> RegistryResult<ContainerDependencies> {
            self.fail()
        }
        async fn retrieve_module_dependencies(
            &self,
            _: VersionedModule,
        ) -> RegistryResult<ResponseStream<ModuleDependenciesResponse>> {
            self.fail()
        }
        async fn retrieve_container_dependencies(
            &self,
            _: VersionedModule,
        ) -> RegistryResult<ResponseStream<ContainerDependenciesResponse>> {
            self.fail()
        }
    }

    #[async_trait::async_trait]
    impl TagManager for Stub {
        async fn publish_tag(&self, _: PublishTagRequest) -> RegistryResult<Ack> {
            self.fail()
        }
    }

    #[async_trait::async_trait]
    impl ProviderManager for Stub {
        async fn register(&self, _: RegisterProviderRequest) -> RegistryResult<Ack> {
            self.fail()
        }
        async fn abort_version(&self, _: VersionedProvider) -> RegistryResult<Ack> {
            self.fail()
        }
        async fn publish_version(&self, _: VersionedProvider) -> RegistryResult<Ack> {
            self.fail()
        }
        async fn list_provider_versions(&self, _: &str) -> RegistryResult<Vec<ProviderVersionItem>> {
            self.fail()
        }
        async fn get_version_data(&self, _: VersionDataRequest) -> RegistryResult<PlatformMetadata> {
            self.fail()
        }
        async fn list_providers(&self) -> RegistryResult<Vec<ProviderMetadata>> {
            self.fail()
        }
        async fn get_provider(&self, _: &str) -> RegistryResult<ProviderMetadata> {
            self.fail()
        }
    }

    #[async_trait::async_trait]
    impl ProviderStorage for Stub {
        async fn upload_artifact(
            &self,
            _: RequestStream<UploadProviderArtifactRequest>,
        ) -> RegistryResult<UploadAck> {
            self.fail()
        }
        async fn download_artifact(
            &self,
            _: ProviderArtifact,
        ) -> RegistryResult<ResponseStream<DataChunk>> {
            self.fail()
        }
    }

    fn gateway(stub: Arc<Stub>) -> Gateway {
        Gateway::new(Backends {
            registrar: LocalConnector::<dyn Registrar>::shared(stub.clone()),
            versions: LocalConnector::<dyn VersionManager>::shared(stub.clone()),
            storage: LocalConnector::<dyn SourceStorage>::shared(stub.clone()),
            dependencies: LocalConnector::<dyn DependencyManager>::shared(stub.clone()),
            tags: LocalConnector::<dyn TagManager>::shared(stub.clone()),
            providers: LocalConnector::<dyn ProviderManager>::shared(stub.clone()),
            provider_storage: LocalConnector::<dyn ProviderStorage>::shared(stub),
        })
    }

    #[derive(Debug)]
    struct Unreachable;

    #[async_trait::async_trait]
    impl<S: ?Sized + Send + Sync> Connect<S> for Unreachable {
        async fn connect(&self) -> Result<Arc<S>, DialError> {
            Err(DialError::new("test", "connection refused"))
        }
    }

    fn module() -> VersionedModule {
        VersionedModule::new("acme/vpc/aws", "1.0.0")
    }

    fn chunks(count: usize) -> Vec<UploadSourceZipRequest> {
        (0..count)
            .map(|index| UploadSourceZipRequest {
                module: (index == 0).then(module),
                zip_data_chunk: Bytes::from(vec![index as u8; 3]),
            })
            .collect()
    }

    #[tokio::test]
    async fn unary_errors_pass_through_unchanged() {
        for error in [
            RegistryError::Create("module version"),
            RegistryError::NotFound("module acme/vpc/aws".into()),
            RegistryError::InvalidArgument("bad".into()),
            RegistryError::Publish("module version"),
        ] {
            let gateway = gateway(Stub::failing(error.clone()));
            let provider = VersionedProvider::new("acme/widget", "1.0.0");
            let results = [
                gateway.begin_version(module()).await.map(|_| ()),
                gateway.end_version(module(), EndAction::Publish).await.map(|_| ()),
                gateway.end_version(module(), EndAction::Discard).await.map(|_| ()),
                gateway.list_module_versions("acme/vpc/aws").await.map(|_| ()),
                gateway.get_module("acme/vpc/aws").await.map(|_| ()),
                gateway.list_modules().await.map(|_| ()),
                gateway
                    .publish_tag(PublishTagRequest {
                        name: "acme/vpc/aws".into(),
                        tags: vec![],
                    })
                    .await
                    .map(|_| ()),
                gateway
                    .register_module_dependencies(RegisterModuleDependenciesRequest {
                        module: module(),
                        dependencies: vec![],
                    })
                    .await
                    .map(|_| ()),
                gateway
                    .retrieve_module_dependencies(module())
                    .await
                    .map(|_| ()),
                gateway
                    .end_provider_version(provider.clone(), EndAction::Publish)
                    .await
                    .map(|_| ()),
                gateway.get_provider("acme/widget").await.map(|_| ()),
                gateway
                    .download_provider_artifact(ProviderArtifact::shasums(provider))
                    .await
                    .map(|_| ()),
            ];
            for result in results {
                assert_eq!(result, Err(error.clone()));
            }
        }
    }

    #[tokio::test]
    async fn dial_failure_is_backend_unreachable() {
        let stub = Stub::failing(RegistryError::Cancelled);
        let mut backends = gateway(stub).backends.as_ref().clone();
        backends.versions = Arc::new(Unreachable);
        backends.storage = Arc::new(Unreachable);
        let gateway = Gateway::new(backends);

        assert_eq!(
            gateway.begin_version(module()).await,
            Err(RegistryError::BackendUnreachable("version manager"))
        );
        assert_eq!(
            gateway
                .upload_source_zip(request_stream(chunks(2)))
                .await,
            Err(RegistryError::BackendUnreachable("storage"))
        );
    }

    #[tokio::test]
    async fn upload_replies_after_backend_closes() {
        let stub = Stub::failing(RegistryError::Cancelled);
        let gateway = gateway(stub.clone());

        let ack = gateway
            .upload_source_zip(request_stream(chunks(40)))
            .await
            .unwrap();
        assert_eq!(ack.size, 120);
        let received = stub.received.lock().unwrap();
        assert_eq!(received.len(), 40);
        assert_eq!(received[7], Bytes::from(vec![7u8; 3]));
    }

    #[tokio::test]
    async fn upload_completes_when_backend_stops_reading() {
        let stub = Stub::stopping_after(2);
        let gateway = gateway(stub.clone());

        let (sender, inbound) = channel();
        let producer = tokio::spawn(async move {
            let mut sent = 0;
            for chunk in chunks(1000) {
                if sender.send(chunk).await.is_err() {
                    break;
                }
                sent += 1;
            }
            sent
        });

        let ack = tokio::time::timeout(Duration::from_secs(5), gateway.upload_source_zip(inbound))
            .await
            .expect("upload should not hang")
            .unwrap();
        assert_eq!(ack.size, 6);
        assert!(producer.await.unwrap() < 1000);
    }

    #[tokio::test]
    async fn upload_receive_failure_is_terminal() {
        let stub = Stub::failing(RegistryError::Cancelled);
        let gateway = gateway(stub.clone());

        let (sender, inbound) = channel();
        sender.send(chunks(1).remove(0)).await.unwrap();
        sender.fail(RegistryError::Cancelled).await.unwrap();
        drop(sender);

        assert_eq!(
            gateway.upload_source_zip(inbound).await,
            Err(RegistryError::Receive("source zip"))
        );
    }

    #[tokio::test]
    async fn download_forwards_messages_then_error() {
        let gateway = gateway(Stub::failing(RegistryError::ContentLength {
            expected: 4,
            actual: 2,
        }));

        let items: Vec<_> = gateway
            .download_source_zip(module())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            items,
            vec![
                Ok(DataChunk {
                    data: Bytes::from_static(b"PK")
                }),
                Err(RegistryError::ContentLength {
                    expected: 4,
                    actual: 2
                }),
            ]
        );
    }
}
