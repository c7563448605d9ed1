//! Service interfaces and the stream plumbing shared by servers, clients and the gateway.
//!
//! Streams carry `RegistryResult<T>` items: `None` is a clean end of stream,
//! `Some(Err(_))` is a transport failure which terminates the call.

use std::future::Future;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use crate::error::{RegistryError, RegistryResult};
use crate::messages::{
    Ack, ContainerDependencies, ContainerDependenciesResponse, DataChunk, ModuleDependenciesResponse,
    ModuleMetadata, PlatformMetadata, ProviderArtifact, ProviderMetadata, ProviderVersionItem,
    PublishTagRequest, RegisterContainerDependenciesRequest, RegisterModuleDependenciesRequest,
    RegisterModuleRequest, RegisterProviderRequest, Session, UploadAck,
    UploadProviderArtifactRequest, UploadSourceZipRequest, VersionDataRequest, VersionedModule,
    VersionedProvider,
};

/// Messages sent by a server to its caller.
pub type ResponseStream<T> = BoxStream<'static, RegistryResult<T>>;

/// Messages sent by a caller to a server.
pub type RequestStream<T> = BoxStream<'static, RegistryResult<T>>;

/// Messages buffered between a stream producer and its consumer.
const STREAM_BUFFER: usize = 16;

/// The consumer of a stream has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stream closed by receiver")]
pub struct StreamClosed;

/// The producing half of a stream.
#[derive(Debug)]
pub struct StreamSender<T> {
    tx: mpsc::Sender<RegistryResult<T>>,
}

impl<T> Clone for StreamSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> StreamSender<T> {
    /// Send one message, waiting for buffer space.
    pub async fn send(&self, message: T) -> Result<(), StreamClosed> {
        self.tx.send(Ok(message)).await.map_err(|_| StreamClosed)
    }

    /// Terminate the stream with an error.
    pub async fn fail(&self, error: RegistryError) -> Result<(), StreamClosed> {
        self.tx.send(Err(error)).await.map_err(|_| StreamClosed)
    }

    /// Whether the consumer has dropped its end.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A connected sender and stream. The stream ends once every sender is dropped.
pub fn channel<T: Send + 'static>() -> (StreamSender<T>, BoxStream<'static, RegistryResult<T>>) {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    (StreamSender { tx }, ReceiverStream::new(rx).boxed())
}

/// Run `producer` on a spawned task, streaming what it sends.
///
/// An error returned by the producer becomes the final stream item. Dropping
/// the returned stream makes the producer's next send fail.
pub fn server_stream<T, F, Fut>(producer: F) -> ResponseStream<T>
where
    T: Send + 'static,
    F: FnOnce(StreamSender<T>) -> Fut,
    Fut: Future<Output = RegistryResult<()>> + Send + 'static,
{
    let (sender, stream) = channel();
    let tail = sender.clone();
    let task = producer(sender);
    tokio::spawn(
        async move {
            if let Err(error) = task.await {
                // The consumer may already be gone.
                let _ = tail.fail(error).await;
            }
        }
        .in_current_span(),
    );
    stream
}

/// A request stream that yields `messages` and then ends.
pub fn request_stream<T: Send + 'static>(messages: Vec<T>) -> RequestStream<T> {
    futures::stream::iter(messages.into_iter().map(Ok)).boxed()
}

/// Module metadata registration.
#[async_trait::async_trait]
pub trait Registrar: Send + Sync {
    /// Create or update a module's metadata.
    async fn register(&self, request: RegisterModuleRequest) -> RegistryResult<Ack>;

    /// Metadata for one module.
    async fn get_module(&self, name: &str) -> RegistryResult<ModuleMetadata>;

    /// Metadata for every registered module.
    async fn list_modules(&self) -> RegistryResult<Vec<ModuleMetadata>>;
}

/// Module version lifecycle: begin, then publish or abort.
#[async_trait::async_trait]
pub trait VersionManager: Send + Sync {
    /// Record an in-flight version.
    async fn begin_version(&self, module: VersionedModule) -> RegistryResult<Session>;

    /// Discard a version.
    async fn abort_version(&self, module: VersionedModule) -> RegistryResult<Ack>;

    /// Mark a version as published.
    async fn publish_version(&self, module: VersionedModule) -> RegistryResult<Ack>;

    /// Published versions of a module, ascending by semantic version.
    async fn list_module_versions(&self, name: &str) -> RegistryResult<Vec<String>>;
}

/// Provider registration and version lifecycle.
#[async_trait::async_trait]
pub trait ProviderManager: Send + Sync {
    /// Create or update a provider version.
    async fn register(&self, request: RegisterProviderRequest) -> RegistryResult<Ack>;

    /// Discard a provider version.
    async fn abort_version(&self, provider: VersionedProvider) -> RegistryResult<Ack>;

    /// Mark a provider version as published.
    async fn publish_version(&self, provider: VersionedProvider) -> RegistryResult<Ack>;

    /// Published versions of a provider, ascending by semantic version.
    async fn list_provider_versions(&self, name: &str) -> RegistryResult<Vec<ProviderVersionItem>>;

    /// Download metadata for one platform build of a provider version.
    async fn get_version_data(&self, request: VersionDataRequest) -> RegistryResult<PlatformMetadata>;

    /// Every provider, once per name.
    async fn list_providers(&self) -> RegistryResult<Vec<ProviderMetadata>>;

    /// Metadata for one provider.
    async fn get_provider(&self, name: &str) -> RegistryResult<ProviderMetadata>;
}

/// Module archive storage.
#[async_trait::async_trait]
pub trait SourceStorage: Send + Sync {
    /// Store the archive carried by a chunk stream.
    async fn upload_source_zip(
        &self,
        chunks: RequestStream<UploadSourceZipRequest>,
    ) -> RegistryResult<UploadAck>;

    /// Stream a stored archive back in chunks.
    async fn download_source_zip(
        &self,
        module: VersionedModule,
    ) -> RegistryResult<ResponseStream<DataChunk>>;
}

/// Provider artifact storage.
#[async_trait::async_trait]
pub trait ProviderStorage: Send + Sync {
    /// Store the artifact carried by a chunk stream.
    async fn upload_artifact(
        &self,
        chunks: RequestStream<UploadProviderArtifactRequest>,
    ) -> RegistryResult<UploadAck>;

    /// Stream a stored artifact back in chunks.
    async fn download_artifact(
        &self,
        artifact: ProviderArtifact,
    ) -> RegistryResult<ResponseStream<DataChunk>>;
}

/// Dependency registration and transitive resolution.
#[async_trait::async_trait]
pub trait DependencyManager: Send + Sync {
    /// Replace the direct module dependencies of a module version.
    async fn register_module_dependencies(
        &self,
        request: RegisterModuleDependenciesRequest,
    ) -> RegistryResult<Ack>;

    /// Replace the container dependencies of a module version.
    async fn register_container_dependencies(
        &self,
        request: RegisterContainerDependenciesRequest,
    ) -> RegistryResult<Ack>;

    /// Direct module dependencies of a module version.
    async fn get_module_dependencies(
        &self,
        module: VersionedModule,
    ) -> RegistryResult<Vec<VersionedModule>>;

    /// Direct container dependencies of a module version.
    async fn get_container_dependencies(
        &self,
        module: VersionedModule,
    ) -> RegistryResult<ContainerDependencies>;

    /// Walk the module graph from `root`, one message per visited node.
    async fn retrieve_module_dependencies(
        &self,
        root: VersionedModule,
    ) -> RegistryResult<ResponseStream<ModuleDependenciesResponse>>;

    /// Walk the module graph from `root`, reporting each node's container images.
    async fn retrieve_container_dependencies(
        &self,
        root: VersionedModule,
    ) -> RegistryResult<ResponseStream<ContainerDependenciesResponse>>;
}

/// Module tagging.
#[async_trait::async_trait]
pub trait TagManager: Send + Sync {
    /// Replace the tags of a module.
    async fn publish_tag(&self, request: PublishTagRequest) -> RegistryResult<Ack>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn producer_error_ends_stream() {
        let stream = server_stream(|sender| async move {
            sender.send(1).await.map_err(|_| RegistryError::Send("number"))?;
            Err::<(), _>(RegistryError::Get("number"))
        });

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items, vec![Ok(1), Err(RegistryError::Get("number"))]);
    }

    #[tokio::test]
    async fn dropped_consumer_stops_producer() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let mut stream = server_stream(|sender| async move {
            let mut sent = 0u64;
            let result = loop {
                if sender.send(sent).await.is_err() {
                    break Err(RegistryError::Send("number"));
                }
                sent += 1;
            };
            let _ = done_tx.send(sent);
            result
        });

        assert_eq!(stream.next().await, Some(Ok(0)));
        drop(stream);

        let sent = done_rx.await.unwrap();
        assert!(sent >= 1);
    }

    #[tokio::test]
    async fn channel_ends_when_senders_drop() {
        let (sender, stream) = channel();
        let task = tokio::spawn(async move {
            sender.send("a").await.unwrap();
            sender.send("b").await.unwrap();
        });
        let items: Vec<_> = stream.collect().await;
        task.await.unwrap();
        assert_eq!(items, vec![Ok("a"), Ok("b")]);
    }
}
