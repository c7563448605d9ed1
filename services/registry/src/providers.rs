//! Terraform provider registry protocol endpoints

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::RegistryResult;
use crate::gateway::Gateway;
use crate::messages::{
    PlatformMetadata, ProviderArtifact, ProviderVersionItem, VersionDataRequest,
    VersionedProvider,
};

/// Router for provider operations, mounted under `/providers/v1`
pub fn router() -> Router<Gateway> {
    Router::new()
        .route("/{org}/{name}/versions", get(list_versions))
        .route(
            "/{org}/{name}/{version}/download/{os}/{arch}",
            get(find_package),
        )
        .route("/{org}/{name}/{version}/{os}/{arch}/archive", get(archive))
        .route("/{org}/{name}/{version}/SHA256SUMS", get(shasums))
        .route("/{org}/{name}/{version}/SHA256SUMS.sig", get(shasums_signature))
}

#[derive(Debug, Deserialize)]
struct ProviderAddress {
    org: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct VersionAddress {
    org: String,
    name: String,
    version: String,
}

impl From<VersionAddress> for VersionedProvider {
    fn from(address: VersionAddress) -> Self {
        VersionedProvider::new(format!("{}/{}", address.org, address.name), address.version)
    }
}

#[derive(Debug, Deserialize)]
struct PlatformAddress {
    org: String,
    name: String,
    version: String,
    os: String,
    arch: String,
}

#[derive(Debug, Serialize)]
struct ProviderVersionsResponse {
    versions: Vec<ProviderVersionItem>,
}

/// List the published versions of a provider
async fn list_versions(
    State(gateway): State<Gateway>,
    Path(address): Path<ProviderAddress>,
) -> RegistryResult<Json<ProviderVersionsResponse>> {
    let name = format!("{}/{}", address.org, address.name);
    let versions = gateway.list_provider_versions(&name).await?;
    Ok(Json(ProviderVersionsResponse { versions }))
}

/// Download metadata for one platform build
async fn find_package(
    State(gateway): State<Gateway>,
    Path(address): Path<PlatformAddress>,
) -> RegistryResult<Json<PlatformMetadata>> {
    let metadata = gateway
        .get_version_data(VersionDataRequest {
            name: format!("{}/{}", address.org, address.name),
            version: address.version,
            os: address.os,
            arch: address.arch,
        })
        .await?;
    Ok(Json(metadata))
}

async fn stream_artifact(
    gateway: Gateway,
    artifact: ProviderArtifact,
    content_type: &'static str,
) -> RegistryResult<Response> {
    let chunks = gateway.download_provider_artifact(artifact).await?;
    let body = Body::from_stream(chunks.map(|chunk| chunk.map(|chunk| chunk.data)));

    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

/// Stream a provider binary
async fn archive(
    State(gateway): State<Gateway>,
    Path(address): Path<PlatformAddress>,
) -> RegistryResult<Response> {
    let provider = VersionedProvider::new(
        format!("{}/{}", address.org, address.name),
        address.version,
    );
    let artifact = ProviderArtifact::binary(provider, address.os, address.arch);
    stream_artifact(gateway, artifact, "application/zip").await
}

/// Stream the checksums file
async fn shasums(
    State(gateway): State<Gateway>,
    Path(address): Path<VersionAddress>,
) -> RegistryResult<Response> {
    let artifact = ProviderArtifact::shasums(address.into());
    stream_artifact(gateway, artifact, "text/plain").await
}

/// Stream the detached signature of the checksums file
async fn shasums_signature(
    State(gateway): State<Gateway>,
    Path(address): Path<VersionAddress>,
) -> RegistryResult<Response> {
    let artifact = ProviderArtifact::shasums_signature(address.into());
    stream_artifact(gateway, artifact, "application/octet-stream").await
}
