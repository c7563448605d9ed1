//! Terraform module registry protocol endpoints

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::RegistryResult;
use crate::gateway::Gateway;
use crate::messages::VersionedModule;

/// Router for module operations, mounted under `/modules/v1`
pub fn router() -> Router<Gateway> {
    Router::new()
        .route("/{org}/{name}/{provider}/versions", get(list_versions))
        .route("/{org}/{name}/{provider}/{version}/download", get(download))
        .route("/{org}/{name}/{provider}/{version}/archive", get(archive))
}

#[derive(Debug, Deserialize)]
struct ModuleAddress {
    org: String,
    name: String,
    provider: String,
}

impl ModuleAddress {
    fn name(&self) -> String {
        format!("{}/{}/{}", self.org, self.name, self.provider)
    }
}

#[derive(Debug, Deserialize)]
struct VersionAddress {
    org: String,
    name: String,
    provider: String,
    version: String,
}

impl From<VersionAddress> for VersionedModule {
    fn from(address: VersionAddress) -> Self {
        VersionedModule::new(
            format!("{}/{}/{}", address.org, address.name, address.provider),
            address.version,
        )
    }
}

#[derive(Debug, Serialize)]
struct VersionItem {
    version: String,
}

#[derive(Debug, Serialize)]
struct ModuleVersions {
    versions: Vec<VersionItem>,
}

#[derive(Debug, Serialize)]
struct ModuleVersionsResponse {
    modules: Vec<ModuleVersions>,
}

/// List the published versions of a module
async fn list_versions(
    State(gateway): State<Gateway>,
    Path(address): Path<ModuleAddress>,
) -> RegistryResult<Json<ModuleVersionsResponse>> {
    let versions = gateway.list_module_versions(&address.name()).await?;
    Ok(Json(ModuleVersionsResponse {
        modules: vec![ModuleVersions {
            versions: versions
                .into_iter()
                .map(|version| VersionItem { version })
                .collect(),
        }],
    }))
}

/// Point the client at the archive endpoint
///
/// Existence is checked when the archive is fetched.
async fn download() -> Response {
    (
        StatusCode::NO_CONTENT,
        [("X-Terraform-Get", "./archive?archive=zip")],
    )
        .into_response()
}

/// Stream a module archive
async fn archive(
    State(gateway): State<Gateway>,
    Path(address): Path<VersionAddress>,
) -> RegistryResult<Response> {
    let chunks = gateway.download_source_zip(address.into()).await?;
    let body = Body::from_stream(chunks.map(|chunk| chunk.map(|chunk| chunk.data)));

    Ok(([(header::CONTENT_TYPE, "application/zip")], body).into_response())
}
