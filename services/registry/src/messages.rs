//! Request, response and record types exchanged between the registry services.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};

/// Development stage of a module or provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Maturity {
    /// An idea, nothing built yet.
    #[default]
    Idea,
    /// Being designed.
    Planning,
    /// Under active development.
    Developing,
    /// Early testing.
    Alpha,
    /// Feature complete, still settling.
    Beta,
    /// Ready for production use.
    Stable,
    /// Superseded; avoid for new work.
    Deprecated,
    /// No longer maintained.
    EndOfLife,
}

impl Maturity {
    /// The stored name of this maturity level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Maturity::Idea => "IDEA",
            Maturity::Planning => "PLANNING",
            Maturity::Developing => "DEVELOPING",
            Maturity::Alpha => "ALPHA",
            Maturity::Beta => "BETA",
            Maturity::Stable => "STABLE",
            Maturity::Deprecated => "DEPRECATED",
            Maturity::EndOfLife => "END_OF_LIFE",
        }
    }

    /// Decode a stored name. Unknown names decode as [`Maturity::Idea`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "PLANNING" => Maturity::Planning,
            "DEVELOPING" => Maturity::Developing,
            "ALPHA" => Maturity::Alpha,
            "BETA" => Maturity::Beta,
            "STABLE" => Maturity::Stable,
            "DEPRECATED" => Maturity::Deprecated,
            "END_OF_LIFE" => Maturity::EndOfLife,
            _ => Maturity::Idea,
        }
    }
}

impl fmt::Display for Maturity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a slash separated address into exactly `N` non-empty segments.
pub(crate) fn split_address<'a, const N: usize>(
    kind: &str,
    address: &'a str,
) -> RegistryResult<[&'a str; N]> {
    let segments: Vec<&str> = address.split('/').collect();
    segments
        .try_into()
        .ok()
        .filter(|segments: &[&str; N]| segments.iter().all(|segment| !segment.is_empty()))
        .ok_or_else(|| {
            RegistryError::InvalidArgument(format!(
                "{kind} address {address:?} must have {N} non-empty segments"
            ))
        })
}

/// A module version: `organization/name/provider` plus a version string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionedModule {
    /// Module address, `<organization>/<name>/<provider>`.
    pub name: String,
    /// Version string as submitted.
    pub version: String,
}

impl VersionedModule {
    /// Create a module version reference.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// The first address segment, or the whole name when it has no slash.
    pub fn organization(&self) -> &str {
        organization(&self.name)
    }
}

impl fmt::Display for VersionedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

pub(crate) fn organization(name: &str) -> &str {
    name.split('/').next().unwrap_or(name)
}

/// Plain acknowledgement carrying a human readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// What happened.
    pub message: String,
}

impl Ack {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Returned by `begin_version`; identifies the in-flight version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Identifies the in-flight version, `<name>@<version>`.
    pub key: String,
    /// What happened.
    pub message: String,
}

/// How an in-flight version ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndAction {
    /// Delete the in-flight version.
    Discard,
    /// Make the version visible to consumers.
    Publish,
}

/// Register or update a module's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterModuleRequest {
    /// Module address.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Where the module source lives.
    pub source_url: String,
    /// Development stage.
    pub maturity: Maturity,
}

/// Module metadata as presented to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    /// First address segment.
    pub organization: String,
    /// Second address segment.
    pub name: String,
    /// Third address segment, the Terraform provider the module targets.
    pub provider: String,
    /// Free-text description.
    pub description: String,
    /// Where the module source lives.
    pub source_url: String,
    /// Development stage.
    pub maturity: Maturity,
}

/// One chunk of a module archive upload. The first chunk names the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSourceZipRequest {
    /// The module version, required on the first chunk.
    pub module: Option<VersionedModule>,
    /// Archive bytes, in order.
    pub zip_data_chunk: Bytes,
}

/// One chunk of a downloaded archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    /// Payload bytes, in order.
    pub data: Bytes,
}

/// Confirms a stored upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAck {
    /// What happened.
    pub message: String,
    /// Bytes stored.
    pub size: u64,
    /// Hex SHA-256 of the stored bytes.
    pub sha256: String,
}

/// A container image for one architecture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerImageRef {
    /// CPU architecture.
    pub arch: String,
    /// Image reference for that architecture.
    pub image: String,
}

/// A container image a module version uses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ContainerImageDetails {
    /// Image tag.
    pub tag: String,
    /// Registry namespace.
    pub namespace: String,
    /// Per-architecture images.
    #[serde(default)]
    pub images: Vec<ContainerImageRef>,
}

/// Container images keyed by image name.
pub type ContainerDependencies = BTreeMap<String, ContainerImageDetails>;

/// Replace the direct module dependencies of a module version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterModuleDependenciesRequest {
    /// The depending module version.
    pub module: VersionedModule,
    /// Its direct module dependencies.
    pub dependencies: Vec<VersionedModule>,
}

/// Replace the container dependencies of a module version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterContainerDependenciesRequest {
    /// The depending module version.
    pub module: VersionedModule,
    /// Its container images, keyed by image name.
    pub dependencies: ContainerDependencies,
}

/// One node of a module dependency traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDependenciesResponse {
    /// The depending module version.
    pub module: VersionedModule,
    /// Its direct module dependencies.
    pub dependencies: Vec<VersionedModule>,
}

/// One node of a container dependency traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDependenciesResponse {
    /// The depending module version.
    pub module: VersionedModule,
    /// Its container images, keyed by image name.
    pub dependencies: ContainerDependencies,
}

/// Replace the tags of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishTagRequest {
    /// Module address.
    pub name: String,
    /// The complete new tag set.
    pub tags: Vec<String>,
}

/// A provider version: `organization/type` plus a version string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionedProvider {
    /// Provider address, `<organization>/<type>`.
    pub name: String,
    /// Version string as submitted.
    pub version: String,
}

impl VersionedProvider {
    /// Create a provider version reference.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for VersionedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A GPG key that signs provider checksums.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GpgPublicKey {
    /// GPG key identifier.
    pub key_id: String,
    /// ASCII-armored public key.
    pub ascii_armor: String,
    /// Trust signature, if any.
    #[serde(default)]
    pub trust_signature: String,
    /// Who issued the key.
    #[serde(default)]
    pub source: String,
    /// Where the key is published.
    #[serde(default)]
    pub source_url: String,
}

/// Keys which sign a provider platform build.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SigningKeys {
    /// GPG keys, any of which may verify the checksums.
    #[serde(default)]
    pub gpg_public_keys: Vec<GpgPublicKey>,
}

/// A provider build for one operating system and architecture.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlatformItem {
    /// Operating system, e.g. `linux`.
    pub os: String,
    /// CPU architecture, e.g. `amd64`.
    pub arch: String,
    /// Archive file name.
    pub filename: String,
    /// Where the archive is downloaded from.
    pub download_url: String,
    /// Where the `SHA256SUMS` file is downloaded from.
    pub shasums_url: String,
    /// Where the `SHA256SUMS.sig` file is downloaded from.
    pub shasums_signature_url: String,
    /// Hex SHA-256 of the archive.
    pub shasum: String,
    /// Keys which sign the checksums.
    #[serde(default)]
    pub signing_keys: SigningKeys,
}

/// Register or update a provider version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterProviderRequest {
    /// Provider address.
    pub name: String,
    /// Version string.
    pub version: String,
    /// Supported plugin protocol versions.
    pub protocols: Vec<String>,
    /// Builds for each supported platform.
    pub platforms: Vec<PlatformItem>,
    /// Free-text description.
    pub description: String,
    /// Where the provider source lives.
    pub source_repo_url: String,
    /// Development stage.
    pub maturity: Maturity,
}

/// An operating system and architecture pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system.
    pub os: String,
    /// CPU architecture.
    pub arch: String,
}

/// A published provider version and the platforms it supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderVersionItem {
    /// Version string.
    pub version: String,
    /// Supported plugin protocol versions.
    pub protocols: Vec<String>,
    /// Supported platforms.
    pub platforms: Vec<Platform>,
}

/// Look up the build of a provider version for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDataRequest {
    /// Provider address.
    pub name: String,
    /// Version string.
    pub version: String,
    /// Operating system.
    pub os: String,
    /// CPU architecture.
    pub arch: String,
}

/// Everything a client needs to download and verify one provider build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformMetadata {
    /// Supported plugin protocol versions.
    pub protocols: Vec<String>,
    /// Operating system, e.g. `linux`.
    pub os: String,
    /// CPU architecture, e.g. `amd64`.
    pub arch: String,
    /// Archive file name.
    pub filename: String,
    /// Where the archive is downloaded from.
    pub download_url: String,
    /// Where the `SHA256SUMS` file is downloaded from.
    pub shasums_url: String,
    /// Where the `SHA256SUMS.sig` file is downloaded from.
    pub shasums_signature_url: String,
    /// Hex SHA-256 of the archive.
    pub shasum: String,
    /// Keys which sign the checksums.
    pub signing_keys: SigningKeys,
}

/// Provider metadata as presented to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// First address segment.
    pub organization: String,
    /// Second address segment, the provider type.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Where the provider source lives.
    pub source_repo_url: String,
    /// Development stage.
    pub maturity: Maturity,
}

/// Which file of a provider release an artifact is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// The zipped provider binary for one platform.
    Binary {
        /// Operating system.
        os: String,
        /// CPU architecture.
        arch: String,
    },
    /// The `SHA256SUMS` file covering every platform.
    Shasums,
    /// The detached signature of the `SHA256SUMS` file.
    ShasumsSignature,
}

/// A file belonging to a provider version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderArtifact {
    /// The provider version.
    pub provider: VersionedProvider,
    /// Which file.
    pub kind: ArtifactKind,
}

impl ProviderArtifact {
    /// The zipped binary for `os`/`arch`.
    pub fn binary(
        provider: VersionedProvider,
        os: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            kind: ArtifactKind::Binary {
                os: os.into(),
                arch: arch.into(),
            },
        }
    }

    /// The `SHA256SUMS` file.
    pub fn shasums(provider: VersionedProvider) -> Self {
        Self {
            provider,
            kind: ArtifactKind::Shasums,
        }
    }

    /// The `SHA256SUMS.sig` file.
    pub fn shasums_signature(provider: VersionedProvider) -> Self {
        Self {
            provider,
            kind: ArtifactKind::ShasumsSignature,
        }
    }
}

/// One chunk of a provider artifact upload. The first chunk names the artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProviderArtifactRequest {
    /// The artifact, required on the first chunk.
    pub artifact: Option<ProviderArtifact>,
    /// Artifact bytes, in order.
    pub data_chunk: Bytes,
}
