//! # Terraform Registry
//!
//! A private registry for Terraform modules and providers, speaking the
//! Terraform [module registry protocol](https://developer.hashicorp.com/terraform/internals/module-registry-protocol)
//! and [provider registry protocol](https://developer.hashicorp.com/terraform/internals/provider-registry-protocol).
//!
//! ## Services
//!
//! - Module registration and tagging
//! - Module version lifecycle: begin, then publish or abort
//! - Chunked archive transfer to and from a blob store
//! - Dependency registration and transitive resolution
//! - Provider registration, version lifecycle and artifact storage
//! - A [`Gateway`] in front of all of them, and an axum router over the gateway
//!
//! ## Example
//!
//! ```no_run
//! use terraform_registry::RegistryBuilder;
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = RegistryBuilder::new()
//!     .storage(MemoryStorage::new().into())
//!     .build()
//!     .await?;
//! registry.initialize().await?;
//!
//! // Serve with axum or any tower-compatible server
//! let router = registry.router();
//! # Ok(())
//! # }
//! ```

mod api;
pub mod config;
pub mod dependency;
mod error;
pub mod gateway;
pub mod messages;
mod modules;
pub mod provider_manager;
mod providers;
pub mod registrar;
pub mod release;
mod rows;
pub mod rpc;
pub mod tags;
pub mod transfer;
pub mod version_manager;
mod versions;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{Registry, RegistryBuilder, router};
pub use config::RegistryConfig;
pub use error::{RegistryError, RegistryResult};
pub use gateway::{Backends, Connect, DialError, Gateway, LocalConnector};
pub use versions::sort_versions;
