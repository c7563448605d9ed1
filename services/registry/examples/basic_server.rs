//! Basic Terraform registry server example
//!
//! Run with: cargo run -p terraform-registry --example basic_server

use storage::MemoryStorage;
use terraform_registry::RegistryBuilder;
use terraform_registry::messages::{EndAction, Maturity, RegisterModuleRequest, VersionedModule};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Build every service over in-memory stores
    let registry = RegistryBuilder::new()
        .storage(MemoryStorage::new().into())
        .build()
        .await?;
    registry.initialize().await?;

    // Publish a module version with no archive so the versions endpoint has something to list
    let gateway = registry.gateway();
    let module = VersionedModule::new("example/vpc/aws", "1.0.0");
    gateway
        .register(RegisterModuleRequest {
            name: module.name.clone(),
            description: "Example VPC module".into(),
            source_url: "https://git.example.com/example/vpc".into(),
            maturity: Maturity::Alpha,
        })
        .await?;
    gateway.begin_version(module.clone()).await?;
    gateway.end_version(module, EndAction::Publish).await?;

    // Bind to address
    let addr = "127.0.0.1:3001";
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Terraform registry listening on http://{}", addr);
    tracing::info!("Try: curl http://{}/modules/v1/example/vpc/aws/versions", addr);

    // Serve the registry
    axum::serve(listener, registry.router()).await?;

    Ok(())
}
