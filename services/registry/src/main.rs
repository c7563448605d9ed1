//! Terraform registry server

use std::net::SocketAddr;

use camino::Utf8PathBuf;
use clap::Parser;
use eyre::WrapErr;
use terraform_registry::{RegistryBuilder, RegistryConfig};
use tracing_subscriber::EnvFilter;

/// Serve a private Terraform module and provider registry
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<Utf8PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn load_config(path: Option<&Utf8PathBuf>) -> eyre::Result<RegistryConfig> {
    let Some(path) = path else {
        return Ok(RegistryConfig::default());
    };
    let text = tokio::fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("reading {path}"))?;
    toml_edit::de::from_str(&text).wrap_err_with(|| format!("parsing {path}"))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mut config = load_config(args.config.as_ref()).await?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    let listen = config.listen;

    let registry = RegistryBuilder::new().config(config).build().await?;
    registry
        .initialize()
        .await
        .wrap_err("initializing registry stores")?;

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .wrap_err_with(|| format!("binding {listen}"))?;
    tracing::info!("Terraform registry listening on http://{listen}");

    axum::serve(listener, registry.router())
        .await
        .wrap_err("serving registry")?;
    Ok(())
}
