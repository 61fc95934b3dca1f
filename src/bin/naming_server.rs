//! Naming server binary: binds the `Service` and `Registration` interfaces
//! and runs until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use distfs::config::NamingConfig;
use distfs::naming::server::NamingServer;
use tracing_subscriber::EnvFilter;

/// Naming server for a small distributed filesystem.
#[derive(Parser, Debug)]
#[command(name = "naming-server", about = "Holds the metadata tree and the path lock manager")]
struct Args {
    /// TOML config file (CLI flags below take precedence over its values).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Bind address for the `Service` interface.
    #[arg(long, value_name = "ADDR")]
    service_addr: Option<SocketAddr>,

    /// Bind address for the `Registration` interface.
    #[arg(long, value_name = "ADDR")]
    registration_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config =
        NamingConfig::resolve(args.config.as_deref(), args.service_addr, args.registration_addr)?;

    let server = NamingServer::new();
    let (service_addr, registration_addr) =
        server.start(config.service_addr, config.registration_addr).await?;
    tracing::info!(%service_addr, %registration_addr, "naming server ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server.stop().await;
    Ok(())
}
