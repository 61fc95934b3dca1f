//! Storage server binary: walks a local root, registers with a naming
//! server, and serves the `Storage` and `Command` interfaces.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use distfs::config::StorageConfig;
use distfs::storage::server::StorageServer;
use tracing_subscriber::EnvFilter;

/// Storage server for a small distributed filesystem.
#[derive(Parser, Debug)]
#[command(name = "storage-server", about = "Holds file bytes under a local root directory")]
struct Args {
    /// TOML config file (CLI flags below take precedence over its values).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Bind address for this server's `Storage`/`Command` interfaces.
    #[arg(long, value_name = "ADDR")]
    bind_addr: Option<SocketAddr>,

    /// The naming server's `Registration` address.
    #[arg(long, value_name = "ADDR")]
    naming_addr: Option<SocketAddr>,

    /// Local directory holding this server's files.
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = StorageConfig::resolve(
        args.config.as_deref(),
        args.bind_addr,
        args.naming_addr,
        args.root,
    )?;

    std::fs::create_dir_all(&config.root)?;
    let server = StorageServer::new(config.root.clone());
    let (storage_addr, command_addr) = server.start(config.bind_addr, config.naming_addr).await?;
    tracing::info!(%storage_addr, %command_addr, root = %config.root.display(), "storage server ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server.stop().await;
    Ok(())
}
