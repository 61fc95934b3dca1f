//! Configuration loading for both server binaries.
//!
//! Each binary accepts an optional `--config <path>` TOML file, deserialized
//! with `serde`. Every field is optional in the file and overridable by a
//! CLI flag; precedence is CLI flag > config file > built-in default.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::RpcError;

/// Well-known port for the naming server's `Service` interface.
pub const DEFAULT_SERVICE_PORT: u16 = 8701;
/// Well-known port for the naming server's `Registration` interface.
pub const DEFAULT_REGISTRATION_PORT: u16 = 8702;
/// Default bind port for a storage server's `Storage` interface.
pub const DEFAULT_STORAGE_PORT: u16 = 8801;

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamingFileConfig {
    pub service_addr: Option<SocketAddr>,
    pub registration_addr: Option<SocketAddr>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageFileConfig {
    pub bind_addr: Option<SocketAddr>,
    pub naming_addr: Option<SocketAddr>,
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct NamingConfig {
    pub service_addr: SocketAddr,
    pub registration_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bind_addr: SocketAddr,
    pub naming_addr: SocketAddr,
    pub root: PathBuf,
}

/// Reads and parses a TOML config file, if one was given. A missing
/// `--config` flag is not an error; a present one that fails to read or
/// parse is.
fn read_file<T: for<'de> Deserialize<'de> + Default>(
    path: Option<&Path>,
) -> Result<T, RpcError> {
    let Some(path) = path else { return Ok(T::default()) };
    let text = std::fs::read_to_string(path)
        .map_err(|e| RpcError::io(format!("reading {}: {e}", path.display())))?;
    toml::from_str(&text)
        .map_err(|e| RpcError::invalid_argument(format!("parsing {}: {e}", path.display())))
}

impl NamingConfig {
    /// Resolves config-file values against CLI overrides and built-in
    /// defaults, in that precedence order (CLI highest).
    pub fn resolve(
        config_path: Option<&Path>,
        service_addr: Option<SocketAddr>,
        registration_addr: Option<SocketAddr>,
    ) -> Result<Self, RpcError> {
        let file: NamingFileConfig = read_file(config_path)?;
        let default_host = default_bind_host();
        Ok(NamingConfig {
            service_addr: service_addr
                .or(file.service_addr)
                .unwrap_or_else(|| format!("{default_host}:{DEFAULT_SERVICE_PORT}").parse().unwrap()),
            registration_addr: registration_addr.or(file.registration_addr).unwrap_or_else(|| {
                format!("{default_host}:{DEFAULT_REGISTRATION_PORT}").parse().unwrap()
            }),
        })
    }
}

impl StorageConfig {
    pub fn resolve(
        config_path: Option<&Path>,
        bind_addr: Option<SocketAddr>,
        naming_addr: Option<SocketAddr>,
        root: Option<PathBuf>,
    ) -> Result<Self, RpcError> {
        let file: StorageFileConfig = read_file(config_path)?;
        let default_host = default_bind_host();
        let naming_addr = naming_addr.or(file.naming_addr).ok_or_else(|| {
            RpcError::invalid_argument(
                "naming server registration address must be given via --naming-addr or config file",
            )
        })?;
        Ok(StorageConfig {
            bind_addr: bind_addr
                .or(file.bind_addr)
                .unwrap_or_else(|| format!("{default_host}:{DEFAULT_STORAGE_PORT}").parse().unwrap()),
            naming_addr,
            root: root.or(file.root).unwrap_or_else(|| PathBuf::from(".")),
        })
    }
}
