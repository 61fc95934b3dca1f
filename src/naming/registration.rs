//! Storage server registration.
//!
//! One [`Registry`] per naming server process, tracking which storage
//! servers exist and how to reach their `Command` endpoint given their
//! `Storage` (client) endpoint.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use whirlwind::ShardMap;

use crate::error::RpcError;
use crate::path::Path;
use crate::rpc::wire;
use crate::rpc::{Dispatch, Handle, InterfaceId};
use crate::storage::command::CommandStub;
use crate::storage::service::StorageStub;

use super::lock::LockManager;
use super::service::Service;

const REGISTER: &str = "register";

/// Maps a storage server's `Storage`-interface address to its
/// `Command`-interface address, and separately tracks the full set of
/// registered `Storage` addresses for "pick any registered server".
pub struct Registry {
    command_of: ShardMap<SocketAddr, SocketAddr>,
    all: Mutex<Vec<SocketAddr>>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry { command_of: ShardMap::new(), all: Mutex::new(Vec::new()) }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly started storage server. `files` is the set of
    /// paths it found on local disk at startup. Returns `(duplicates,
    /// new_leaves)`: paths that already existed in the tree (for the
    /// storage server to delete locally) and paths that were newly
    /// inserted (for the caller to record as replicas of `client`).
    pub async fn register(
        &self,
        tree: &LockManager,
        client: SocketAddr,
        command: SocketAddr,
        files: Vec<Path>,
    ) -> Result<(Vec<Path>, Vec<Path>), RpcError> {
        if self.command_of.contains_key(&client).await {
            return Err(RpcError::illegal_state(format!("{client} is already registered")));
        }

        let mut duplicates = Vec::new();
        let mut new_leaves = Vec::new();
        tree.with_tree_mut(|t| {
            for path in &files {
                if path.is_root() {
                    continue;
                }
                if t.add_file(path).map_err(|_| {
                    RpcError::illegal_state(format!("{path} has no registered parent directory"))
                })? {
                    new_leaves.push(path.clone());
                } else {
                    duplicates.push(path.clone());
                }
            }
            Ok::<_, RpcError>(())
        })?;

        self.command_of.insert(client, command).await;
        self.all.lock().await.push(client);

        Ok((duplicates, new_leaves))
    }

    pub async fn command_of(&self, client: SocketAddr) -> Option<SocketAddr> {
        self.command_of.get(&client).await.map(|addr| *addr)
    }

    /// Any registered storage server not in `exclude`, preferring the
    /// first one found.
    pub async fn any_excluding(&self, exclude: &[SocketAddr]) -> Option<SocketAddr> {
        self.all.lock().await.iter().find(|addr| !exclude.contains(addr)).copied()
    }

    pub async fn any(&self) -> Option<SocketAddr> {
        self.all.lock().await.first().copied()
    }
}

/// Server-side `Registration` endpoint, dispatching onto a naming
/// [`Service`] (which owns the tree, the registry, and the replica map
/// together, since registration touches all three).
pub struct RegistrationEndpoint(pub Arc<Service>);

#[async_trait]
impl Dispatch for RegistrationEndpoint {
    fn interface_name(&self) -> &'static str {
        "Registration"
    }

    async fn dispatch(
        &self,
        method: &str,
        _type_tags: &[String],
        payload: &[u8],
    ) -> Result<Vec<u8>, RpcError> {
        let mut src = payload;
        match method {
            REGISTER => {
                let client = wire::read_string(&mut src)?;
                let command = wire::read_string(&mut src)?;
                let client: SocketAddr = client
                    .parse()
                    .map_err(|_| RpcError::invalid_argument(format!("bad address {client:?}")))?;
                let command: SocketAddr = command
                    .parse()
                    .map_err(|_| RpcError::invalid_argument(format!("bad address {command:?}")))?;
                let files = wire::read_vec(&mut src, wire::read_path)?;
                let duplicates = self.0.register(client, command, files).await?;
                let mut out = Vec::new();
                wire::write_vec(&mut out, &duplicates, |d, p| wire::write_path(d, p))?;
                Ok(out)
            }
            other => Err(RpcError::fatal(format!("Registration has no method {other:?}"))),
        }
    }
}

/// Client-side proxy to a remote `Registration` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationStub {
    handle: Handle,
}

impl RegistrationStub {
    pub fn new(addr: SocketAddr) -> Self {
        RegistrationStub { handle: Handle::new(InterfaceId::Registration, addr) }
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.addr
    }

    /// Remote `Registration.register`.
    pub async fn register(
        &self,
        storage: &StorageStub,
        command: &CommandStub,
        files: Vec<Path>,
    ) -> Result<Vec<Path>, RpcError> {
        let mut payload = Vec::new();
        wire::write_string(&mut payload, &storage.addr().to_string())?;
        wire::write_string(&mut payload, &command.addr().to_string())?;
        wire::write_vec(&mut payload, &files, |d, p| wire::write_path(d, p))?;
        let response = crate::rpc::stub::call(
            self.handle.addr,
            REGISTER,
            vec!["Storage".into(), "Command".into(), "Path[]".into()],
            payload,
        )
        .await?;
        wire::read_vec(&mut response.as_slice(), wire::read_path).map_err(RpcError::from)
    }
}

impl fmt::Display for RegistrationStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.handle.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn register_reports_duplicates_and_creates_new_leaves() {
        let tree = LockManager::new();
        let registry = Registry::new();

        let (duplicates, new_leaves) = registry
            .register(&tree, addr(9001), addr(9002), vec![Path::parse("/a"), Path::parse("/b")])
            .await
            .unwrap();
        assert!(duplicates.is_empty());
        assert_eq!(new_leaves, vec![Path::parse("/a"), Path::parse("/b")]);

        let (duplicates, new_leaves) = registry
            .register(&tree, addr(9003), addr(9004), vec![Path::parse("/a"), Path::parse("/c")])
            .await
            .unwrap();
        assert_eq!(duplicates, vec![Path::parse("/a")]);
        assert_eq!(new_leaves, vec![Path::parse("/c")]);

        tree.with_tree(|t| {
            assert!(t.lookup(&Path::parse("/c")).is_ok());
        });
    }

    #[tokio::test]
    async fn registering_the_same_client_twice_is_illegal_state() {
        let tree = LockManager::new();
        let registry = Registry::new();
        registry.register(&tree, addr(9001), addr(9002), vec![]).await.unwrap();
        let err = registry.register(&tree, addr(9001), addr(9005), vec![]).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::IllegalState);
    }

    #[tokio::test]
    async fn any_excluding_skips_listed_addresses() {
        let tree = LockManager::new();
        let registry = Registry::new();
        registry.register(&tree, addr(9001), addr(9002), vec![]).await.unwrap();
        registry.register(&tree, addr(9003), addr(9004), vec![]).await.unwrap();

        let picked = registry.any_excluding(&[addr(9001)]).await.unwrap();
        assert_eq!(picked, addr(9003));
    }
}
