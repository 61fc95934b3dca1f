//! The naming server's metadata API: the `Service` interface
//! (`isDirectory`, `list`, `createFile`, `createDirectory`, `delete`,
//! `getStorage`, `lock`, `unlock`) plus the `register` operation that backs
//! [`super::registration::RegistrationEndpoint`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::error::RpcError;
use crate::path::Path;
use crate::rpc::wire;
use crate::rpc::{Dispatch, Handle, InterfaceId};
use crate::storage::command::CommandStub;
use crate::storage::service::StorageStub;

use super::lock::{Event, LockManager};
use super::registration::Registry;
use super::replication::Replicas;

const IS_DIRECTORY: &str = "isDirectory";
const LIST: &str = "list";
const CREATE_FILE: &str = "createFile";
const CREATE_DIRECTORY: &str = "createDirectory";
const DELETE: &str = "delete";
const GET_STORAGE: &str = "getStorage";
const LOCK: &str = "lock";
const UNLOCK: &str = "unlock";

/// The naming server's metadata state: the directory tree and its lock
/// manager, the set of registered storage servers, and which of them hold
/// each file.
pub struct Service {
    tree: LockManager,
    registry: Registry,
    replicas: Replicas,
}

impl Default for Service {
    fn default() -> Self {
        Service { tree: LockManager::new(), registry: Registry::new(), replicas: Replicas::new() }
    }
}

impl Service {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip(self))]
    pub async fn is_directory(&self, path: &Path) -> Result<bool, RpcError> {
        self.tree
            .with_tree(|t| t.lookup(path).map(|n| n.is_directory))
            .map_err(|_| not_found(path))
    }

    #[instrument(skip(self))]
    pub async fn list(&self, directory: &Path) -> Result<Vec<String>, RpcError> {
        self.tree.with_tree(|t| {
            let node = t.lookup(directory).map_err(|_| not_found(directory))?;
            if !node.is_directory {
                return Err(not_found(directory));
            }
            Ok(node.children().map(str::to_owned).collect())
        })
    }

    #[instrument(skip(self))]
    pub async fn create_file(&self, path: &Path) -> Result<bool, RpcError> {
        if path.is_root() {
            return Ok(false);
        }
        let parent = path.parent().expect("non-root path has a parent");
        self.tree.with_tree(|t| {
            let parent_node = t.lookup(&parent).map_err(|_| not_found(&parent))?;
            if !parent_node.is_directory {
                return Err(not_found(&parent));
            }
            Ok(())
        })?;
        let client =
            self.registry.any().await.ok_or_else(|| RpcError::illegal_state(
                "no storage server is registered",
            ))?;
        let command = self
            .registry
            .command_of(client)
            .await
            .ok_or_else(|| RpcError::fatal("registered storage server has no command pairing"))?;

        let inserted = self.tree.with_tree_mut(|t| t.add_file(path)).map_err(|_| not_found(&parent))?;
        if !inserted {
            return Ok(false);
        }
        if let Err(err) = CommandStub::new(command).create(path).await {
            self.tree.with_tree_mut(|t| t.remove(path));
            return Err(err);
        }
        self.replicas.set_sole(path.clone(), client).await;
        Ok(true)
    }

    #[instrument(skip(self))]
    pub async fn create_directory(&self, path: &Path) -> Result<bool, RpcError> {
        if path.is_root() {
            return Ok(false);
        }
        let parent = path.parent().expect("non-root path has a parent");
        self.tree.with_tree_mut(|t| {
            let parent_node = t.lookup(&parent).map_err(|_| not_found(&parent))?;
            if !parent_node.is_directory {
                return Err(not_found(&parent));
            }
            t.add_directory(path).map_err(|_| not_found(&parent))
        })
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, path: &Path) -> Result<bool, RpcError> {
        let files = self.tree.with_tree(|t| t.enumerate_files(path)).map_err(|_| not_found(path))?;
        let removed = self.tree.with_tree_mut(|t| t.remove(path));
        if !removed {
            return Err(not_found(path));
        }

        let mut all_succeeded = true;
        for file in &files {
            for holder in self.replicas.remove(file).await {
                let Some(command) = self.registry.command_of(holder).await else {
                    all_succeeded = false;
                    continue;
                };
                if CommandStub::new(command).delete(file).await.is_err() {
                    all_succeeded = false;
                }
            }
        }
        Ok(all_succeeded)
    }

    #[instrument(skip(self))]
    pub async fn get_storage(&self, path: &Path) -> Result<SocketAddr, RpcError> {
        self.replicas.any(path).await.ok_or_else(|| not_found(path))
    }

    pub async fn lock(&self, path: &Path, exclusive: bool) -> Result<(), RpcError> {
        self.tree.lock(path, exclusive).await
    }

    pub async fn unlock(&self, path: &Path, exclusive: bool) -> Result<(), RpcError> {
        match self.tree.unlock(path, exclusive).await? {
            Some(Event::Replicate) => self.replicate(path).await,
            Some(Event::Collapse) => self.collapse(path).await,
            None => {}
        }
        Ok(())
    }

    /// Registers a storage server. See
    /// [`super::registration::Registry::register`] for the tree/duplicate
    /// bookkeeping; this additionally records new leaves as sole replicas
    /// of `client`.
    pub async fn register(
        &self,
        client: SocketAddr,
        command: SocketAddr,
        files: Vec<Path>,
    ) -> Result<Vec<Path>, RpcError> {
        let (duplicates, new_leaves) =
            self.registry.register(&self.tree, client, command, files).await?;
        for path in new_leaves {
            self.replicas.set_sole(path, client).await;
        }
        Ok(duplicates)
    }

    /// Best-effort: copies `path` to a storage server not already holding
    /// it. Leaves state unchanged on any failure.
    async fn replicate(&self, path: &Path) {
        let Some(holders) = self.replicas.get(path).await else { return };
        let Some(source) = holders.first().copied() else { return };
        let Some(dest_client) = self.registry.any_excluding(&holders).await else { return };
        let Some(dest_command) = self.registry.command_of(dest_client).await else { return };
        let copied =
            CommandStub::new(dest_command).copy(path, &StorageStub::new(source)).await;
        if let Ok(true) = copied {
            self.replicas.add(path, dest_client).await;
        }
    }

    /// Best-effort: reduces `path`'s replica set to one server, deleting it
    /// from the rest. Errors from individual deletes are ignored.
    async fn collapse(&self, path: &Path) {
        let Some(holders) = self.replicas.get(path).await else { return };
        let Some(keep) = holders.first().copied() else { return };
        for dropped in self.replicas.collapse_to(path, keep).await {
            if let Some(command) = self.registry.command_of(dropped).await {
                let _ = CommandStub::new(command).delete(path).await;
            }
        }
    }
}

fn not_found(path: &Path) -> RpcError {
    RpcError::not_found(format!("{path} does not exist"))
}

/// Server-side `Service` endpoint.
pub struct ServiceEndpoint(pub Arc<Service>);

#[async_trait]
impl Dispatch for ServiceEndpoint {
    fn interface_name(&self) -> &'static str {
        "Service"
    }

    async fn dispatch(
        &self,
        method: &str,
        _type_tags: &[String],
        payload: &[u8],
    ) -> Result<Vec<u8>, RpcError> {
        let mut src = payload;
        match method {
            IS_DIRECTORY => {
                let path = wire::read_path(&mut src)?;
                let is_dir = self.0.is_directory(&path).await?;
                let mut out = Vec::new();
                wire::write_bool(&mut out, is_dir)?;
                Ok(out)
            }
            LIST => {
                let path = wire::read_path(&mut src)?;
                let entries = self.0.list(&path).await?;
                let mut out = Vec::new();
                wire::write_vec(&mut out, &entries, |d, s| wire::write_string(d, s))?;
                Ok(out)
            }
            CREATE_FILE => {
                let path = wire::read_path(&mut src)?;
                let created = self.0.create_file(&path).await?;
                let mut out = Vec::new();
                wire::write_bool(&mut out, created)?;
                Ok(out)
            }
            CREATE_DIRECTORY => {
                let path = wire::read_path(&mut src)?;
                let created = self.0.create_directory(&path).await?;
                let mut out = Vec::new();
                wire::write_bool(&mut out, created)?;
                Ok(out)
            }
            DELETE => {
                let path = wire::read_path(&mut src)?;
                let ok = self.0.delete(&path).await?;
                let mut out = Vec::new();
                wire::write_bool(&mut out, ok)?;
                Ok(out)
            }
            GET_STORAGE => {
                let path = wire::read_path(&mut src)?;
                let addr = self.0.get_storage(&path).await?;
                let mut out = Vec::new();
                wire::write_string(&mut out, &addr.to_string())?;
                Ok(out)
            }
            LOCK => {
                let path = wire::read_path(&mut src)?;
                let exclusive = wire::read_bool(&mut src)?;
                self.0.lock(&path, exclusive).await?;
                Ok(Vec::new())
            }
            UNLOCK => {
                let path = wire::read_path(&mut src)?;
                let exclusive = wire::read_bool(&mut src)?;
                self.0.unlock(&path, exclusive).await?;
                Ok(Vec::new())
            }
            other => Err(RpcError::fatal(format!("Service has no method {other:?}"))),
        }
    }
}

/// Client-side proxy to a remote `Service` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceStub {
    handle: Handle,
}

impl ServiceStub {
    pub fn new(addr: SocketAddr) -> Self {
        ServiceStub { handle: Handle::new(InterfaceId::Service, addr) }
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.addr
    }

    /// Remote `Service.isDirectory`.
    pub async fn is_directory(&self, path: &Path) -> Result<bool, RpcError> {
        let mut payload = Vec::new();
        wire::write_path(&mut payload, path)?;
        let response =
            crate::rpc::stub::call(self.handle.addr, IS_DIRECTORY, vec!["Path".into()], payload)
                .await?;
        Ok(wire::read_bool(&mut response.as_slice())?)
    }

    /// Remote `Service.list`.
    pub async fn list(&self, path: &Path) -> Result<Vec<String>, RpcError> {
        let mut payload = Vec::new();
        wire::write_path(&mut payload, path)?;
        let response =
            crate::rpc::stub::call(self.handle.addr, LIST, vec!["Path".into()], payload).await?;
        wire::read_vec(&mut response.as_slice(), wire::read_string).map_err(RpcError::from)
    }

    /// Remote `Service.createFile`.
    pub async fn create_file(&self, path: &Path) -> Result<bool, RpcError> {
        let mut payload = Vec::new();
        wire::write_path(&mut payload, path)?;
        let response =
            crate::rpc::stub::call(self.handle.addr, CREATE_FILE, vec!["Path".into()], payload)
                .await?;
        Ok(wire::read_bool(&mut response.as_slice())?)
    }

    /// Remote `Service.createDirectory`.
    pub async fn create_directory(&self, path: &Path) -> Result<bool, RpcError> {
        let mut payload = Vec::new();
        wire::write_path(&mut payload, path)?;
        let response = crate::rpc::stub::call(
            self.handle.addr,
            CREATE_DIRECTORY,
            vec!["Path".into()],
            payload,
        )
        .await?;
        Ok(wire::read_bool(&mut response.as_slice())?)
    }

    /// Remote `Service.delete`.
    pub async fn delete(&self, path: &Path) -> Result<bool, RpcError> {
        let mut payload = Vec::new();
        wire::write_path(&mut payload, path)?;
        let response =
            crate::rpc::stub::call(self.handle.addr, DELETE, vec!["Path".into()], payload).await?;
        Ok(wire::read_bool(&mut response.as_slice())?)
    }

    /// Remote `Service.getStorage`. Returns a [`StorageStub`] bound to
    /// whichever storage server the naming server names as a holder, the
    /// `Storage-handle` the metadata API contract returns.
    pub async fn get_storage(&self, path: &Path) -> Result<StorageStub, RpcError> {
        let mut payload = Vec::new();
        wire::write_path(&mut payload, path)?;
        let response =
            crate::rpc::stub::call(self.handle.addr, GET_STORAGE, vec!["Path".into()], payload)
                .await?;
        let text = wire::read_string(&mut response.as_slice())?;
        let addr: SocketAddr = text
            .parse()
            .map_err(|_| RpcError::fatal(format!("naming server returned bad address {text:?}")))?;
        Ok(StorageStub::new(addr))
    }

    /// Remote `Service.lock`.
    pub async fn lock(&self, path: &Path, exclusive: bool) -> Result<(), RpcError> {
        let mut payload = Vec::new();
        wire::write_path(&mut payload, path)?;
        wire::write_bool(&mut payload, exclusive)?;
        crate::rpc::stub::call(
            self.handle.addr,
            LOCK,
            vec!["Path".into(), "boolean".into()],
            payload,
        )
        .await?;
        Ok(())
    }

    /// Remote `Service.unlock`.
    pub async fn unlock(&self, path: &Path, exclusive: bool) -> Result<(), RpcError> {
        let mut payload = Vec::new();
        wire::write_path(&mut payload, path)?;
        wire::write_bool(&mut payload, exclusive)?;
        crate::rpc::stub::call(
            self.handle.addr,
            UNLOCK,
            vec!["Path".into(), "boolean".into()],
            payload,
        )
        .await?;
        Ok(())
    }
}

impl fmt::Display for ServiceStub {
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
    async fn create_directory_requires_an_existing_parent() {
        let service = Service::new();
        let err = service.create_directory(&Path::parse("/a/b")).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn create_directory_is_idempotent() {
        let service = Service::new();
        assert!(service.create_directory(&Path::parse("/a")).await.unwrap());
        assert!(!service.create_directory(&Path::parse("/a")).await.unwrap());
    }

    #[tokio::test]
    async fn create_file_without_a_registered_storage_server_is_illegal_state() {
        let service = Service::new();
        let err = service.create_file(&Path::parse("/a")).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::IllegalState);
    }

    #[tokio::test]
    async fn list_reports_not_found_for_a_file() {
        let service = Service::new();
        service.register(addr(1), addr(2), vec![Path::parse("/a")]).await.unwrap();
        let err = service.list(&Path::parse("/a")).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn get_storage_reports_not_found_for_unregistered_path() {
        let service = Service::new();
        let err = service.get_storage(&Path::parse("/missing")).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn register_then_get_storage_round_trips() {
        let service = Service::new();
        service.register(addr(1), addr(2), vec![Path::parse("/a")]).await.unwrap();
        assert_eq!(service.get_storage(&Path::parse("/a")).await.unwrap(), addr(1));
    }
}
