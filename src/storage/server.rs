//! Storage server bootstrap: walks the local root, registers with the
//! naming server, deletes reported duplicates, and serves the `Storage`
//! and `Command` interfaces.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::RpcError;
use crate::naming::registration::RegistrationStub;
use crate::path::Path;
use crate::rpc::Skeleton;

use super::command::{CommandEndpoint, CommandStub};
use super::service::{StorageEndpoint, StorageStub};
use super::store::Store;

pub struct StorageServer {
    store: Arc<Store>,
    storage_skeleton: Skeleton<StorageEndpoint>,
    command_skeleton: Skeleton<CommandEndpoint>,
}

impl StorageServer {
    pub fn new(root: PathBuf) -> Self {
        let store = Arc::new(Store::new(root));
        StorageServer {
            store: store.clone(),
            storage_skeleton: Skeleton::new(StorageEndpoint(store.clone())),
            command_skeleton: Skeleton::new(CommandEndpoint(store)),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Binds the `Storage` and `Command` skeletons, registers with the
    /// naming server at `naming_addr`, and deletes any duplicates it
    /// reports. Returns the bound `(storage_addr, command_addr)`.
    ///
    /// Both skeletons are already accepting connections by the time this
    /// returns, slightly ahead of the naming server knowing about them; since
    /// nobody holds their addresses yet, that ordering is harmless.
    pub async fn start(
        &self,
        bind_addr: SocketAddr,
        naming_addr: SocketAddr,
    ) -> Result<(SocketAddr, SocketAddr), RpcError> {
        let files =
            Path::list_files_under(self.store.root()).map_err(|e| RpcError::io(e.to_string()))?;

        let storage_addr = self.storage_skeleton.start(bind_addr).await?;
        let command_addr = self.command_skeleton.start(bind_addr).await?;

        let duplicates = RegistrationStub::new(naming_addr)
            .register(&StorageStub::new(storage_addr), &CommandStub::new(command_addr), files)
            .await?;
        for path in &duplicates {
            self.store.delete(path).await?;
        }
        tracing::info!(
            %storage_addr,
            %command_addr,
            duplicates = duplicates.len(),
            "storage server registered"
        );
        Ok((storage_addr, command_addr))
    }

    pub async fn stop(&self) {
        self.storage_skeleton.stop().await;
        self.command_skeleton.stop().await;
    }
}
