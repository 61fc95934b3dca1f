//! The `Command` interface: `create`/`delete`/`copy`, issued by the naming
//! server against a storage server's local files.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::error::RpcError;
use crate::path::Path;
use crate::rpc::wire;
use crate::rpc::{Dispatch, Handle, InterfaceId};

use super::service::StorageStub;
use super::store::Store;

const CREATE: &str = "create";
const DELETE: &str = "delete";
const COPY: &str = "copy";

/// Bytes read from the source per `Storage.read` call while copying; kept
/// well under the wire's `i32`/frame limits.
const COPY_CHUNK: i32 = 1 << 20;

pub struct CommandEndpoint(pub Arc<Store>);

#[async_trait]
impl Dispatch for CommandEndpoint {
    fn interface_name(&self) -> &'static str {
        "Command"
    }

    async fn dispatch(
        &self,
        method: &str,
        _type_tags: &[String],
        payload: &[u8],
    ) -> Result<Vec<u8>, RpcError> {
        let mut src = payload;
        match method {
            CREATE => {
                let path = wire::read_path(&mut src)?;
                let created = self.0.create(&path).await?;
                let mut out = Vec::new();
                wire::write_bool(&mut out, created)?;
                Ok(out)
            }
            DELETE => {
                let path = wire::read_path(&mut src)?;
                let removed = self.0.delete(&path).await?;
                let mut out = Vec::new();
                wire::write_bool(&mut out, removed)?;
                Ok(out)
            }
            COPY => {
                let path = wire::read_path(&mut src)?;
                let source = wire::read_string(&mut src)?;
                let source: SocketAddr = source
                    .parse()
                    .map_err(|_| RpcError::invalid_argument(format!("bad address {source:?}")))?;
                let copied = copy_from(&self.0, &path, StorageStub::new(source)).await?;
                let mut out = Vec::new();
                wire::write_bool(&mut out, copied)?;
                Ok(out)
            }
            other => Err(RpcError::fatal(format!("Command has no method {other:?}"))),
        }
    }
}

/// Reads `path` from `source` in bounded chunks and writes it locally via
/// `create`+`write`. Aborts and deletes any partial file on failure.
#[instrument(skip(store))]
async fn copy_from(store: &Store, path: &Path, source: StorageStub) -> Result<bool, RpcError> {
    store.create(path).await?;
    let result = copy_body(store, path, source).await;
    if result.is_err() {
        let _ = store.delete(path).await;
    }
    result
}

async fn copy_body(store: &Store, path: &Path, source: StorageStub) -> Result<bool, RpcError> {
    let size = source.size(path).await?;
    let mut offset: i64 = 0;
    while (offset as u64) < size {
        let remaining = size - offset as u64;
        let length = remaining.min(COPY_CHUNK as u64) as i32;
        let chunk = source.read(path, offset, length).await?;
        store.write(path, offset, &chunk).await?;
        offset += length as i64;
    }
    Ok(true)
}

/// Client-side proxy to a remote `Command` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandStub {
    handle: Handle,
}

impl CommandStub {
    pub fn new(addr: SocketAddr) -> Self {
        CommandStub { handle: Handle::new(InterfaceId::Command, addr) }
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.addr
    }

    /// Remote `Command.create`.
    pub async fn create(&self, path: &Path) -> Result<bool, RpcError> {
        let mut payload = Vec::new();
        wire::write_path(&mut payload, path)?;
        let response =
            crate::rpc::stub::call(self.handle.addr, CREATE, vec!["Path".into()], payload).await?;
        Ok(wire::read_bool(&mut response.as_slice())?)
    }

    /// Remote `Command.delete`.
    pub async fn delete(&self, path: &Path) -> Result<bool, RpcError> {
        let mut payload = Vec::new();
        wire::write_path(&mut payload, path)?;
        let response =
            crate::rpc::stub::call(self.handle.addr, DELETE, vec!["Path".into()], payload).await?;
        Ok(wire::read_bool(&mut response.as_slice())?)
    }

    /// Remote `Command.copy`.
    pub async fn copy(&self, path: &Path, source: &StorageStub) -> Result<bool, RpcError> {
        let mut payload = Vec::new();
        wire::write_path(&mut payload, path)?;
        wire::write_string(&mut payload, &source.addr().to_string())?;
        let response = crate::rpc::stub::call(
            self.handle.addr,
            COPY,
            vec!["Path".into(), "Storage".into()],
            payload,
        )
        .await?;
        Ok(wire::read_bool(&mut response.as_slice())?)
    }
}

impl fmt::Display for CommandStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.handle.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::Skeleton;
    use crate::storage::service::StorageEndpoint;

    #[tokio::test]
    async fn copy_transfers_bytes_between_two_stores() {
        let source_dir = tempfile::tempdir().unwrap();
        let source_store = Arc::new(Store::new(source_dir.path().to_path_buf()));
        let path = Path::parse("/a");
        source_store.create(&path).await.unwrap();
        source_store.write(&path, 0, b"hello world").await.unwrap();

        let source_skeleton = Skeleton::new(StorageEndpoint(source_store.clone()));
        let source_addr = source_skeleton.start("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let dest_dir = tempfile::tempdir().unwrap();
        let dest_store = Store::new(dest_dir.path().to_path_buf());

        let copied = copy_from(&dest_store, &path, StorageStub::new(source_addr)).await.unwrap();
        assert!(copied);
        assert_eq!(dest_store.read(&path, 0, 11).await.unwrap(), b"hello world");
    }
}
