//! The `Storage` interface: `size`/`read`/`write` against a storage
//! server's local files.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RpcError;
use crate::path::Path;
use crate::rpc::wire;
use crate::rpc::{Dispatch, Handle, InterfaceId};

use super::store::Store;

const SIZE: &str = "size";
const READ: &str = "read";
const WRITE: &str = "write";

/// Server-side `Storage` endpoint, dispatching onto a shared [`Store`].
pub struct StorageEndpoint(pub Arc<Store>);

#[async_trait]
impl Dispatch for StorageEndpoint {
    fn interface_name(&self) -> &'static str {
        "Storage"
    }

    async fn dispatch(
        &self,
        method: &str,
        _type_tags: &[String],
        payload: &[u8],
    ) -> Result<Vec<u8>, RpcError> {
        let mut src = payload;
        match method {
            SIZE => {
                let path = wire::read_path(&mut src)?;
                let size = self.0.size(&path).await?;
                let mut out = Vec::new();
                wire::write_u64(&mut out, size)?;
                Ok(out)
            }
            READ => {
                let path = wire::read_path(&mut src)?;
                let offset = wire::read_i64(&mut src)?;
                let length = wire::read_i32(&mut src)?;
                let data = self.0.read(&path, offset, length).await?;
                let mut out = Vec::new();
                wire::write_bytes(&mut out, &data)?;
                Ok(out)
            }
            WRITE => {
                let path = wire::read_path(&mut src)?;
                let offset = wire::read_i64(&mut src)?;
                let data = wire::read_bytes(&mut src)?;
                self.0.write(&path, offset, &data).await?;
                Ok(Vec::new())
            }
            other => Err(RpcError::fatal(format!("Storage has no method {other:?}"))),
        }
    }
}

/// Client-side proxy to a remote `Storage` endpoint. Constructed from a raw
/// address (the only construction form this system needs: every holder of a
/// `Storage-handle` already has the address, handed out by the naming
/// server's `getStorage` or carried in a `Command.copy` argument).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageStub {
    handle: Handle,
}

impl StorageStub {
    pub fn new(addr: SocketAddr) -> Self {
        StorageStub { handle: Handle::new(InterfaceId::Storage, addr) }
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.addr
    }

    /// Remote `Storage.size`.
    pub async fn size(&self, path: &Path) -> Result<u64, RpcError> {
        let mut payload = Vec::new();
        wire::write_path(&mut payload, path)?;
        let response =
            crate::rpc::stub::call(self.handle.addr, SIZE, vec!["Path".into()], payload).await?;
        Ok(wire::read_u64(&mut response.as_slice())?)
    }

    /// Remote `Storage.read`.
    pub async fn read(&self, path: &Path, offset: i64, length: i32) -> Result<Vec<u8>, RpcError> {
        let mut payload = Vec::new();
        wire::write_path(&mut payload, path)?;
        wire::write_i64(&mut payload, offset)?;
        wire::write_i32(&mut payload, length)?;
        let response = crate::rpc::stub::call(
            self.handle.addr,
            READ,
            vec!["Path".into(), "int64".into(), "int32".into()],
            payload,
        )
        .await?;
        Ok(wire::read_bytes(&mut response.as_slice())?)
    }

    /// Remote `Storage.write`.
    pub async fn write(&self, path: &Path, offset: i64, data: &[u8]) -> Result<(), RpcError> {
        let mut payload = Vec::new();
        wire::write_path(&mut payload, path)?;
        wire::write_i64(&mut payload, offset)?;
        wire::write_bytes(&mut payload, data)?;
        crate::rpc::stub::call(
            self.handle.addr,
            WRITE,
            vec!["Path".into(), "int64".into(), "bytes".into()],
            payload,
        )
        .await?;
        Ok(())
    }
}

impl fmt::Display for StorageStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.handle.fmt(f)
    }
}
