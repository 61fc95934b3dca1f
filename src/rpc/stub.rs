//! Client-side RPC proxy: opens a connection, sends a call envelope, and
//! returns the result or re-raises the remote exception.

use std::fmt;
use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::error::RpcError;
use crate::rpc::codec::{self, CallEnvelope, ResponseEnvelope};

/// Which remote interface a [`Handle`] addresses. Used only to distinguish
/// otherwise-identical addresses for equality/hashing, the way two proxies
/// to the same host:port but different interfaces must not compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceId {
    Service,
    Registration,
    Storage,
    Command,
}

impl InterfaceId {
    fn tag(self) -> &'static str {
        match self {
            InterfaceId::Service => "Service",
            InterfaceId::Registration => "Registration",
            InterfaceId::Storage => "Storage",
            InterfaceId::Command => "Command",
        }
    }
}

/// A remote endpoint identity: which interface, and which address. Two
/// handles are equal iff both match; this is what every generated stub type
/// embeds to get object-identity semantics without ever calling the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub interface: InterfaceId,
    pub addr: SocketAddr,
}

impl Handle {
    pub fn new(interface: InterfaceId, addr: SocketAddr) -> Self {
        Handle { interface, addr }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.interface.tag(), self.addr)
    }
}

/// Performs one remote invocation: connect, send the call envelope,
/// half-close the write side, read the response envelope, close.
///
/// `method`/`type_tags` become the wire call's name and argument type tags;
/// `payload` is the pre-encoded argument tuple from the calling interface's
/// own codec.
pub async fn call(
    addr: SocketAddr,
    method: &str,
    type_tags: Vec<String>,
    payload: Vec<u8>,
) -> Result<Vec<u8>, RpcError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| RpcError::rpc(format!("connect to {addr}: {e}")))?;

    let envelope = CallEnvelope { method: method.to_owned(), type_tags, payload };
    codec::write_call(&mut stream, &envelope)
        .await
        .map_err(|e| RpcError::rpc(format!("write call to {addr}: {e}")))?;
    let _ = stream.shutdown().await;

    match codec::read_response(&mut stream)
        .await
        .map_err(|e| RpcError::rpc(format!("read response from {addr}: {e}")))?
    {
        ResponseEnvelope::Ok(bytes) => Ok(bytes),
        ResponseEnvelope::Err(error) => Err(error),
    }
}
