//! Error kinds shared by every RPC interface in this crate.
//!
//! Every fallible remote method returns `Result<T, RpcError>`. The wire codec
//! ([`crate::rpc::wire`]) knows how to serialize and deserialize `RpcError`
//! so that an exception raised inside a skeleton's target method is carried
//! back to the stub's caller with its kind intact.

use std::fmt;

use num_derive::{FromPrimitive, ToPrimitive};

/// The kind of failure an RPC call, or a local operation on its behalf,
/// can report.
///
/// The discriminants double as the wire tag written by
/// [`crate::rpc::wire::write_rpc_error`]; deriving `ToPrimitive`/
/// `FromPrimitive` keeps the tag and the enum in lockstep instead of a
/// hand-maintained match in two places.
#[derive(Debug, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum ErrorKind {
    /// The referenced path (or storage/command endpoint) does not exist.
    NotFound = 0,
    /// An argument's value is invalid for the operation (e.g. an unlock with
    /// no matching prior lock).
    InvalidArgument = 1,
    /// A read or write range falls outside the addressable file.
    OutOfBounds = 2,
    /// The operation cannot proceed given the server's current state (e.g.
    /// `createFile` with no storage server registered).
    IllegalState = 3,
    /// A required reference argument was absent on the wire.
    NullArgument = 4,
    /// A local filesystem operation on a storage server failed.
    Io = 5,
    /// The RPC transport itself failed (connect, read, or write error).
    Rpc = 6,
    /// The server is misconfigured (e.g. a skeleton built for a
    /// non-remote interface).
    Fatal = 7,
}

/// An error carried across the RPC boundary.
///
/// `inner` is populated only when this error wraps another (the
/// invocation-target case: a skeleton re-raises the target method's own
/// error, preserving its kind, rather than collapsing it to a generic
/// transport failure).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub kind: ErrorKind,
    pub message: String,
    pub inner: Option<Box<RpcError>>,
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        RpcError { kind, message: message.into(), inner: None }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn out_of_bounds(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutOfBounds, message)
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IllegalState, message)
    }

    pub fn null_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NullArgument, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn rpc(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rpc, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// Wraps `self` as the invocation target of a freshly raised error of
    /// `kind`, so that the original error's kind survives a re-raise.
    pub fn wrap(self, kind: ErrorKind, message: impl Into<String>) -> Self {
        RpcError { kind, message: message.into(), inner: Some(Box::new(self)) }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(inner) = &self.inner {
            write!(f, " (caused by {inner})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => RpcError::not_found(err.to_string()),
            _ => RpcError::io(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_preserves_inner_kind() {
        let inner = RpcError::not_found("/a");
        let outer = inner.clone().wrap(ErrorKind::Rpc, "invocation failed");
        assert_eq!(outer.kind, ErrorKind::Rpc);
        assert_eq!(outer.inner.as_deref(), Some(&inner));
    }

    #[test]
    fn io_not_found_maps_to_not_found_kind() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let mapped: RpcError = io_err.into();
        assert_eq!(mapped.kind, ErrorKind::NotFound);
    }
}
