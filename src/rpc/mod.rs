//! A small reflective RPC substrate: a wire envelope format, a generic
//! server-side [`skeleton::Skeleton`], and a client-side [`stub::call`]
//! helper, on top of which each interface module ([`crate::naming::service`],
//! [`crate::naming::registration`], [`crate::storage::service`],
//! [`crate::storage::command`]) builds its own typed call encoding and stub
//! struct.

pub mod codec;
pub mod skeleton;
pub mod stub;
pub mod wire;

pub use skeleton::{Dispatch, Skeleton};
pub use stub::{Handle, InterfaceId};
