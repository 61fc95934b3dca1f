//! distfs - A small distributed filesystem.
//!
//! One naming server holds the metadata namespace and a per-node lock
//! manager; any number of storage servers hold file bytes and register
//! themselves with the naming server at startup. Clients talk to both
//! through a small reflective RPC substrate ([`rpc`]).

pub mod config;
pub mod error;
pub mod naming;
pub mod path;
pub mod rpc;
pub mod storage;
