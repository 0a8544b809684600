//! Common types shared across the Mirrorgate workspace.
//!
//! This crate defines:
//! - `RpcError`: the JSON-RPC error model with the gateway's stable codes
//! - `RpcRequest` / `RpcResponse`: the JSON-RPC 2.0 envelope
//! - `RequestContext`: per-invocation metadata for logging and rate limiting

pub mod context;
pub mod envelope;
pub mod error;
pub mod utils;

pub use context::RequestContext;
pub use envelope::{RpcRequest, RpcResponse};
pub use error::RpcError;
