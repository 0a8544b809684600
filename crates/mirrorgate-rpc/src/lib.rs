//! JSON-RPC request pipeline: parameter validation, method dispatch, and
//! the per-sender serialization facade used by the transaction-submission
//! path.

pub mod backend;
pub mod dispatch;
pub mod eth;
pub mod serialize;
pub mod validation;

pub use backend::{BackendError, MemoryBackend, MirrorBackend};
pub use dispatch::{DispatcherConfig, ParamLayout, ParamSpec, RpcDispatcher};
pub use eth::EthService;
pub use serialize::{SenderSerializer, SerializeError};
