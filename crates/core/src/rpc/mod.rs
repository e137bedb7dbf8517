//! Remote procedure calls on replicated entities.

mod call;
mod dispatch;
mod method;
mod value;

pub use call::{DeliveryMode, Invocation, RpcCall};
pub use dispatch::{BufferedCall, RpcDispatcher};
pub use method::{MethodDescriptor, MethodIndex, MethodTable};
pub use value::RpcValue;

use crate::directory::InstanceId;
use crate::session::SessionError;
use crate::wire::WireError;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("unknown method {0:?}")]
    UnknownMethod(String),
    #[error("{method} takes {expected} arguments, got {actual}")]
    ArgumentCount {
        method: String,
        expected: usize,
        actual: usize,
    },
    #[error("unknown instance {0}")]
    UnknownInstance(InstanceId),
    #[error("not the owner of {0}")]
    NotOwner(InstanceId),
    #[error("targeted calls may only be issued by the server")]
    TargetFromClient,
    #[error("target call needs a known connection as its first argument")]
    InvalidTarget,
    #[error("not connected")]
    NotConnected,
    #[error("method {0:?} registered twice")]
    DuplicateMethod(String),
    #[error("method table full")]
    TableFull,
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Why the server refused a call from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotOwner,
    TargetFromClient,
    UnknownMethod,
    ArgumentCount,
}
