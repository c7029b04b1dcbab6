//! Wire types, schema registry and patch engine shared across `client-port`
//! transport backends.
//!
//! This crate is pure data: no I/O, no async runtime. The async engine that
//! actually drives a connection lives in `client-port`.

pub mod error;
pub mod frame;
pub mod patch;
pub mod registry;
pub mod tag;

pub use error::{Error, RemoteError, Result, SerializedError, TransportError, ValidationIssue};
pub use frame::{AckId, CallId, ChannelId, Frame, SubscribeId};
pub use patch::{apply_patches, produce, Patch, PatchError, PatchOp, PathSegment};
pub use registry::{
    AnySchema, ChannelSchemas, EndpointDescriptor, Registry, RpcSchemas, SchemaFn, Schema,
    SignalSchemas, Validator,
};
pub use tag::{concat_tags, WriteTag};
