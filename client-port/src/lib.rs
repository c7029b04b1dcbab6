//! The async Client Port engine: a multiplexer over one
//! [`transport::FrameTransport`] that turns the wire protocol and schema
//! registry from `client-port-core` into RPCs, channels, and signals.

pub mod channel;
pub mod error_deserializer;
pub mod port;
pub mod setter;
pub mod signal;
pub mod stack;
pub mod transport;

pub use channel::{AckWait, Channel, ChannelTerminal};
pub use error_deserializer::{DefaultErrorDeserializer, ErrorDeserializer};
pub use port::{ClientPort, ClientPortOptions};
pub use setter::{PrimitiveUpdater, Setter, Write};
pub use signal::{LazySignal, LazySubscription, Observed, OwlSignal, OwlSubscription, Signal, SignalError, TypedSubscription};
pub use stack::CapturedStack;
pub use transport::{ErrorSink, FrameTransport, MessageSink, TransportFactory};

pub use client_port_core::{
    apply_patches, concat_tags, produce, AckId, CallId, ChannelId, Error, Frame, Patch, PatchError,
    PatchOp, PathSegment, Registry, RemoteError, Result, SchemaFn, SerializedError, SubscribeId,
    TransportError, ValidationIssue, WriteTag,
};

#[cfg(feature = "websocket")]
pub use transport::websocket::{factory as websocket_transport_factory, WebSocketTransport};

#[cfg(test)]
mod scenario_tests;
