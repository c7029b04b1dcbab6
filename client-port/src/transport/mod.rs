//! The Frame Transport contract: an abstract bidirectional frame channel,
//! provided by a collaborator. `client-port` only depends on the trait
//! below; [`websocket::WebSocketTransport`] is one concrete, ready-to-use
//! implementation.

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(test)]
pub mod mock;

use client_port_core::{Frame, TransportError};
use std::sync::Arc;

/// Delivered to the port when the transport receives a frame.
pub type MessageSink = Arc<dyn Fn(Frame) + Send + Sync>;
/// Delivered to the port when the transport is terminally broken.
pub type ErrorSink = Arc<dyn Fn(TransportError) + Send + Sync>;

/// The abstract bidirectional frame channel the port multiplexes over.
///
/// Implementors provide ordered, fire-and-forget `send`, and are expected to
/// invoke the `MessageSink`/`ErrorSink` they were constructed with whenever
/// a frame arrives or the connection is lost. `notify_*` are edge callbacks
/// the port calls *into* the transport when the open-communications count
/// crosses zero, useful for idle shutdown; a transport with no interest in
/// idle shutdown can leave them as no-ops.
pub trait FrameTransport: Send + Sync {
    fn send(&self, frame: Frame) -> Result<(), TransportError>;
    fn close(&self);
    fn notify_no_open_communication(&self) {}
    fn notify_one_or_more_open_communication(&self) {}
}

/// Constructs a transport exactly once, at port construction. Receives
/// the callbacks the transport must invoke for inbound frames and
/// terminal errors, plus the `log` target the transport should record its
/// own diagnostics under (the "parent logger" of `ClientPortOptions`).
pub type TransportFactory =
    Box<dyn FnOnce(MessageSink, ErrorSink, String) -> Arc<dyn FrameTransport> + Send>;
