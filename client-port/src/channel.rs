//! The Channel handle: a long-lived, bidirectional stream with per-message
//! acknowledgements.

use crate::port::ClientPort;
use crate::stack::CapturedStack;
use client_port_core::{AckId, ChannelId, Result};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// What closed a channel: the `onClose`/`onError` terminal outcomes.
#[derive(Debug, Clone)]
pub enum ChannelTerminal {
    Closed,
    Errored(Arc<dyn std::error::Error + Send + Sync>),
}

/// Where inbound `channelSend` payloads go: either a user callback invoked
/// synchronously from the port's dispatch loop, or a queue the [`Channel`]
/// handle drains with [`Channel::recv`].
pub(crate) enum InboundSink {
    Callback(Arc<dyn Fn(Value) + Send + Sync>),
    Queue(mpsc::UnboundedSender<Value>),
}

/// The port's bookkeeping for one open channel, the `OpenChannel` in-flight
/// record. Lives in [`crate::port::ClientPort`]'s table, keyed by
/// `channelId`.
pub(crate) struct OpenChannelRecord {
    pub endpoint: String,
    pub inbound: InboundSink,
    pub acks: Arc<DashMap<AckId, oneshot::Sender<()>>>,
    pub terminal: std::sync::Mutex<Option<oneshot::Sender<ChannelTerminal>>>,
    /// The caller's stack at `create_channel` time, attributed into a
    /// `channelError`'s deserialized error when verbose errors are on.
    pub stack: CapturedStack,
}

/// Resolves once the server acknowledges the `channelSend` it was returned
/// from. Dropping it without awaiting is fire-and-forget.
pub struct AckWait(oneshot::Receiver<()>);

impl Future for AckWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<()> {
        let this = self.get_mut();
        Pin::new(&mut this.0).poll(cx).map(|_| ())
    }
}

/// The user-facing bidirectional object returned by
/// [`crate::port::ClientPort::create_channel`].
pub struct Channel {
    channel_id: ChannelId,
    endpoint: String,
    port: ClientPort,
    acks: Arc<DashMap<AckId, oneshot::Sender<()>>>,
    next_ack_id: AtomicU64,
    message_rx: Option<mpsc::UnboundedReceiver<Value>>,
    terminal_rx: Option<oneshot::Receiver<ChannelTerminal>>,
}

impl Channel {
    pub(crate) fn new(
        channel_id: ChannelId,
        endpoint: String,
        port: ClientPort,
        acks: Arc<DashMap<AckId, oneshot::Sender<()>>>,
        message_rx: Option<mpsc::UnboundedReceiver<Value>>,
        terminal_rx: oneshot::Receiver<ChannelTerminal>,
    ) -> Self {
        Self {
            channel_id,
            endpoint,
            port,
            acks,
            next_ack_id: AtomicU64::new(0),
            message_rx,
            terminal_rx: Some(terminal_rx),
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Sends one packet, validated against `toServerPacket`, and returns a
    /// handle resolved when the server acks it.
    pub fn send<T: Serialize>(&self, packet: T) -> Result<AckWait> {
        let value = serde_json::to_value(packet).expect("packet must serialize to JSON");
        self.port
            .validate_channel_outbound(&self.endpoint, &value)?;
        let ack_id = self.next_ack_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.acks.insert(ack_id, tx);
        self.port
            .send_channel_message(self.channel_id, value, Some(ack_id))?;
        Ok(AckWait(rx))
    }

    /// Drains the next inbound message. Only yields values if this channel
    /// was created without an `onMessage` callback; returns `None` once the
    /// channel has closed and its queue is drained.
    pub async fn recv(&mut self) -> Option<Value> {
        match &mut self.message_rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Resolves once the channel closes, either normally or with an error.
    /// Resolves exactly once; subsequent calls return
    /// [`ChannelTerminal::Closed`] immediately.
    pub async fn closed(&mut self) -> ChannelTerminal {
        match self.terminal_rx.take() {
            Some(rx) => rx.await.unwrap_or(ChannelTerminal::Closed),
            None => ChannelTerminal::Closed,
        }
    }
}
