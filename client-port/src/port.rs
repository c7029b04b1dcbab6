//! The Client Port: the multiplexer that ties every other piece of this
//! crate together. Assigns IDs, validates payloads against the registry,
//! demultiplexes inbound frames to the right in-flight record, drives
//! subscription lifecycles, and turns protocol sanity failures into
//! communication warnings instead of fatal errors.

use crate::channel::{Channel, ChannelTerminal, InboundSink, OpenChannelRecord};
use crate::error_deserializer::{DefaultErrorDeserializer, ErrorDeserializer};
use crate::setter::Setter;
use crate::signal::lazy::{LazySignal, SubscribeUpstream, Teardown};
use crate::signal::{OwlInner, OwlSignal, Signal};
use crate::stack::CapturedStack;
use crate::transport::{ErrorSink, FrameTransport, MessageSink, TransportFactory};
use client_port_core::{
    AckId, CallId, ChannelId, Error, Frame, Patch, Registry, Result, SerializedError, SubscribeId,
    TransportError, WriteTag,
};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use tokio::sync::{mpsc, oneshot};

/// Construction options, analogous to the teacher's `smart_default`-derived
/// option structs.
#[derive(Clone, smart_default::SmartDefault)]
pub struct ClientPortOptions {
    /// When set, a deserialized remote error's stack is replaced with the
    /// captured client call-site; when unset, it is cleared.
    #[default(false)]
    pub verbose_errors: bool,
    /// Total communication warnings emitted to the peer before the port
    /// falls silent. Defaults to 5.
    #[default(5)]
    pub warning_cap: u32,
    /// Namespaces this port's `log` records. Defaults to the crate's own
    /// target when absent.
    pub logger_target: Option<String>,
    /// Turns a wire `SerializedError` into a language-native one. Defaults
    /// to [`DefaultErrorDeserializer`].
    pub error_deserializer: Option<Arc<dyn ErrorDeserializer>>,
}

struct OngoingRpc {
    endpoint: String,
    resolver: oneshot::Sender<std::result::Result<Value, Error>>,
    #[allow(dead_code)] // carried for symmetry with the other in-flight records; not yet read back
    stack: CapturedStack,
}

struct OpenSignalSubscription {
    endpoint: String,
    lazy: LazySignal<Value>,
    stack: CapturedStack,
}

struct OpenWritableSignalSubscription {
    endpoint: String,
    owl: Arc<OwlInner>,
    stack: CapturedStack,
}

struct PortInner {
    registry: Arc<Registry>,
    transport: Arc<dyn FrameTransport>,
    options: ClientPortOptions,
    error_deserializer: Arc<dyn ErrorDeserializer>,
    logger_target: String,

    next_call_id: AtomicU64,
    next_signal_id: AtomicU64,
    next_writable_signal_id: AtomicU64,

    ongoing_rpcs: DashMap<CallId, OngoingRpc>,
    open_channels: DashMap<ChannelId, OpenChannelRecord>,
    signal_subscriptions: DashMap<SubscribeId, OpenSignalSubscription>,
    writable_signal_subscriptions: DashMap<SubscribeId, OpenWritableSignalSubscription>,

    open_count: AtomicI64,
    warning_count: AtomicU32,
}

/// The client-side multiplexer over one transport. Cheap to clone: every
/// clone shares the same tables, counters and transport handle, mirroring
/// the teacher's `NodeHandle`/`ClientHandle` pattern of a thin `Arc`-backed
/// handle type.
#[derive(Clone)]
pub struct ClientPort {
    inner: Arc<PortInner>,
}

impl ClientPort {
    /// Never blocks: builds the four in-flight tables and the three ID
    /// counters, calls `transport_factory` exactly once, and returns
    /// immediately. The transport may still be mid-handshake; that is the
    /// transport's contract to honor, not the port's.
    pub fn new(
        registry: Arc<Registry>,
        transport_factory: TransportFactory,
        options: ClientPortOptions,
    ) -> ClientPort {
        let logger_target = options
            .logger_target
            .clone()
            .unwrap_or_else(|| "client_port".to_owned());
        let error_deserializer = options
            .error_deserializer
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultErrorDeserializer));

        // The transport factory needs callbacks that dispatch back into
        // this port, but the port doesn't exist yet until the transport
        // does. `Arc::new_cyclic` gives the closures a `Weak` handle to the
        // not-yet-finished `Arc<PortInner>` so they can upgrade it lazily,
        // once the factory has actually started delivering frames.
        let inner = Arc::new_cyclic(|weak: &Weak<PortInner>| {
            let weak_msg = weak.clone();
            let on_message: MessageSink = Arc::new(move |frame: Frame| {
                if let Some(inner) = weak_msg.upgrade() {
                    ClientPort { inner }.handle_frame(frame);
                }
            });
            let weak_err = weak.clone();
            let on_error: ErrorSink = Arc::new(move |err: TransportError| {
                if let Some(inner) = weak_err.upgrade() {
                    ClientPort { inner }.handle_transport_error(err);
                }
            });
            let transport = transport_factory(on_message, on_error, logger_target.clone());

            PortInner {
                registry,
                transport,
                options,
                error_deserializer,
                logger_target,
                next_call_id: AtomicU64::new(0),
                next_signal_id: AtomicU64::new(0),
                next_writable_signal_id: AtomicU64::new(0),
                ongoing_rpcs: DashMap::new(),
                open_channels: DashMap::new(),
                signal_subscriptions: DashMap::new(),
                writable_signal_subscriptions: DashMap::new(),
                open_count: AtomicI64::new(0),
                warning_count: AtomicU32::new(0),
            }
        });

        ClientPort { inner }
    }

    /// Needed for a program to exit cleanly: behaves as if the transport
    /// had reported [`TransportError::Shutdown`], then closes the
    /// transport.
    pub fn shutdown(&self) {
        self.handle_transport_error(TransportError::Shutdown);
        self.inner.transport.close();
    }

    /// The number of currently open communications across all four
    /// tables.
    pub fn open_communication_count(&self) -> i64 {
        self.inner.open_count.load(Ordering::SeqCst)
    }

    // -- RPC call -----------------------------------------------------------

    #[track_caller]
    pub async fn call_rpc<P, R>(&self, name: &str, param: P, stack: Option<CapturedStack>) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let stack = stack.unwrap_or_else(CapturedStack::capture);
        let schemas = self
            .inner
            .registry
            .get(name)
            .and_then(|d| d.as_rpc())
            .ok_or_else(|| Error::NoSuchEndpoint(name.to_owned()))?;
        let parameter = serde_json::to_value(&param).expect("rpc parameter must serialize to JSON");
        schemas
            .parameter
            .validate(&parameter)
            .map_err(|issue| Error::InvalidParameter {
                endpoint: name.to_owned(),
                issue,
            })?;

        let call_id = self.inner.next_call_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner.ongoing_rpcs.insert(
            call_id,
            OngoingRpc {
                endpoint: name.to_owned(),
                resolver: tx,
                stack,
            },
        );
        self.bump_open();

        if let Err(e) = self.inner.transport.send(Frame::RpcCall {
            endpoint: name.to_owned(),
            call_id,
            parameter,
        }) {
            self.inner.ongoing_rpcs.remove(&call_id);
            self.drop_open();
            return Err(Error::Transport(e));
        }

        match rx.await {
            Ok(Ok(value)) => Ok(serde_json::from_value(value).expect("rpc result must deserialize to R")),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Transport(TransportError::Shutdown)),
        }
    }

    // -- Channel --------------------------------------------------------------

    #[track_caller]
    pub fn create_channel<P: Serialize>(
        &self,
        name: &str,
        param: P,
        on_message: Option<Arc<dyn Fn(Value) + Send + Sync>>,
        stack: Option<CapturedStack>,
    ) -> Result<Channel> {
        let stack = stack.unwrap_or_else(CapturedStack::capture);
        let schemas = self
            .inner
            .registry
            .get(name)
            .and_then(|d| d.as_channel())
            .ok_or_else(|| Error::NoSuchEndpoint(name.to_owned()))?;
        let creation_parameter =
            serde_json::to_value(&param).expect("channel creation parameter must serialize to JSON");
        schemas
            .creation_parameter
            .validate(&creation_parameter)
            .map_err(|issue| Error::InvalidParameter {
                endpoint: name.to_owned(),
                issue,
            })?;

        let channel_id = self.inner.next_call_id.fetch_add(1, Ordering::SeqCst);
        let acks = Arc::new(DashMap::new());
        let (terminal_tx, terminal_rx) = oneshot::channel();
        let (inbound, message_rx) = match on_message {
            Some(cb) => (InboundSink::Callback(cb), None),
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (InboundSink::Queue(tx), Some(rx))
            }
        };
        self.inner.open_channels.insert(
            channel_id,
            OpenChannelRecord {
                endpoint: name.to_owned(),
                inbound,
                acks: acks.clone(),
                terminal: Mutex::new(Some(terminal_tx)),
                stack,
            },
        );
        self.bump_open();

        if let Err(e) = self.inner.transport.send(Frame::ChannelCreate {
            endpoint: name.to_owned(),
            channel_id,
            creation_parameter,
        }) {
            self.inner.open_channels.remove(&channel_id);
            self.drop_open();
            return Err(Error::Transport(e));
        }

        Ok(Channel::new(
            channel_id,
            name.to_owned(),
            self.clone(),
            acks,
            message_rx,
            terminal_rx,
        ))
    }

    pub(crate) fn validate_channel_outbound(&self, endpoint: &str, value: &Value) -> Result<()> {
        let schemas = self
            .inner
            .registry
            .get(endpoint)
            .and_then(|d| d.as_channel())
            .ok_or_else(|| Error::NoSuchEndpoint(endpoint.to_owned()))?;
        schemas
            .to_server_packet
            .validate(value)
            .map_err(|issue| Error::InvalidParameter {
                endpoint: endpoint.to_owned(),
                issue,
            })
    }

    pub(crate) fn send_channel_message(
        &self,
        channel_id: ChannelId,
        message: Value,
        ack_id: Option<AckId>,
    ) -> Result<()> {
        self.inner
            .transport
            .send(Frame::ChannelSend {
                channel_id,
                message,
                ack_id,
            })
            .map_err(Error::Transport)
    }

    // -- Signal subscription ---------------------------------------------------

    #[track_caller]
    pub fn create_signal<T>(
        &self,
        name: &str,
        param: impl Serialize,
        stack: Option<CapturedStack>,
    ) -> Result<Signal<T>>
    where
        T: DeserializeOwned,
    {
        let stack = stack.unwrap_or_else(CapturedStack::capture);
        let schemas = self
            .inner
            .registry
            .get(name)
            .and_then(|d| d.as_signal())
            .ok_or_else(|| Error::NoSuchEndpoint(name.to_owned()))?;
        let creation_parameter =
            serde_json::to_value(&param).expect("signal creation parameter must serialize to JSON");
        schemas
            .creation_parameter
            .validate(&creation_parameter)
            .map_err(|issue| Error::InvalidParameter {
                endpoint: name.to_owned(),
                issue,
            })?;

        let endpoint = name.to_owned();
        let port = self.clone();
        let holder: Arc<OnceLock<LazySignal<Value>>> = Arc::new(OnceLock::new());
        let holder_for_closure = holder.clone();
        let subscribe_upstream: SubscribeUpstream<Value> = Arc::new(move |_value_listener, _error_listener| {
            let lazy = holder_for_closure
                .get()
                .expect("lazy signal installed before its own first subscribe")
                .clone();
            port.install_signal_subscription(endpoint.clone(), creation_parameter.clone(), stack.clone(), lazy)
        });
        let lazy = LazySignal::new(subscribe_upstream);
        let _ = holder.set(lazy.clone());
        Ok(Signal::new(lazy))
    }

    fn install_signal_subscription(
        &self,
        endpoint: String,
        creation_parameter: Value,
        stack: CapturedStack,
        lazy: LazySignal<Value>,
    ) -> Teardown {
        let subscribe_id = self.inner.next_signal_id.fetch_add(1, Ordering::SeqCst);
        self.inner.signal_subscriptions.insert(
            subscribe_id,
            OpenSignalSubscription {
                endpoint: endpoint.clone(),
                lazy,
                stack,
            },
        );
        self.bump_open();
        let _ = self.inner.transport.send(Frame::SignalSubscribe {
            endpoint,
            subscribe_id,
            creation_parameter,
        });

        let port = self.clone();
        Box::new(move || port.teardown_signal_subscription(subscribe_id))
    }

    fn teardown_signal_subscription(&self, subscribe_id: SubscribeId) {
        if self.inner.signal_subscriptions.remove(&subscribe_id).is_some() {
            let _ = self.inner.transport.send(Frame::SignalUnsubscribe { subscribe_id });
            self.drop_open();
        }
    }

    // -- Writable signal --------------------------------------------------------

    #[track_caller]
    pub fn create_writable_signal<T>(
        &self,
        name: &str,
        param: impl Serialize,
        stack: Option<CapturedStack>,
    ) -> Result<(OwlSignal<T>, Setter<T>)>
    where
        T: Serialize + DeserializeOwned + Send + Sync + Clone + 'static,
    {
        let stack = stack.unwrap_or_else(CapturedStack::capture);
        let schemas = self
            .inner
            .registry
            .get(name)
            .and_then(|d| d.as_writable_signal())
            .ok_or_else(|| Error::NoSuchEndpoint(name.to_owned()))?;
        let creation_parameter =
            serde_json::to_value(&param).expect("writable signal creation parameter must serialize to JSON");
        schemas
            .creation_parameter
            .validate(&creation_parameter)
            .map_err(|issue| Error::InvalidParameter {
                endpoint: name.to_owned(),
                issue,
            })?;

        let endpoint = name.to_owned();
        // Captures the subscribeId of the *current* upstream session: each
        // detach nulls it so stray upstream writes fail fast.
        let active_subscribe_id: Arc<Mutex<Option<SubscribeId>>> = Arc::new(Mutex::new(None));

        let upstream_write = {
            let port = self.clone();
            let active_subscribe_id = active_subscribe_id.clone();
            Arc::new(move |patches: Vec<Patch>, tags: Vec<WriteTag>| {
                let subscribe_id = active_subscribe_id
                    .lock()
                    .unwrap()
                    .ok_or(Error::NotSubscribed)?;
                port.inner
                    .transport
                    .send(Frame::WritableSignalUpdate {
                        subscribe_id,
                        patches,
                        tags,
                    })
                    .map_err(Error::Transport)
            })
        };

        let port = self.clone();
        let holder: Arc<OnceLock<Arc<OwlInner>>> = Arc::new(OnceLock::new());
        let holder_for_closure = holder.clone();
        let subscribe_upstream: SubscribeUpstream<Value> = Arc::new(move |_value_listener, _error_listener| {
            let owl = holder_for_closure
                .get()
                .expect("owl core installed before its own first subscribe")
                .clone();
            port.install_writable_signal_subscription(
                endpoint.clone(),
                creation_parameter.clone(),
                stack.clone(),
                owl,
                active_subscribe_id.clone(),
            )
        });

        let signal = OwlSignal::<T>::new(subscribe_upstream, upstream_write);
        let _ = holder.set(signal.raw());
        let setter = signal.setter();
        Ok((signal, setter))
    }

    fn install_writable_signal_subscription(
        &self,
        endpoint: String,
        creation_parameter: Value,
        stack: CapturedStack,
        owl: Arc<OwlInner>,
        active_subscribe_id: Arc<Mutex<Option<SubscribeId>>>,
    ) -> Teardown {
        let subscribe_id = self.inner.next_writable_signal_id.fetch_add(1, Ordering::SeqCst);
        *active_subscribe_id.lock().unwrap() = Some(subscribe_id);
        self.inner.writable_signal_subscriptions.insert(
            subscribe_id,
            OpenWritableSignalSubscription {
                endpoint: endpoint.clone(),
                owl,
                stack,
            },
        );
        self.bump_open();
        let _ = self.inner.transport.send(Frame::WritableSignalSubscribe {
            endpoint,
            subscribe_id,
            creation_parameter,
        });

        let port = self.clone();
        Box::new(move || port.teardown_writable_signal_subscription(subscribe_id, active_subscribe_id))
    }

    fn teardown_writable_signal_subscription(
        &self,
        subscribe_id: SubscribeId,
        active_subscribe_id: Arc<Mutex<Option<SubscribeId>>>,
    ) {
        *active_subscribe_id.lock().unwrap() = None;
        if self
            .inner
            .writable_signal_subscriptions
            .remove(&subscribe_id)
            .is_some()
        {
            let _ = self
                .inner
                .transport
                .send(Frame::WritableSignalUnsubscribe { subscribe_id });
            self.drop_open();
        }
    }

    // -- inbound dispatch -------------------------------------------------------

    fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::RpcResult { call_id, result } => self.handle_rpc_result(call_id, result),
            Frame::RpcError { call_id, error } => self.handle_rpc_error(call_id, error),
            Frame::ChannelSend { channel_id, message, .. } => self.handle_channel_send(channel_id, message),
            Frame::ChannelAck { channel_id, ack_id } => self.handle_channel_ack(channel_id, ack_id),
            Frame::ChannelClose { channel_id } => self.handle_channel_close(channel_id),
            Frame::ChannelError { channel_id, error } => self.handle_channel_error(channel_id, error),
            Frame::SignalUpdate { subscribe_id, patches, tags } => {
                self.handle_signal_update(subscribe_id, patches, tags)
            }
            Frame::SignalError { subscribe_id, error } => self.handle_signal_error(subscribe_id, error),
            Frame::WritableSignalUpdate { subscribe_id, patches, tags } => {
                self.handle_writable_signal_update(subscribe_id, patches, tags)
            }
            Frame::WritableSignalError { subscribe_id, error } => {
                self.handle_writable_signal_error(subscribe_id, error)
            }
            Frame::CommunicationWarning { warning } => {
                log::warn!(target: &self.inner.logger_target, "peer reported a communication warning: {warning}");
            }
            Frame::KeepAliveAck {} => {
                // accepted and ignored: the port issues no keep-alive traffic
                // itself, so there is nothing to match it to
            }
            other => {
                self.communication_warning(format!(
                    "received an outbound-only frame kind from the peer: {}",
                    other.kind()
                ));
            }
        }
    }

    fn handle_rpc_result(&self, call_id: CallId, result: Value) {
        let endpoint = match self.inner.ongoing_rpcs.get(&call_id) {
            Some(entry) => entry.endpoint.clone(),
            None => {
                self.communication_warning(format!("rpcResult for unknown callId {call_id}"));
                return;
            }
        };
        let valid = self
            .inner
            .registry
            .get(&endpoint)
            .and_then(|d| d.as_rpc())
            .map(|schemas| schemas.returns.validate(&result).is_ok())
            .unwrap_or(false);
        if !valid {
            self.communication_warning(format!("rpcResult for callId {call_id} failed returns validation"));
            return;
        }
        if let Some((_, rpc)) = self.inner.ongoing_rpcs.remove(&call_id) {
            self.drop_open();
            let _ = rpc.resolver.send(Ok(result));
        }
    }

    fn handle_rpc_error(&self, call_id: CallId, error: SerializedError) {
        let Some((_, rpc)) = self.inner.ongoing_rpcs.remove(&call_id) else {
            self.communication_warning(format!("rpcError for unknown callId {call_id}"));
            return;
        };
        self.drop_open();
        let stack = self.attributed_stack(&rpc.stack);
        let remote = self.inner.error_deserializer.deserialize(error, stack);
        let _ = rpc.resolver.send(Err(Error::Remote(remote)));
    }

    fn handle_channel_send(&self, channel_id: ChannelId, message: Value) {
        let Some(entry) = self.inner.open_channels.get(&channel_id) else {
            self.communication_warning(format!("channelSend for unknown channelId {channel_id}"));
            return;
        };
        let valid = self
            .inner
            .registry
            .get(&entry.endpoint)
            .and_then(|d| d.as_channel())
            .map(|schemas| schemas.to_client_packet.validate(&message).is_ok())
            .unwrap_or(false);
        if !valid {
            drop(entry);
            self.communication_warning(format!(
                "channelSend for channelId {channel_id} failed toClientPacket validation"
            ));
            return;
        }
        match &entry.inbound {
            InboundSink::Callback(cb) => cb(message),
            InboundSink::Queue(tx) => {
                let _ = tx.send(message);
            }
        }
    }

    fn handle_channel_ack(&self, channel_id: ChannelId, ack_id: AckId) {
        let Some(entry) = self.inner.open_channels.get(&channel_id) else {
            self.communication_warning(format!("channelAck for unknown channelId {channel_id}"));
            return;
        };
        let waiter = entry.acks.remove(&ack_id);
        drop(entry);
        match waiter {
            Some((_, tx)) => {
                let _ = tx.send(());
            }
            None => {
                self.communication_warning(format!("channelAck for unknown ackId {ack_id} on channelId {channel_id}"));
            }
        }
    }

    fn handle_channel_close(&self, channel_id: ChannelId) {
        let Some((_, record)) = self.inner.open_channels.remove(&channel_id) else {
            self.communication_warning(format!("channelClose for unknown channelId {channel_id}"));
            return;
        };
        self.drop_open();
        if let Some(tx) = record.terminal.lock().unwrap().take() {
            let _ = tx.send(ChannelTerminal::Closed);
        }
    }

    fn handle_channel_error(&self, channel_id: ChannelId, error: SerializedError) {
        let Some((_, record)) = self.inner.open_channels.remove(&channel_id) else {
            self.communication_warning(format!("channelError for unknown channelId {channel_id}"));
            return;
        };
        self.drop_open();
        let stack = self.attributed_stack(&record.stack);
        let remote = self.inner.error_deserializer.deserialize(error, stack);
        if let Some(tx) = record.terminal.lock().unwrap().take() {
            let _ = tx.send(ChannelTerminal::Errored(remote));
        }
    }

    fn handle_signal_update(&self, subscribe_id: SubscribeId, patches: Vec<Patch>, tags: Vec<WriteTag>) {
        let Some(entry) = self.inner.signal_subscriptions.get(&subscribe_id) else {
            self.communication_warning(format!("signalUpdate for unknown subscribeId {subscribe_id}"));
            return;
        };
        let endpoint = entry.endpoint.clone();
        let lazy = entry.lazy.clone();
        drop(entry);

        let current = lazy.get().unwrap_or(Value::Null);
        let new_value = match client_port_core::apply_patches(&current, &patches) {
            Ok(v) => v,
            Err(e) => {
                self.communication_warning(format!(
                    "signalUpdate for subscribeId {subscribe_id} could not be applied: {e}"
                ));
                return;
            }
        };
        let valid = self
            .inner
            .registry
            .get(&endpoint)
            .and_then(|d| d.as_signal())
            .map(|schemas| schemas.signal_data.validate(&new_value).is_ok())
            .unwrap_or(false);
        if !valid {
            self.communication_warning(format!(
                "signalUpdate for subscribeId {subscribe_id} failed signalData validation"
            ));
            return;
        }
        lazy.set_checked(new_value, tags);
    }

    fn handle_signal_error(&self, subscribe_id: SubscribeId, error: SerializedError) {
        let Some((_, entry)) = self.inner.signal_subscriptions.remove(&subscribe_id) else {
            self.communication_warning(format!("signalError for unknown subscribeId {subscribe_id}"));
            return;
        };
        self.drop_open();
        let stack = self.attributed_stack(&entry.stack);
        let remote = self.inner.error_deserializer.deserialize(error, stack);
        entry.lazy.deliver_error(remote);
    }

    fn handle_writable_signal_update(&self, subscribe_id: SubscribeId, patches: Vec<Patch>, tags: Vec<WriteTag>) {
        let Some(entry) = self.inner.writable_signal_subscriptions.get(&subscribe_id) else {
            self.communication_warning(format!("writableSignalUpdate for unknown subscribeId {subscribe_id}"));
            return;
        };
        let endpoint = entry.endpoint.clone();
        let owl = entry.owl.clone();
        drop(entry);

        // Read current *after* any pending optimistic writes:
        // `current_raw` is the post-optimistic value, never the last
        // server-confirmed one.
        let current = owl.current_raw();
        let new_value = match client_port_core::apply_patches(&current, &patches) {
            Ok(v) => v,
            Err(e) => {
                self.communication_warning(format!(
                    "writableSignalUpdate for subscribeId {subscribe_id} could not be applied: {e}"
                ));
                return;
            }
        };
        let valid = self
            .inner
            .registry
            .get(&endpoint)
            .and_then(|d| d.as_writable_signal())
            .map(|schemas| schemas.signal_data.validate(&new_value).is_ok())
            .unwrap_or(false);
        if !valid {
            self.communication_warning(format!(
                "writableSignalUpdate for subscribeId {subscribe_id} failed signalData validation"
            ));
            return;
        }
        owl.commit(new_value, tags);
    }

    fn handle_writable_signal_error(&self, subscribe_id: SubscribeId, error: SerializedError) {
        let Some((_, entry)) = self.inner.writable_signal_subscriptions.remove(&subscribe_id) else {
            self.communication_warning(format!("writableSignalError for unknown subscribeId {subscribe_id}"));
            return;
        };
        self.drop_open();
        let stack = self.attributed_stack(&entry.stack);
        let remote = self.inner.error_deserializer.deserialize(error, stack);
        entry.owl.deliver_error(remote);
    }

    // -- Transport error propagation ---------------------------------------------

    fn handle_transport_error(&self, err: TransportError) {
        log::error!(target: &self.inner.logger_target, "transport reported a terminal error: {err}");

        let rpc_ids: Vec<CallId> = self.inner.ongoing_rpcs.iter().map(|e| *e.key()).collect();
        for id in rpc_ids {
            if let Some((_, rpc)) = self.inner.ongoing_rpcs.remove(&id) {
                self.drop_open();
                let _ = rpc.resolver.send(Err(Error::Transport(err.clone())));
            }
        }

        // Signal subscriptions are deliberately left alone here: they rely
        // on the transport's own subscription-close semantics after
        // reconnect, rather than being torn down by us.
        let channel_ids: Vec<ChannelId> = self.inner.open_channels.iter().map(|e| *e.key()).collect();
        for id in channel_ids {
            if let Some((_, record)) = self.inner.open_channels.remove(&id) {
                self.drop_open();
                if let Some(tx) = record.terminal.lock().unwrap().take() {
                    let _ = tx.send(ChannelTerminal::Errored(Arc::new(err.clone())));
                }
            }
        }
    }

    // -- Communication warnings ---------------------------------------------------

    fn communication_warning(&self, text: String) {
        let count = self.inner.warning_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count <= self.inner.options.warning_cap {
            log::warn!(target: &self.inner.logger_target, "{text}");
            let _ = self.inner.transport.send(Frame::CommunicationWarning { warning: text });
        } else if count == self.inner.options.warning_cap + 1 {
            log::warn!(
                target: &self.inner.logger_target,
                "communication warnings suppressed after {} warnings",
                self.inner.options.warning_cap
            );
        }
    }

    // -- Stack capture -----------------------------------------------------------

    fn attributed_stack(&self, captured: &CapturedStack) -> String {
        if self.inner.options.verbose_errors {
            captured.as_str().to_owned()
        } else {
            String::new()
        }
    }

    // -- open-communications count -----------------------------------------------

    fn bump_open(&self) {
        let previous = self.inner.open_count.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            self.inner.transport.notify_one_or_more_open_communication();
        }
    }

    fn drop_open(&self) {
        let previous = self.inner.open_count.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            self.inner.transport.notify_no_open_communication();
        }
    }
}
