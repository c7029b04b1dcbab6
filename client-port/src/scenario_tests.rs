//! End-to-end coverage of the port's documented behavior, driven against
//! [`crate::transport::mock::MockTransport`] rather than a real socket.

use crate::port::{ClientPort, ClientPortOptions};
use crate::transport::mock::MockTransport;
use crate::transport::{ErrorSink, FrameTransport, MessageSink, TransportFactory};
use client_port_core::{
    AnySchema, ChannelSchemas, Frame, Registry, RpcSchemas, SchemaFn, SignalSchemas,
    TransportError, ValidationIssue,
};
use serde_json::json;
use std::sync::{Arc, OnceLock};

fn make_port(registry: Registry) -> (ClientPort, Arc<MockTransport>) {
    let slot: Arc<OnceLock<Arc<MockTransport>>> = Arc::new(OnceLock::new());
    let slot_for_factory = slot.clone();
    let factory: TransportFactory = Box::new(move |on_message: MessageSink, on_error: ErrorSink, _target: String| {
        let transport = MockTransport::new(on_message, on_error);
        let _ = slot_for_factory.set(transport.clone());
        transport as Arc<dyn FrameTransport>
    });
    let port = ClientPort::new(Arc::new(registry), factory, ClientPortOptions::default());
    let transport = slot.get().expect("factory runs synchronously").clone();
    (port, transport)
}

fn any_rpc() -> RpcSchemas {
    RpcSchemas {
        parameter: Box::new(AnySchema),
        returns: Box::new(AnySchema),
    }
}

fn int_pair_rpc() -> RpcSchemas {
    RpcSchemas {
        parameter: Box::new(SchemaFn(|v: &serde_json::Value| {
            if v.get("a").and_then(|x| x.as_i64()).is_some() && v.get("b").and_then(|x| x.as_i64()).is_some() {
                Ok(())
            } else {
                Err(ValidationIssue::new("expected {a: int, b: int}"))
            }
        })),
        returns: Box::new(AnySchema),
    }
}

fn counter_signal() -> SignalSchemas {
    SignalSchemas {
        creation_parameter: Box::new(AnySchema),
        signal_data: Box::new(SchemaFn(|v: &serde_json::Value| {
            if v.get("n").and_then(|x| x.as_i64()).is_some() {
                Ok(())
            } else {
                Err(ValidationIssue::new("expected {n: int}"))
            }
        })),
    }
}

fn any_channel() -> ChannelSchemas {
    ChannelSchemas {
        creation_parameter: Box::new(AnySchema),
        to_server_packet: Box::new(AnySchema),
        to_client_packet: Box::new(AnySchema),
    }
}

/// A successful call sends one frame and resolves with the returned value.
#[tokio::test]
async fn rpc_happy_path() {
    let mut registry = Registry::new();
    registry.add_rpc_endpoint("add", int_pair_rpc()).unwrap();
    let (port, transport) = make_port(registry);

    let call_port = port.clone();
    let call = tokio::spawn(async move {
        call_port
            .call_rpc::<_, i64>("add", json!({"a": 2, "b": 3}), None)
            .await
    });

    let sent = wait_for_sent(&transport, 1).await;
    assert_eq!(
        sent[0],
        Frame::RpcCall {
            endpoint: "add".into(),
            call_id: 0,
            parameter: json!({"a": 2, "b": 3}),
        }
    );
    assert_eq!(transport.drain_edges(), vec!["one_or_more"]);

    transport.feed(Frame::RpcResult { call_id: 0, result: json!(5) });
    let result = call.await.unwrap().unwrap();
    assert_eq!(result, 5);
    assert_eq!(port.open_communication_count(), 0);
    assert_eq!(transport.drain_edges(), vec!["no_open"]);
}

/// A parameter failing validation never reaches the transport and errors
/// synchronously.
#[tokio::test]
async fn rpc_validation_failure_raises_synchronously() {
    let mut registry = Registry::new();
    registry.add_rpc_endpoint("add", int_pair_rpc()).unwrap();
    let (port, transport) = make_port(registry);

    let err = port
        .call_rpc::<_, i64>("add", json!({"a": "x", "b": 3}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, client_port_core::Error::InvalidParameter { .. }));
    assert!(transport.drain_sent().is_empty());
    assert_eq!(port.open_communication_count(), 0);
}

/// An update for a subscribeId the port doesn't recognize is dropped and
/// raises exactly one communication warning.
#[tokio::test]
async fn unknown_subscribe_id_is_dropped_with_one_warning() {
    let mut registry = Registry::new();
    registry.add_signal_endpoint("counter", counter_signal()).unwrap();
    let (_port, transport) = make_port(registry);

    transport.feed(Frame::SignalUpdate {
        subscribe_id: 42,
        patches: Vec::new(),
        tags: Vec::new(),
    });

    let sent = transport.drain_sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0], Frame::CommunicationWarning { .. }));
}

/// Successive patch frames against the same signal yield successive
/// reconstructed values to the subscriber.
#[tokio::test]
async fn signal_patch_stream_yields_successive_values() {
    let mut registry = Registry::new();
    registry.add_signal_endpoint("counter", counter_signal()).unwrap();
    let (port, transport) = make_port(registry);

    let signal = port
        .create_signal::<serde_json::Value>("counter", json!({}), None)
        .unwrap();
    let mut sub = signal.subscribe();

    wait_for_sent(&transport, 1).await;
    transport.feed(Frame::SignalUpdate {
        subscribe_id: 0,
        patches: vec![client_port_core::Patch::replace_root(json!({"n": 0}))],
        tags: Vec::new(),
    });
    let (first, _) = sub.recv().await.unwrap().unwrap();
    assert_eq!(first, json!({"n": 0}));

    transport.feed(Frame::SignalUpdate {
        subscribe_id: 0,
        patches: vec![client_port_core::Patch {
            op: client_port_core::PatchOp::Replace,
            path: vec![client_port_core::PathSegment::Key("n".into())],
            value: Some(json!(1)),
        }],
        tags: Vec::new(),
    });
    let (second, _) = sub.recv().await.unwrap().unwrap();
    assert_eq!(second, json!({"n": 1}));
}

/// Communication warnings stop being sent to the peer once the configured
/// cap is reached.
#[tokio::test]
async fn warning_cap_suppresses_after_five() {
    let mut registry = Registry::new();
    registry.add_signal_endpoint("counter", counter_signal()).unwrap();
    let (_port, transport) = make_port(registry);

    for i in 0..6 {
        transport.feed(Frame::SignalUpdate {
            subscribe_id: 1000 + i,
            patches: Vec::new(),
            tags: Vec::new(),
        });
    }

    let sent = transport.drain_sent();
    let warnings: Vec<_> = sent
        .iter()
        .filter(|f| matches!(f, Frame::CommunicationWarning { .. }))
        .collect();
    assert_eq!(warnings.len(), 5);
}

/// A terminal transport error rejects ongoing RPCs and errors open
/// channels, but leaves signal subscriptions alone.
#[tokio::test]
async fn transport_error_rejects_rpcs_and_errors_channels_but_not_signals() {
    let mut registry = Registry::new();
    registry.add_rpc_endpoint("add", any_rpc()).unwrap();
    registry.add_channel_endpoint("chat", any_channel()).unwrap();
    registry.add_signal_endpoint("counter", counter_signal()).unwrap();
    let (port, transport) = make_port(registry);

    let port_a = port.clone();
    let rpc_a = tokio::spawn(async move { port_a.call_rpc::<_, i64>("add", json!({"a": 1}), None).await });
    let port_b = port.clone();
    let rpc_b = tokio::spawn(async move { port_b.call_rpc::<_, i64>("add", json!({"a": 2}), None).await });
    wait_for_sent(&transport, 2).await;

    let mut channel = port.create_channel("chat", json!({}), None, None).unwrap();
    wait_for_sent(&transport, 1).await;

    let signal = port
        .create_signal::<serde_json::Value>("counter", json!({}), None)
        .unwrap();
    let _sub = signal.subscribe();
    wait_for_sent(&transport, 1).await;

    assert_eq!(port.open_communication_count(), 4);

    transport.fail(TransportError::Closed("socket reset".into()));

    assert!(rpc_a.await.unwrap().is_err());
    assert!(rpc_b.await.unwrap().is_err());
    let terminal = channel.closed().await;
    assert!(matches!(terminal, crate::channel::ChannelTerminal::Errored(_)));

    // The signal subscription is left alone: its count still contributes to
    // the open total.
    assert_eq!(port.open_communication_count(), 1);
}

async fn wait_for_sent(transport: &Arc<MockTransport>, count: usize) -> Vec<Frame> {
    for _ in 0..50 {
        if transport.sent_len() >= count {
            return transport.drain_sent();
        }
        tokio::task::yield_now().await;
    }
    panic!("transport never sent {count} frame(s)");
}
