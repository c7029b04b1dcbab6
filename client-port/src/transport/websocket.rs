//! A concrete [`FrameTransport`] over `tokio-tungstenite`. Grounded in the
//! teacher's own choice of `tokio-tungstenite` for its rosbridge backend,
//! the same JSON-over-websocket shape this port's frames are built for.

use crate::transport::{ErrorSink, FrameTransport, MessageSink, TransportFactory};
use abort_on_drop::ChildTask;
use client_port_core::{Frame, TransportError};
use deadqueue::unlimited::Queue;
use futures_util::{SinkExt, StreamExt};
use log::*;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;

/// Builds a [`TransportFactory`] that connects to `url` lazily, the moment
/// [`crate::port::ClientPort::new`] invokes it. Construction itself never
/// blocks: the handshake runs on a spawned task, and `send` buffers into
/// the outbound queue in the meantime, so callers never have to wait for
/// the socket before issuing their first RPC or subscription.
pub fn factory(url: impl Into<String>) -> TransportFactory {
    let url = url.into();
    Box::new(move |on_message: MessageSink, on_error: ErrorSink, log_target: String| {
        let outbound: Arc<Queue<Frame>> = Arc::new(Queue::new());
        let connection_task: ChildTask<()> = tokio::spawn(run_connection(
            url,
            on_message,
            on_error,
            log_target,
            outbound.clone(),
        ))
        .into();
        Arc::new(WebSocketTransport {
            outbound,
            _connection_task: connection_task,
        }) as Arc<dyn FrameTransport>
    })
}

/// Connects, then drives the reader and writer halves concurrently until
/// either side reports a terminal condition. Wrapped in a single
/// `ChildTask` so the whole connection dies the moment the
/// [`WebSocketTransport`] handle is dropped.
async fn run_connection(
    url: String,
    on_message: MessageSink,
    on_error: ErrorSink,
    log_target: String,
    outbound: Arc<Queue<Frame>>,
) {
    let (stream, _response) = match tokio_tungstenite::connect_async(&url).await {
        Ok(ok) => ok,
        Err(e) => {
            on_error(TransportError::Closed(e.to_string()));
            return;
        }
    };
    let (mut write, mut read) = stream.split();

    let reader_error = on_error.clone();
    let reader_target = log_target.clone();
    let reader = async move {
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<Frame>(&text) {
                    Ok(frame) => on_message(frame),
                    Err(e) => warn!(target: &reader_target, "discarding unparseable frame: {e}"),
                },
                Ok(Message::Close(_)) => {
                    reader_error(TransportError::Closed("peer closed the socket".into()));
                    break;
                }
                Ok(_) => {} // ping/pong/binary: not part of this protocol
                Err(e) => {
                    reader_error(TransportError::Closed(e.to_string()));
                    break;
                }
            }
        }
    };

    let writer_target = log_target.clone();
    let writer = async move {
        loop {
            let frame = outbound.pop().await;
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    error!(target: &writer_target, "failed to serialize outbound frame: {e}");
                    continue;
                }
            };
            if let Err(e) = write.send(Message::Text(text)).await {
                error!(target: &writer_target, "websocket send failed: {e}");
                break;
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = writer => {}
    }
}

pub struct WebSocketTransport {
    outbound: Arc<Queue<Frame>>,
    _connection_task: ChildTask<()>,
}

impl FrameTransport for WebSocketTransport {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.outbound.push(frame);
        Ok(())
    }

    fn close(&self) {
        // Dropping `_connection_task` (via `ChildTask`'s `Drop`) aborts the
        // connection task and tears down the socket; nothing further to do.
    }
}
