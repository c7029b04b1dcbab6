//! A deterministic, in-memory [`FrameTransport`] used by the port's own test
//! suite; no real socket involved.

use crate::transport::{ErrorSink, FrameTransport, MessageSink};
use client_port_core::{Frame, TransportError};
use std::sync::{Arc, Mutex};

pub struct MockTransport {
    sent: Mutex<Vec<Frame>>,
    on_message: MessageSink,
    on_error: ErrorSink,
    closed: Mutex<bool>,
    open_edges: Mutex<Vec<&'static str>>,
}

impl MockTransport {
    pub fn new(on_message: MessageSink, on_error: ErrorSink) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            on_message,
            on_error,
            closed: Mutex::new(false),
            open_edges: Mutex::new(Vec::new()),
        })
    }

    /// Drains the open-communications edge callbacks this transport has
    /// observed so far, in order (`"one_or_more"` for a 0->1 crossing,
    /// `"no_open"` for a 1->0 crossing).
    pub fn drain_edges(&self) -> Vec<&'static str> {
        std::mem::take(&mut self.open_edges.lock().unwrap())
    }

    /// Simulates an inbound frame arriving from the server.
    pub fn feed(&self, frame: Frame) {
        (self.on_message)(frame);
    }

    /// Simulates the transport going terminally broken.
    pub fn fail(&self, err: TransportError) {
        (self.on_error)(err);
    }

    /// Drains every frame sent through this transport so far, in order.
    pub fn drain_sent(&self) -> Vec<Frame> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }

    /// The number of frames sent so far, without draining them.
    pub fn sent_len(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

impl FrameTransport for MockTransport {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }

    fn notify_no_open_communication(&self) {
        self.open_edges.lock().unwrap().push("no_open");
    }

    fn notify_one_or_more_open_communication(&self) {
        self.open_edges.lock().unwrap().push("one_or_more");
    }
}
