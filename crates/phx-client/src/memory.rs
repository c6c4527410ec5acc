//! In-memory [`Transport`] for tests and offline use.
//!
//! Each `open` creates a [`MemoryConnection`] that records outbound frames
//! and lets the caller inject inbound events. Nothing happens on its own
//! unless an open script is set with [`MemoryTransport::script`].

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use phx_core::Message;

use crate::transport::{EventSender, Transport, TransportEvent, TransportHandle};

/// What a scripted `open` does immediately.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Report `Opened`.
    Open,
    /// Report `Failure` with the given error.
    Fail(String),
    /// Do nothing; the test drives the connection.
    Manual,
}

/// Transport whose connections live in memory.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    connections: Mutex<Vec<Arc<MemoryConnection>>>,
    script: Mutex<VecDeque<OpenOutcome>>,
}

impl MemoryTransport {
    /// Create a transport with no script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next `open` calls, in order.
    pub fn script(&self, outcomes: impl IntoIterator<Item = OpenOutcome>) {
        self.script.lock().extend(outcomes);
    }

    /// Every connection opened so far.
    pub fn connections(&self) -> Vec<Arc<MemoryConnection>> {
        self.connections.lock().clone()
    }

    /// Most recent connection.
    pub fn last(&self) -> Option<Arc<MemoryConnection>> {
        self.connections.lock().last().cloned()
    }

    /// Number of `open` calls.
    pub fn open_count(&self) -> usize {
        self.connections.lock().len()
    }
}

impl Transport for MemoryTransport {
    fn open(&self, url: &str, events: EventSender) -> Arc<dyn TransportHandle> {
        let connection = Arc::new(MemoryConnection {
            url: url.to_owned(),
            events,
            sent: Mutex::new(Vec::new()),
            close_request: Mutex::new(None),
            dead: Mutex::new(false),
        });
        self.connections.lock().push(Arc::clone(&connection));

        let outcome = self.script.lock().pop_front().unwrap_or(OpenOutcome::Manual);
        match outcome {
            OpenOutcome::Open => connection.open(),
            OpenOutcome::Fail(error) => connection.fail(&error),
            OpenOutcome::Manual => {}
        }
        connection
    }
}

/// One in-memory connection.
#[derive(Debug)]
pub struct MemoryConnection {
    url: String,
    events: EventSender,
    sent: Mutex<Vec<String>>,
    close_request: Mutex<Option<(u16, String)>>,
    dead: Mutex<bool>,
}

impl MemoryConnection {
    /// URL the connection was opened with.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Report the connection as open.
    pub fn open(&self) {
        self.emit(TransportEvent::Opened);
    }

    /// Deliver an inbound text frame.
    pub fn receive(&self, text: &str) {
        self.emit(TransportEvent::Text(text.to_owned()));
    }

    /// Deliver an inbound envelope.
    pub fn receive_message(&self, message: &Message) {
        if let Ok(text) = message.encode() {
            self.receive(&text);
        }
    }

    /// Peer-initiated close: `Closing` then `Closed`.
    pub fn close_remote(&self, code: u16, reason: &str) {
        self.emit(TransportEvent::Closing {
            code,
            reason: reason.to_owned(),
        });
        self.finish(TransportEvent::Closed {
            code,
            reason: reason.to_owned(),
        });
    }

    /// Report a failure. The connection is dead afterwards.
    pub fn fail(&self, error: &str) {
        self.finish(TransportEvent::Failure(error.to_owned()));
    }

    /// Raw frames sent by the socket, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Sent frames decoded as envelopes (undecodable frames are skipped).
    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent
            .lock()
            .iter()
            .filter_map(|text| Message::decode(text).ok())
            .collect()
    }

    /// First close requested by the socket, if any.
    pub fn close_request(&self) -> Option<(u16, String)> {
        self.close_request.lock().clone()
    }

    /// Whether the connection has closed or failed.
    pub fn is_dead(&self) -> bool {
        *self.dead.lock()
    }

    fn emit(&self, event: TransportEvent) {
        if !*self.dead.lock() {
            let _ = self.events.send(event);
        }
    }

    fn finish(&self, event: TransportEvent) {
        let mut dead = self.dead.lock();
        if !*dead {
            *dead = true;
            let _ = self.events.send(event);
        }
    }
}

impl TransportHandle for MemoryConnection {
    fn send(&self, text: String) -> bool {
        if *self.dead.lock() {
            return false;
        }
        self.sent.lock().push(text);
        true
    }

    /// Records the request and completes the handshake with `Closed`.
    fn close(&self, code: u16, reason: &str) {
        {
            let mut request = self.close_request.lock();
            if request.is_some() {
                return;
            }
            *request = Some((code, reason.to_owned()));
        }
        self.finish(TransportEvent::Closed {
            code,
            reason: reason.to_owned(),
        });
    }
}
