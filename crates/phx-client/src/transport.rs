//! Transport capability interface.
//!
//! The socket never touches a network library directly. It asks a
//! [`Transport`] to open a connection and receives everything that happens on
//! that connection as [`TransportEvent`]s on an unbounded channel. The
//! returned [`TransportHandle`] is the write side.

use std::sync::Arc;

use tokio::sync::mpsc;

/// Something that happened on an open (or opening) connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established and accepts frames.
    Opened,
    /// A text frame arrived.
    Text(String),
    /// The peer started the closing handshake.
    Closing {
        /// Close code sent by the peer.
        code: u16,
        /// Close reason sent by the peer.
        reason: String,
    },
    /// The connection is fully closed.
    Closed {
        /// Final close code.
        code: u16,
        /// Final close reason.
        reason: String,
    },
    /// The connection failed; no further events follow.
    Failure(String),
}

/// Sender half handed to [`Transport::open`].
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Opens connections.
pub trait Transport: Send + Sync + 'static {
    /// Start opening a connection to `url` and return immediately.
    ///
    /// The outcome is reported through `events`: `Opened` on success,
    /// `Failure` otherwise.
    fn open(&self, url: &str, events: EventSender) -> Arc<dyn TransportHandle>;
}

/// Write side of one connection.
pub trait TransportHandle: Send + Sync {
    /// Queue a text frame. Returns `false` once the connection no longer
    /// accepts frames.
    fn send(&self, text: String) -> bool;

    /// Start the closing handshake. Idempotent.
    fn close(&self, code: u16, reason: &str);
}
