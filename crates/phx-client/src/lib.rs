//! # phx-client
//!
//! Client side of the Phoenix Channels protocol.
//!
//! A [`Socket`] owns one transport connection and multiplexes any number of
//! [`Channel`]s over it. Outbound envelopes go through an ordered send buffer
//! that is flushed whenever the transport is open. Replies are correlated by
//! ref and delivered through [`PushHandle`] futures; a per-ref timer fails the
//! push if no reply arrives in time. A periodic heartbeat keeps the connection
//! alive, and an optional reconnect timer re-opens it after a failure, at which
//! point errored channels rejoin.
//!
//! The network is behind the [`Transport`] trait. [`WebSocketTransport`] talks
//! to a real server; [`MemoryTransport`] is an in-memory stand-in for tests.

#![deny(unsafe_code)]

pub mod buffer;
pub mod channel;
pub mod listener;
pub mod memory;
pub mod push;
pub mod socket;
pub mod timer;
pub mod transport;
pub mod websocket;

pub use buffer::SendBuffer;
pub use channel::{Channel, ChannelEvent, ChannelState, EventHandler};
pub use listener::{Callback, ListenerId, Listeners};
pub use memory::{MemoryConnection, MemoryTransport, OpenOutcome};
pub use push::{PushHandle, PushResult};
pub use socket::{Socket, SocketEvent};
pub use timer::{TimerHandle, schedule_once, schedule_periodic};
pub use transport::{EventSender, Transport, TransportEvent, TransportHandle};
pub use websocket::WebSocketTransport;

pub use phx_core::{Message, PhxError, ReplyStatus};
pub use phx_settings::{OverflowPolicy, SocketSettings};
