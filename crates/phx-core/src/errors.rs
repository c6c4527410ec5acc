//! Error hierarchy for the Phoenix Channels client.
//!
//! - [`PhxError`]: every failure a push, channel or socket can report
//! - [`DecodeError`]: malformed or incomplete inbound frames
//! - [`ErrorKind`]: coarse classification used for logging and recovery decisions
//!
//! `PhxError` is `Clone` because a single transport failure is fanned out to
//! every pending push of every channel.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Result alias used across the `phx-*` crates.
pub type Result<T> = std::result::Result<T, PhxError>;

// ─────────────────────────────────────────────────────────────────────────────
// PhxError
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level error type.
#[derive(Clone, Debug, Error)]
pub enum PhxError {
    /// A tracked push received no reply within its timeout.
    #[error("push {reference} on {topic} timed out after {timeout_ms}ms")]
    Timeout {
        /// Topic the push was sent on.
        topic: String,
        /// Correlation ref of the push.
        reference: String,
        /// Timeout that expired.
        timeout_ms: u64,
    },

    /// The underlying connection reported an error.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The connection was closed (orderly or remote).
    #[error("connection closed ({code}): {reason}")]
    ConnectionClosed {
        /// WebSocket close code.
        code: u16,
        /// Close reason reported by the transport.
        reason: String,
    },

    /// The server answered with a non-ok reply status.
    #[error("reply status {status}{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Reply {
        /// Status string carried by the reply (`"error"`, `"timeout"`, ...).
        status: String,
        /// `response.reason`, when the server provided one.
        reason: Option<String>,
        /// Full `response` object of the reply.
        response: Value,
    },

    /// `push`/`leave` issued on a channel that is not joined.
    #[error("channel {topic} is not joined (state: {state})")]
    NotJoined {
        /// Channel topic.
        topic: String,
        /// State the channel was in.
        state: String,
    },

    /// `join` issued while a join is already in flight or complete.
    #[error("channel {topic} is already {state}")]
    AlreadyJoined {
        /// Channel topic.
        topic: String,
        /// State the channel was in.
        state: String,
    },

    /// The send buffer is at capacity and the overflow policy rejects.
    #[error("send buffer full ({capacity} frames)")]
    BufferFull {
        /// Configured capacity.
        capacity: usize,
    },

    /// An outbound envelope could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// An inbound frame could not be decoded.
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// The socket configuration is unusable (bad endpoint URL, zero interval).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The socket or channel was dropped before the operation completed.
    #[error("socket dropped")]
    SocketDropped,
}

/// Coarse error classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Reply timeout.
    Timeout,
    /// Connection-level failure.
    Transport,
    /// Connection closed.
    Closed,
    /// Server replied with an error status.
    Protocol,
    /// API misuse (wrong channel state, bad endpoint, dropped socket).
    Usage,
    /// Serialization, deserialization or buffer overflow.
    Codec,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Closed => "closed",
            Self::Protocol => "protocol",
            Self::Usage => "usage",
            Self::Codec => "codec",
        };
        f.write_str(s)
    }
}

impl PhxError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::TransportFailure(_) => ErrorKind::Transport,
            Self::ConnectionClosed { .. } => ErrorKind::Closed,
            Self::Reply { .. } => ErrorKind::Protocol,
            Self::NotJoined { .. }
            | Self::AlreadyJoined { .. }
            | Self::InvalidConfig(_)
            | Self::SocketDropped => ErrorKind::Usage,
            Self::BufferFull { .. } | Self::Encode(_) | Self::Decode(_) => ErrorKind::Codec,
        }
    }

    /// Whether reconnecting or re-issuing the operation can succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::Transport | ErrorKind::Closed
        ) || matches!(self, Self::BufferFull { .. })
    }

    /// Build a [`PhxError::Reply`] from a reply's status and response.
    #[must_use]
    pub fn reply(status: impl Into<String>, reason: Option<String>, response: Value) -> Self {
        Self::Reply {
            status: status.into(),
            reason,
            response,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DecodeError
// ─────────────────────────────────────────────────────────────────────────────

/// Inbound frame decoding failure.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON or not a JSON object.
    #[error("invalid envelope JSON: {0}")]
    Json(String),
    /// A required envelope field is absent or has the wrong type.
    #[error("envelope field `{0}` missing or not a string")]
    MissingField(&'static str),
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
