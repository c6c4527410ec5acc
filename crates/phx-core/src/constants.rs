//! Protocol constants shared by the socket and channel layers.

/// Reserved control topic. Application channels must not use it.
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Keep-alive event sent on [`PHOENIX_TOPIC`].
pub const HEARTBEAT_EVENT: &str = "heartbeat";

/// Channel join request.
pub const JOIN_EVENT: &str = "phx_join";
/// Channel leave request.
pub const LEAVE_EVENT: &str = "phx_leave";
/// Server reply to a ref-correlated request.
pub const REPLY_EVENT: &str = "phx_reply";
/// Server-side channel crash notification.
pub const ERROR_EVENT: &str = "phx_error";
/// Server-side channel shutdown notification.
pub const CLOSE_EVENT: &str = "phx_close";

/// Serializer version announced in the `vsn` query parameter.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Default heartbeat interval in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 7_000;
/// Default fixed reconnect interval in milliseconds.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5_000;
/// Default per-push reply timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
/// Default send buffer capacity (frames).
pub const DEFAULT_SEND_BUFFER_CAPACITY: usize = 1_024;

/// WebSocket close code: normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// WebSocket close code: endpoint going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Returns `true` for events the protocol itself owns (join/leave/reply/error/close).
pub fn is_lifecycle_event(event: &str) -> bool {
    matches!(
        event,
        JOIN_EVENT | LEAVE_EVENT | REPLY_EVENT | ERROR_EVENT | CLOSE_EVENT
    )
}
