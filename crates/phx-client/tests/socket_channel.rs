//! Socket and channel behaviour driven through the in-memory transport.
//!
//! All tests run on a paused clock so timing assertions are exact.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use parking_lot::Mutex;
use phx_client::{
    Channel, ChannelEvent, ChannelState, MemoryConnection, MemoryTransport, Message, OpenOutcome,
    OverflowPolicy, PhxError, Socket, SocketEvent, SocketSettings,
};
use serde_json::{Value, json};
use tokio::time::{self, Instant};

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Let spawned tasks run without moving the clock meaningfully.
async fn settle() {
    time::sleep(Duration::from_millis(1)).await;
}

fn settings() -> SocketSettings {
    SocketSettings::new("ws://chat.test/socket/websocket")
}

fn setup(settings: SocketSettings) -> (Socket, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new());
    let socket = Socket::new(settings, transport.clone()).unwrap();
    (socket, transport)
}

async fn connected(settings: SocketSettings) -> (Socket, Arc<MemoryTransport>, Arc<MemoryConnection>) {
    let (socket, transport) = setup(settings);
    socket.connect();
    let conn = transport.last().unwrap();
    conn.open();
    settle().await;
    assert!(socket.is_connected());
    (socket, transport, conn)
}

fn last_sent(conn: &MemoryConnection, event: &str) -> Message {
    conn.sent_messages()
        .into_iter()
        .rev()
        .find(|m| m.event() == event)
        .unwrap_or_else(|| panic!("no {event} frame sent"))
}

fn reply_to(message: &Message, status: &str, response: Value) -> Message {
    Message::new(message.topic(), "phx_reply")
        .with_payload(json!({"status": status, "response": response}))
        .with_ref(message.reference().unwrap())
}

async fn joined(socket: &Socket, conn: &MemoryConnection, topic: &str) -> Arc<Channel> {
    let channel = socket.channel(topic);
    let join = channel.join(None).await.unwrap();
    conn.receive_message(&reply_to(&last_sent(conn, "phx_join"), "ok", json!({})));
    join.await.unwrap();
    assert_eq!(channel.state(), ChannelState::Joined);
    channel
}

fn heartbeats(conn: &MemoryConnection) -> Vec<Message> {
    conn.sent_messages()
        .into_iter()
        .filter(|m| m.topic() == "phoenix" && m.event() == "heartbeat")
        .collect()
}

fn record_socket_events(socket: &Socket) -> Arc<Mutex<Vec<SocketEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _ = socket.register_listener(Arc::new(move |event: &SocketEvent| sink.lock().push(event.clone())));
    events
}

fn record_channel_events(channel: &Channel) -> Arc<Mutex<Vec<ChannelEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _ = channel.register_state_listener(Arc::new(move |event: &ChannelEvent| sink.lock().push(event.clone())));
    events
}

// ─────────────────────────────────────────────────────────────────────────────
// Send buffer
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn messages_sent_while_disconnected_arrive_in_order() {
    let (socket, transport) = setup(settings());
    socket.connect();
    let conn = transport.last().unwrap();

    socket.send_message(Message::new("room:1", "a"), None).await.unwrap();
    socket.send_message(Message::new("room:1", "b"), None).await.unwrap();
    assert!(conn.sent().is_empty());

    conn.open();
    settle().await;
    let events: Vec<String> = conn.sent_messages().iter().map(|m| m.event().to_owned()).collect();
    assert_eq!(events, vec!["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn full_buffer_rejects_join() {
    let (socket, _) = setup(settings().with_send_buffer(1, OverflowPolicy::Reject));
    socket.send_message(Message::new("room:0", "filler"), None).await.unwrap();

    let channel = socket.channel("room:1");
    let events = record_channel_events(&channel);
    let err = channel.join(None).await.unwrap_err();
    assert_matches!(err, PhxError::BufferFull { capacity: 1 });
    assert_eq!(channel.state(), ChannelState::Errored);
    assert_eq!(channel.pending_count(), 0);
    assert_matches!(events.lock().as_slice(), [ChannelEvent::Joining, ChannelEvent::Error(_)]);
}

#[tokio::test(start_paused = true)]
async fn wait_policy_holds_sender_until_flush() {
    let (socket, transport) = setup(settings().with_send_buffer(1, OverflowPolicy::Wait));
    socket.connect();
    let conn = transport.last().unwrap();
    socket.send_message(Message::new("room:1", "a"), None).await.unwrap();

    let waiter = {
        let socket = socket.clone();
        tokio::spawn(async move { socket.send_message(Message::new("room:1", "b"), None).await })
    };
    settle().await;
    assert!(!waiter.is_finished());

    conn.open();
    waiter.await.unwrap().unwrap();
    settle().await;
    let events: Vec<String> = conn.sent_messages().iter().map(|m| m.event().to_owned()).collect();
    assert_eq!(events, vec!["a", "b"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Heartbeat
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn heartbeat_every_interval_while_connected() {
    let (_socket, _transport, conn) = connected(settings()).await;

    time::sleep(Duration::from_millis(6_990)).await;
    assert!(heartbeats(&conn).is_empty());

    time::sleep(Duration::from_millis(20)).await;
    let beats = heartbeats(&conn);
    assert_eq!(beats.len(), 1);
    assert!(beats[0].reference().is_some());
    assert!(beats[0].payload().is_none());

    time::sleep(Duration::from_millis(14_000)).await;
    assert_eq!(heartbeats(&conn).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_stops_after_close() {
    let (_socket, _transport, conn) = connected(settings().with_heartbeat_interval(Duration::from_secs(1))).await;
    time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(heartbeats(&conn).len(), 1);

    conn.close_remote(1000, "bye");
    settle().await;
    time::sleep(Duration::from_secs(10)).await;
    assert_eq!(heartbeats(&conn).len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Timeouts
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unanswered_push_times_out() {
    let (socket, _transport, conn) = connected(settings()).await;
    let channel = joined(&socket, &conn, "room:1").await;

    let start = Instant::now();
    let push = channel
        .push("new_msg", json!({"body": "hi"}), Some(Duration::from_millis(3_000)))
        .await
        .unwrap();
    let reference = push.reference().to_owned();

    time::sleep(Duration::from_millis(2_990)).await;
    assert_eq!(channel.pending_count(), 1);

    let err = push.await.unwrap_err();
    let elapsed = start.elapsed();
    assert_matches!(err, PhxError::Timeout { reference: ref r, timeout_ms: 3_000, .. } if *r == reference);
    assert!(elapsed >= Duration::from_millis(3_000) && elapsed < Duration::from_millis(3_050));
    assert_eq!(channel.pending_count(), 0);
    assert_eq!(channel.state(), ChannelState::Joined);
}

#[tokio::test(start_paused = true)]
async fn reply_cancels_timeout() {
    let (socket, _transport, conn) = connected(settings()).await;
    let channel = joined(&socket, &conn, "room:1").await;
    let events = record_channel_events(&channel);

    let push = channel
        .push("new_msg", json!({}), Some(Duration::from_millis(3_000)))
        .await
        .unwrap();
    time::sleep(Duration::from_millis(100)).await;
    conn.receive_message(&reply_to(&last_sent(&conn, "new_msg"), "ok", json!({"id": 9})));
    assert_eq!(push.await.unwrap(), json!({"id": 9}));

    time::sleep(Duration::from_secs(10)).await;
    assert_eq!(channel.state(), ChannelState::Joined);
    assert!(events.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn join_timeout_errors_channel() {
    let (socket, _transport, _conn) = connected(settings()).await;
    let channel = socket.channel("room:1");
    let join = channel.join(Some(Duration::from_millis(500))).await.unwrap();

    assert_matches!(join.await, Err(PhxError::Timeout { timeout_ms: 500, .. }));
    assert_eq!(channel.state(), ChannelState::Errored);
}

#[tokio::test(start_paused = true)]
async fn leave_timeout_closes_channel() {
    let (socket, _transport, conn) = connected(settings()).await;
    let channel = joined(&socket, &conn, "room:1").await;

    let leave = channel.leave(Some(Duration::from_millis(200))).await.unwrap();
    assert_eq!(channel.state(), ChannelState::Leaving);
    assert_matches!(leave.await, Err(PhxError::Timeout { .. }));
    assert_eq!(channel.state(), ChannelState::Closed);
}

#[tokio::test(start_paused = true)]
async fn removed_channel_push_still_times_out() {
    let (socket, _transport, _conn) = connected(settings()).await;
    let channel = socket.channel("room:1");
    let join = channel.join(Some(Duration::from_millis(100))).await.unwrap();
    assert!(socket.remove_channel("room:1").is_some());

    let join = time::timeout(Duration::from_secs(60), join).await.unwrap();
    assert_matches!(join, Err(PhxError::Timeout { timeout_ms: 100, .. }));
    assert_eq!(channel.pending_count(), 0);
    assert_eq!(channel.state(), ChannelState::Errored);
}

#[tokio::test(start_paused = true)]
async fn reply_reaches_channel_removed_from_registry() {
    let (socket, _transport, conn) = connected(settings()).await;
    let channel = socket.channel("room:1");
    let join = channel.join(None).await.unwrap();
    socket.remove_all_channels();

    conn.receive_message(&reply_to(&last_sent(&conn, "phx_join"), "ok", json!({})));
    join.await.unwrap();
    assert_eq!(channel.state(), ChannelState::Joined);
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn join_ok_within_timeout() {
    let (socket, _transport, conn) = connected(settings()).await;
    let channel = socket.channel("room:1");
    let events = record_channel_events(&channel);
    channel.set_params(json!({"user": "u1"}));

    let join = channel.join(Some(Duration::from_millis(3_000))).await.unwrap();
    assert_eq!(channel.state(), ChannelState::Joining);
    let frame = last_sent(&conn, "phx_join");
    assert_eq!(frame.topic(), "room:1");
    assert_eq!(frame.payload(), Some(&json!({"user": "u1"})));

    time::sleep(Duration::from_millis(100)).await;
    conn.receive_message(&reply_to(&frame, "ok", json!({})));
    join.await.unwrap();
    assert_eq!(channel.state(), ChannelState::Joined);

    time::sleep(Duration::from_secs(5)).await;
    assert_eq!(channel.state(), ChannelState::Joined);
    assert_matches!(events.lock().as_slice(), [ChannelEvent::Joining, ChannelEvent::Joined]);
}

#[tokio::test(start_paused = true)]
async fn join_error_reply_fails_handle() {
    let (socket, _transport, conn) = connected(settings()).await;
    let channel = socket.channel("room:1");
    let join = channel.join(None).await.unwrap();

    conn.receive_message(&reply_to(
        &last_sent(&conn, "phx_join"),
        "error",
        json!({"reason": "unmatched topic"}),
    ));
    let err = join.await.unwrap_err();
    assert_matches!(err, PhxError::Reply { ref status, reason: Some(ref r), .. } if status == "error" && r == "unmatched topic");
    assert_eq!(channel.state(), ChannelState::Errored);
}

#[tokio::test(start_paused = true)]
async fn server_events_reach_handlers() {
    let (socket, _transport, conn) = connected(settings()).await;
    let channel = joined(&socket, &conn, "room:1").await;
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&bodies);
    channel.on(
        "new_msg",
        Arc::new(move |m: &Message| {
            if let Some(body) = m.payload().and_then(|p| p["body"].as_str()) {
                sink.lock().push(body.to_owned());
            }
        }),
    );

    conn.receive(r#"{"topic":"room:1","event":"new_msg","payload":{"body":"one"},"ref":null}"#);
    conn.receive(r#"{"topic":"room:2","event":"new_msg","payload":{"body":"other"},"ref":null}"#);
    conn.receive(r#"{"topic":"room:1","event":"new_msg","payload":{"body":"two"},"ref":null}"#);
    settle().await;
    assert_eq!(*bodies.lock(), vec!["one", "two"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Close and failure
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn remote_close_fails_pending_pushes_and_clears_registry() {
    let (socket, _transport, conn) = connected(settings()).await;
    let channel = joined(&socket, &conn, "room:1").await;
    let first = channel.push("a", json!({}), None).await.unwrap();
    let second = channel.push("b", json!({}), None).await.unwrap();
    assert_eq!(channel.pending_count(), 2);
    let socket_events = record_socket_events(&socket);

    conn.close_remote(1000, "server shutdown");
    settle().await;

    for push in [first, second] {
        assert_matches!(push.await, Err(PhxError::ConnectionClosed { code: 1000, .. }));
    }
    assert_eq!(channel.state(), ChannelState::Errored);
    assert_eq!(socket.channel_count(), 0);
    assert!(!socket.is_connected());
    assert_matches!(
        socket_events.lock().as_slice(),
        [SocketEvent::Closing { code: 1000, .. }, SocketEvent::Closed { code: 1000, .. }]
    );
}

#[tokio::test(start_paused = true)]
async fn failure_without_reconnect_keeps_channels() {
    let (socket, transport, conn) = connected(settings()).await;
    let channel = joined(&socket, &conn, "room:1").await;

    conn.fail("connection reset");
    settle().await;
    assert_eq!(channel.state(), ChannelState::Errored);
    assert_eq!(socket.channel_count(), 1);
    assert_eq!(conn.close_request(), Some((1001, "transport failure".to_owned())));

    time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnects_and_rejoins_after_failure() {
    let settings = settings()
        .with_reconnect_on_failure(true)
        .with_reconnect_interval(Duration::from_millis(5_000));
    let (socket, transport, conn) = connected(settings).await;
    let channel = joined(&socket, &conn, "room:1").await;
    let events = record_channel_events(&channel);

    transport.script([OpenOutcome::Fail("connection refused".into()), OpenOutcome::Open]);
    conn.fail("connection reset");
    settle().await;
    assert_eq!(channel.state(), ChannelState::Errored);

    time::sleep(Duration::from_millis(4_990)).await;
    assert_eq!(transport.open_count(), 1);
    time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.open_count(), 2);
    assert!(!socket.is_connected());

    time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(transport.open_count(), 3);
    assert!(socket.is_connected());

    let fresh = transport.last().unwrap();
    let rejoin = last_sent(&fresh, "phx_join");
    assert_eq!(rejoin.topic(), "room:1");
    assert_eq!(channel.state(), ChannelState::Joining);
    fresh.receive_message(&reply_to(&rejoin, "ok", json!({})));
    settle().await;
    assert_eq!(channel.state(), ChannelState::Joined);

    time::sleep(Duration::from_millis(7_000)).await;
    assert!(!heartbeats(&fresh).is_empty());

    time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.open_count(), 3);
    assert_matches!(
        events.lock().as_slice(),
        [ChannelEvent::Error(PhxError::TransportFailure(_)), ChannelEvent::Joining, ChannelEvent::Joined]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_buffered_join_is_not_resent_after_reconnect() {
    let settings = settings()
        .with_reconnect_on_failure(true)
        .with_reconnect_interval(Duration::from_millis(5_000));
    let (socket, transport) = setup(settings);
    socket.connect();
    let first = transport.last().unwrap();
    let channel = socket.channel("room:1");
    let join = channel.join(None).await.unwrap();
    let stale_ref = join.reference().to_owned();
    assert_eq!(socket.buffered_frames(), 1);

    transport.script([OpenOutcome::Open]);
    first.fail("connection refused");
    assert_matches!(join.await, Err(PhxError::TransportFailure(_)));
    assert_eq!(socket.buffered_frames(), 0);

    time::sleep(Duration::from_millis(5_010)).await;
    assert_eq!(transport.open_count(), 2);
    let fresh = transport.last().unwrap();
    let joins: Vec<Message> = fresh
        .sent_messages()
        .into_iter()
        .filter(|m| m.event() == "phx_join")
        .collect();
    assert_eq!(joins.len(), 1);
    assert_ne!(joins[0].reference(), Some(stale_ref.as_str()));
    assert_eq!(channel.state(), ChannelState::Joining);
}

#[tokio::test(start_paused = true)]
async fn remote_close_drops_buffered_pushes_but_keeps_plain_frames() {
    let (socket, transport) = setup(settings());
    socket.connect();
    let first = transport.last().unwrap();
    let channel = socket.channel("room:1");
    let join = channel.join(None).await.unwrap();
    socket.send_message(Message::new("room:9", "note"), None).await.unwrap();
    assert_eq!(socket.buffered_frames(), 2);

    first.close_remote(1011, "server error");
    assert_matches!(join.await, Err(PhxError::ConnectionClosed { code: 1011, .. }));
    assert_eq!(socket.buffered_frames(), 1);

    socket.connect();
    let fresh = transport.last().unwrap();
    fresh.open();
    settle().await;
    let events: Vec<String> = fresh.sent_messages().iter().map(|m| m.event().to_owned()).collect();
    assert_eq!(events, vec!["note"]);
}

#[tokio::test(start_paused = true)]
async fn disconnect_stops_reconnect_cycle() {
    let settings = settings()
        .with_reconnect_on_failure(true)
        .with_reconnect_interval(Duration::from_millis(1_000));
    let (socket, transport, conn) = connected(settings).await;

    conn.fail("connection reset");
    settle().await;
    socket.disconnect();

    time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_while_connected_rejoins_on_new_transport() {
    let (socket, transport, conn) = connected(settings()).await;
    let channel = joined(&socket, &conn, "room:1").await;
    let pending = channel.push("a", json!({}), None).await.unwrap();

    socket.connect();
    assert_eq!(conn.close_request(), Some((1000, "reconnecting".to_owned())));
    assert_matches!(pending.await, Err(PhxError::ConnectionClosed { .. }));
    assert_eq!(channel.state(), ChannelState::Errored);
    assert_eq!(socket.channel_count(), 1);

    let fresh = transport.last().unwrap();
    fresh.open();
    settle().await;
    assert_eq!(last_sent(&fresh, "phx_join").topic(), "room:1");
    assert_eq!(channel.state(), ChannelState::Joining);
}

#[tokio::test(start_paused = true)]
async fn server_phx_error_rejoins_after_interval() {
    let settings = settings().with_reconnect_interval(Duration::from_millis(2_000));
    let (socket, _transport, conn) = connected(settings).await;
    let channel = joined(&socket, &conn, "room:1").await;
    let joins_before = conn.sent_messages().iter().filter(|m| m.event() == "phx_join").count();

    conn.receive(r#"{"topic":"room:1","event":"phx_error","payload":{},"ref":"1"}"#);
    settle().await;
    assert_eq!(channel.state(), ChannelState::Errored);

    time::sleep(Duration::from_millis(2_010)).await;
    let joins_after = conn.sent_messages().iter().filter(|m| m.event() == "phx_join").count();
    assert_eq!(joins_after, joins_before + 1);
    assert_eq!(channel.state(), ChannelState::Joining);
}

#[tokio::test(start_paused = true)]
async fn socket_listeners_see_raw_frames() {
    let (socket, _transport, conn) = connected(settings()).await;
    let events = record_socket_events(&socket);

    conn.receive(r#"{"topic":"room:9","event":"ping","payload":null,"ref":null}"#);
    settle().await;
    assert_matches!(events.lock().as_slice(), [SocketEvent::Message(text)] if text.contains("room:9"));
}
