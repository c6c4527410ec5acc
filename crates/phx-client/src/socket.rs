//! The socket session: one logical connection shared by many channels.
//!
//! The socket owns the transport, the send buffer, the channel registry, the
//! heartbeat and reconnect timers, and the per-ref timeout table. Transport
//! events are consumed by a pump task per connection attempt; each attempt
//! carries a generation number so events from a superseded transport are
//! ignored.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use phx_core::constants::{
    CLOSE_GOING_AWAY, CLOSE_NORMAL, HEARTBEAT_EVENT, PHOENIX_TOPIC, PROTOCOL_VERSION,
};
use phx_core::{Message, PhxError, RefGenerator, Result};
use phx_settings::SocketSettings;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::buffer::SendBuffer;
use crate::channel::Channel;
use crate::listener::{Callback, ListenerId, Listeners};
use crate::timer::{TimerHandle, schedule_once, schedule_periodic};
use crate::transport::{Transport, TransportEvent, TransportHandle};

/// Connection-level notification delivered to socket listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketEvent {
    /// The transport opened.
    Open,
    /// Raw text of an inbound frame.
    Message(String),
    /// The peer started closing the connection.
    Closing {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// The connection closed.
    Closed {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// The transport failed.
    Failure(String),
    /// An inbound frame could not be decoded and was dropped.
    DecodeError(String),
}

/// Phoenix Channels socket. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct Socket {
    inner: Arc<SocketInner>,
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("endpoint", &self.inner.endpoint_url)
            .field("connected", &self.is_connected())
            .field("channels", &self.inner.channels.len())
            .finish_non_exhaustive()
    }
}

impl Socket {
    /// Create a disconnected socket.
    ///
    /// Fails with [`PhxError::InvalidConfig`] when the settings are invalid or
    /// the endpoint is not a URL.
    pub fn new(settings: SocketSettings, transport: Arc<dyn Transport>) -> Result<Self> {
        settings
            .validate()
            .map_err(|err| PhxError::InvalidConfig(err.to_string()))?;
        let endpoint_url = build_endpoint_url(&settings)?;
        let buffer = SendBuffer::new(settings.send_buffer_capacity, settings.overflow);

        let inner = Arc::new_cyclic(|me| SocketInner {
            me: me.clone(),
            settings,
            endpoint_url,
            transport,
            refs: RefGenerator::new(),
            connection: Mutex::new(Connection::default()),
            channels: DashMap::new(),
            timeouts: DashMap::new(),
            buffer,
            heartbeat: Mutex::new(None),
            reconnect: Mutex::new(None),
            close_requested: AtomicBool::new(false),
            listeners: Listeners::new(),
        });
        Ok(Self { inner })
    }

    /// Open the transport. Replaces (and closes) any existing one.
    ///
    /// Returns immediately; listeners see [`SocketEvent::Open`] once connected.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Close the transport with code 1000 and stop reconnecting. Idempotent.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Observe connection events.
    pub fn register_listener(&self, listener: Callback<SocketEvent>) -> ListenerId {
        self.inner.listeners.register(listener)
    }

    /// Stop observing connection events.
    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.unregister(id)
    }

    /// Get the channel for `topic`, creating it on first use.
    pub fn channel(&self, topic: &str) -> Arc<Channel> {
        if topic == PHOENIX_TOPIC {
            warn!(topic, "channel requested on reserved topic");
        }
        self.inner
            .channels
            .entry(topic.to_owned())
            .or_insert_with(|| Channel::new(topic, Arc::downgrade(&self.inner)))
            .value()
            .clone()
    }

    /// Drop `topic` from the registry. The channel's state is left untouched.
    pub fn remove_channel(&self, topic: &str) -> Option<Arc<Channel>> {
        self.inner.channels.remove(topic).map(|(_, channel)| channel)
    }

    /// Drop every channel from the registry.
    pub fn remove_all_channels(&self) {
        self.inner.channels.clear();
    }

    /// Number of registered channels.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    /// Next correlation ref.
    pub fn make_ref(&self) -> String {
        self.inner.make_ref()
    }

    /// Encode and enqueue `message`, tracking a reply timeout if it carries a ref.
    ///
    /// The timeout is delivered to the channel registered for the message's
    /// topic at the time of sending.
    pub async fn send_message(&self, message: Message, timeout: Option<Duration>) -> Result<()> {
        let owner = self
            .inner
            .channels
            .get(message.topic())
            .map(|entry| Arc::downgrade(entry.value()));
        self.inner.send_message(message, timeout, owner).await
    }

    /// Whether an open transport is available.
    pub fn can_send_message(&self) -> bool {
        self.inner.can_send_message()
    }

    /// Alias of [`can_send_message`](Self::can_send_message).
    pub fn is_connected(&self) -> bool {
        self.inner.can_send_message()
    }

    /// Endpoint with `vsn` and configured params appended.
    pub fn endpoint_url(&self) -> &str {
        &self.inner.endpoint_url
    }

    /// Settings the socket was built with.
    pub fn settings(&self) -> &SocketSettings {
        &self.inner.settings
    }

    /// Frames waiting for an open transport.
    pub fn buffered_frames(&self) -> usize {
        self.inner.buffer.len()
    }
}

fn build_endpoint_url(settings: &SocketSettings) -> Result<String> {
    let mut url = Url::parse(&settings.endpoint)
        .map_err(|err| PhxError::InvalidConfig(format!("endpoint {}: {err}", settings.endpoint)))?;
    {
        let mut query = url.query_pairs_mut();
        let _ = query.append_pair("vsn", PROTOCOL_VERSION);
        for (key, value) in &settings.params {
            let _ = query.append_pair(key, value);
        }
    }
    Ok(url.into())
}

// ─────────────────────────────────────────────────────────────────────────────
// Session internals
// ─────────────────────────────────────────────────────────────────────────────

/// Reply timer for one outbound ref, plus the channel that waits on it.
struct TrackedRef {
    timer: TimerHandle,
    owner: Option<Weak<Channel>>,
}

#[derive(Default)]
struct Connection {
    generation: u64,
    /// Transport opened but not yet reported `Opened`.
    pending: Option<Arc<dyn TransportHandle>>,
    /// Transport that accepts frames.
    active: Option<Arc<dyn TransportHandle>>,
}

pub(crate) struct SocketInner {
    me: Weak<SocketInner>,
    settings: SocketSettings,
    endpoint_url: String,
    transport: Arc<dyn Transport>,
    refs: RefGenerator,
    connection: Mutex<Connection>,
    channels: DashMap<String, Arc<Channel>>,
    timeouts: DashMap<String, TrackedRef>,
    buffer: SendBuffer,
    heartbeat: Mutex<Option<TimerHandle>>,
    reconnect: Mutex<Option<TimerHandle>>,
    close_requested: AtomicBool,
    listeners: Listeners<SocketEvent>,
}

impl SocketInner {
    pub(crate) fn settings(&self) -> &SocketSettings {
        &self.settings
    }

    pub(crate) fn make_ref(&self) -> String {
        self.refs.next()
    }

    pub(crate) fn can_send_message(&self) -> bool {
        self.connection.lock().active.is_some()
    }

    /// Enqueue `message`. A ref'd message gets a reply timer that fails the
    /// push on `owner` when it fires.
    pub(crate) async fn send_message(
        &self,
        message: Message,
        timeout: Option<Duration>,
        owner: Option<Weak<Channel>>,
    ) -> Result<()> {
        let frame = message.encode().map_err(|err| PhxError::Encode(err.to_string()))?;
        let tracked = message.reference().map(str::to_owned);
        if let Some(reference) = &tracked {
            let timeout = timeout.unwrap_or_else(|| self.settings.default_timeout());
            self.track_timeout(reference.clone(), message.topic(), owner, timeout);
        }

        if let Err(err) = self.buffer.push(frame, tracked.clone()).await {
            if let Some(reference) = &tracked {
                let _ = self.untrack_timeout(reference);
            }
            warn!(
                topic = message.topic(),
                event = message.event(),
                kind = %err.kind(),
                error = %err,
                "message not enqueued"
            );
            return Err(err);
        }
        self.flush();
        Ok(())
    }

    /// Drop the buffered frame for `reference` if it was not sent yet.
    pub(crate) fn discard_frame(&self, reference: &str) {
        if self.buffer.remove(reference) {
            debug!(reference, "discarded buffered frame");
        }
    }

    // ── Connection lifecycle ───────────────────────────────────────────

    fn connect(&self) {
        self.close_requested.store(false, Ordering::SeqCst);
        let (generation, previous_active, previous_pending) = {
            let mut connection = self.connection.lock();
            connection.generation += 1;
            (
                connection.generation,
                connection.active.take(),
                connection.pending.take(),
            )
        };

        if let Some(pending) = previous_pending {
            pending.close(CLOSE_NORMAL, "superseded");
        }
        if let Some(active) = previous_active {
            info!("replacing open transport");
            active.close(CLOSE_NORMAL, "reconnecting");
            self.stop_heartbeat();
            self.fail_channels(&PhxError::ConnectionClosed {
                code: CLOSE_NORMAL,
                reason: "reconnecting".into(),
            });
        }

        info!(url = %self.endpoint_url, generation, "opening transport");
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let handle = self.transport.open(&self.endpoint_url, events_tx);
        {
            let mut connection = self.connection.lock();
            if connection.generation != generation {
                drop(connection);
                handle.close(CLOSE_NORMAL, "superseded");
                return;
            }
            connection.pending = Some(handle);
        }

        let me = self.me.clone();
        drop(tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(inner) = me.upgrade() else { break };
                inner.handle_transport_event(generation, event).await;
            }
            trace!(generation, "transport event pump finished");
        }));
    }

    fn disconnect(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
        self.cancel_reconnect();
        self.stop_heartbeat();
        let handle = {
            let connection = self.connection.lock();
            connection.active.clone().or_else(|| connection.pending.clone())
        };
        if let Some(handle) = handle {
            info!("disconnecting");
            handle.close(CLOSE_NORMAL, "client disconnect");
        }
    }

    async fn handle_transport_event(&self, generation: u64, event: TransportEvent) {
        if self.connection.lock().generation != generation {
            trace!(generation, ?event, "ignoring event from superseded transport");
            return;
        }
        match event {
            TransportEvent::Opened => self.on_open(generation).await,
            TransportEvent::Text(text) => self.on_text(&text),
            TransportEvent::Closing { code, reason } => {
                debug!(code, %reason, "transport closing");
                self.listeners.notify(&SocketEvent::Closing { code, reason });
            }
            TransportEvent::Closed { code, reason } => self.on_closed(code, reason),
            TransportEvent::Failure(error) => self.on_failure(error),
        }
    }

    async fn on_open(&self, generation: u64) {
        let adopted = {
            let mut connection = self.connection.lock();
            if connection.generation != generation || self.close_requested.load(Ordering::SeqCst) {
                false
            } else if let Some(handle) = connection.pending.take() {
                connection.active = Some(handle);
                true
            } else {
                false
            }
        };
        if !adopted {
            debug!(generation, "open not adopted");
            return;
        }

        info!(url = %self.endpoint_url, "transport opened");
        self.cancel_reconnect();
        self.start_heartbeat();
        self.listeners.notify(&SocketEvent::Open);
        self.flush();
        for channel in self.channel_snapshot() {
            channel.on_socket_open().await;
        }
    }

    fn on_text(&self, text: &str) {
        self.listeners.notify(&SocketEvent::Message(text.to_owned()));
        let message = match Message::decode(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "dropping undecodable frame");
                self.listeners.notify(&SocketEvent::DecodeError(err.to_string()));
                return;
            }
        };

        // Prefer the channel that sent the ref; it may have left the registry.
        let owner = message
            .reference()
            .and_then(|reference| self.untrack_timeout(reference))
            .and_then(|owner| owner.upgrade())
            .filter(|owner| owner.topic() == message.topic());
        let channel =
            owner.or_else(|| self.channels.get(message.topic()).map(|entry| entry.value().clone()));
        match channel {
            Some(channel) => {
                trace!(topic = message.topic(), event = message.event(), "routing message");
                channel.retrieve_message(&message);
            }
            None => trace!(topic = message.topic(), event = message.event(), "no channel for topic"),
        }
    }

    fn on_closed(&self, code: u16, reason: String) {
        {
            let mut connection = self.connection.lock();
            connection.active = None;
            connection.pending = None;
        }
        info!(code, %reason, "transport closed");
        self.stop_heartbeat();
        self.listeners.notify(&SocketEvent::Closed {
            code,
            reason: reason.clone(),
        });

        self.fail_channels(&PhxError::ConnectionClosed { code, reason });
        self.channels.clear();
    }

    fn on_failure(&self, error: String) {
        warn!(%error, "transport failure");
        self.listeners.notify(&SocketEvent::Failure(error.clone()));
        let handle = {
            let mut connection = self.connection.lock();
            let _ = connection.pending.take();
            connection.active.take()
        };
        if let Some(handle) = handle {
            handle.close(CLOSE_GOING_AWAY, "transport failure");
        }
        self.stop_heartbeat();
        self.fail_channels(&PhxError::TransportFailure(error));

        if self.settings.reconnect_on_failure && !self.close_requested.load(Ordering::SeqCst) {
            self.start_reconnect();
        }
    }

    // ── Timers ─────────────────────────────────────────────────────────

    fn start_heartbeat(&self) {
        let me = self.me.clone();
        let timer = schedule_periodic(self.settings.heartbeat_interval(), move || {
            let me = me.clone();
            async move {
                if let Some(inner) = me.upgrade() {
                    inner.send_heartbeat();
                }
            }
        });
        if let Some(previous) = self.heartbeat.lock().replace(timer) {
            previous.cancel();
        }
    }

    fn stop_heartbeat(&self) {
        if let Some(timer) = self.heartbeat.lock().take() {
            timer.cancel();
        }
    }

    /// Heartbeats are untracked and never wait for buffer space.
    fn send_heartbeat(&self) {
        let message = Message::new(PHOENIX_TOPIC, HEARTBEAT_EVENT).with_ref(self.make_ref());
        let result = message
            .encode()
            .map_err(|err| PhxError::Encode(err.to_string()))
            .and_then(|frame| self.buffer.try_push(frame, message.reference().map(str::to_owned)));
        match result {
            Ok(()) => {
                trace!(reference = ?message.reference(), "heartbeat");
                self.flush();
            }
            Err(err) => warn!(kind = %err.kind(), error = %err, "heartbeat not enqueued"),
        }
    }

    fn start_reconnect(&self) {
        let interval = self.settings.reconnect_interval();
        info!(interval_ms = interval.as_millis(), "scheduling reconnect");
        let me = self.me.clone();
        let timer = schedule_periodic(interval, move || {
            let me = me.clone();
            async move {
                if let Some(inner) = me.upgrade() {
                    debug!("reconnect attempt");
                    inner.connect();
                }
            }
        });
        if let Some(previous) = self.reconnect.lock().replace(timer) {
            previous.cancel();
        }
    }

    fn cancel_reconnect(&self) {
        if let Some(timer) = self.reconnect.lock().take() {
            timer.cancel();
        }
    }

    fn track_timeout(
        &self,
        reference: String,
        topic: &str,
        owner: Option<Weak<Channel>>,
        timeout: Duration,
    ) {
        let me = self.me.clone();
        let key = reference.clone();
        let target = owner.clone();
        let topic = topic.to_owned();
        let timer = schedule_once(timeout, move || async move {
            if let Some(inner) = me.upgrade() {
                let _ = inner.timeouts.remove(&reference);
            }
            match target.and_then(|channel| channel.upgrade()) {
                Some(channel) => channel.retrieve_timeout(&reference),
                None => debug!(%topic, %reference, "timeout without a live channel"),
            }
        });
        if let Some(previous) = self.timeouts.insert(key, TrackedRef { timer, owner }) {
            previous.timer.cancel();
        }
    }

    /// Stop the reply timer for `reference`, returning the channel it belonged to.
    fn untrack_timeout(&self, reference: &str) -> Option<Weak<Channel>> {
        let (_, tracked) = self.timeouts.remove(reference)?;
        tracked.timer.cancel();
        tracked.owner
    }

    fn cancel_all_timeouts(&self) {
        self.timeouts.retain(|_, tracked| {
            tracked.timer.cancel();
            false
        });
    }

    /// Fail every channel's pending pushes with `error` and drop the frames
    /// those pushes (and any heartbeat) left in the buffer.
    fn fail_channels(&self, error: &PhxError) {
        self.cancel_all_timeouts();
        for channel in self.channel_snapshot() {
            channel.retrieve_failure(error);
        }
        let dropped = self.buffer.discard_referenced();
        if dropped > 0 {
            debug!(dropped, kind = %error.kind(), "discarded buffered frames of failed pushes");
        }
    }

    // ── Helpers ────────────────────────────────────────────────────────

    fn flush(&self) {
        let handle = self.connection.lock().active.clone();
        if let Some(handle) = handle {
            let sent = self.buffer.drain(handle.as_ref());
            if sent > 0 {
                trace!(sent, "flushed send buffer");
            }
        }
    }

    fn channel_snapshot(&self) -> Vec<Arc<Channel>> {
        self.channels.iter().map(|entry| entry.value().clone()).collect()
    }
}
