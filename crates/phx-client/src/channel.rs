//! Topic-scoped conversation multiplexed over a [`Socket`](crate::Socket).
//!
//! State machine:
//!
//! ```text
//! closed ──join──▶ joining ──ok reply──▶ joined ──leave──▶ leaving ──reply/timeout──▶ closed
//!                     │                    │                  │
//!                     └─error reply/timeout┴─failure/phx_error┴──failure──▶ errored / closed
//! ```
//!
//! `errored` channels whose last intent was "joined" rejoin when the socket
//! opens again, or after the reconnect interval when the server reports
//! `phx_error` on a live connection.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use phx_core::constants::{
    CLOSE_EVENT, ERROR_EVENT, JOIN_EVENT, LEAVE_EVENT, REPLY_EVENT, is_lifecycle_event,
};
use phx_core::{Message, PhxError, ReplyStatus, Result};
use serde_json::{Value, json};
use tracing::{debug, info, trace, warn};

use crate::listener::{Callback, ListenerId, Listeners};
use crate::push::{Push, PushHandle, PushKind};
use crate::socket::SocketInner;
use crate::timer::{TimerHandle, schedule_once};

/// Channel lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Not joined; the initial state.
    Closed,
    /// Join sent, waiting for the reply.
    Joining,
    /// Join acknowledged by the server.
    Joined,
    /// Leave sent, waiting for the reply.
    Leaving,
    /// Join rejected, timed out, or the connection failed.
    Errored,
}

impl ChannelState {
    /// Lowercase state name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Joining => "joining",
            Self::Joined => "joined",
            Self::Leaving => "leaving",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State change notification delivered to state listeners.
#[derive(Clone, Debug)]
pub enum ChannelEvent {
    /// A join was sent.
    Joining,
    /// The server accepted the join.
    Joined,
    /// The channel entered `errored`.
    Error(PhxError),
    /// The channel entered `closed`.
    Closed,
}

/// Handler for application events on a channel.
pub type EventHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// One topic on a socket. Obtained through [`Socket::channel`](crate::Socket::channel).
pub struct Channel {
    topic: String,
    socket: Weak<SocketInner>,
    me: Weak<Channel>,
    state: Mutex<ChannelState>,
    wants_joined: AtomicBool,
    params: Mutex<Value>,
    join_timeout: Mutex<Option<Duration>>,
    pending: Mutex<HashMap<String, Push>>,
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
    state_listeners: Listeners<ChannelEvent>,
    rejoin_timer: Mutex<Option<TimerHandle>>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("topic", &self.topic)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub(crate) fn new(topic: &str, socket: Weak<SocketInner>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            topic: topic.to_owned(),
            socket,
            me: me.clone(),
            state: Mutex::new(ChannelState::Closed),
            wants_joined: AtomicBool::new(false),
            params: Mutex::new(json!({})),
            join_timeout: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            state_listeners: Listeners::new(),
            rejoin_timer: Mutex::new(None),
        })
    }

    /// Topic this channel is bound to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    /// Number of pushes awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Payload sent with every join (and rejoin). Defaults to `{}`.
    pub fn set_params(&self, params: Value) {
        *self.params.lock() = params;
    }

    // ── Operations ──────────────────────────────────────────────────────

    /// Send `phx_join`. The handle resolves with the join reply.
    ///
    /// Fails with [`PhxError::AlreadyJoined`] while joining or joined.
    pub async fn join(&self, timeout: Option<Duration>) -> Result<PushHandle> {
        let socket = self.socket()?;
        {
            let mut state = self.state.lock();
            if matches!(*state, ChannelState::Joining | ChannelState::Joined) {
                return Err(PhxError::AlreadyJoined {
                    topic: self.topic.clone(),
                    state: state.to_string(),
                });
            }
            *state = ChannelState::Joining;
        }
        self.wants_joined.store(true, Ordering::SeqCst);
        self.cancel_rejoin();
        if timeout.is_some() {
            *self.join_timeout.lock() = timeout;
        }
        info!(topic = %self.topic, "joining channel");
        self.state_listeners.notify(&ChannelEvent::Joining);

        let payload = self.params.lock().clone();
        let result = self
            .send_push(&socket, PushKind::Join, JOIN_EVENT, payload, timeout)
            .await;
        if let Err(err) = &result {
            warn!(topic = %self.topic, kind = %err.kind(), error = %err, "join could not be sent");
            if self.transition(&[ChannelState::Joining], ChannelState::Errored) {
                self.state_listeners.notify(&ChannelEvent::Error(err.clone()));
            }
        }
        result
    }

    /// Send an application event. Only allowed while joined.
    pub async fn push(
        &self,
        event: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<PushHandle> {
        let socket = self.socket()?;
        self.require_joined()?;
        self.send_push(&socket, PushKind::Event, event, payload, timeout)
            .await
    }

    /// Send `phx_leave`. The channel is `closed` once the reply (or timeout) arrives.
    pub async fn leave(&self, timeout: Option<Duration>) -> Result<PushHandle> {
        let socket = self.socket()?;
        {
            let mut state = self.state.lock();
            if *state != ChannelState::Joined {
                return Err(self.not_joined(*state));
            }
            *state = ChannelState::Leaving;
        }
        self.wants_joined.store(false, Ordering::SeqCst);
        self.cancel_rejoin();
        info!(topic = %self.topic, "leaving channel");

        let result = self
            .send_push(&socket, PushKind::Leave, LEAVE_EVENT, json!({}), timeout)
            .await;
        if let Err(err) = &result {
            warn!(
                topic = %self.topic,
                kind = %err.kind(),
                error = %err,
                "leave could not be sent, closing locally"
            );
            if self.transition(&[ChannelState::Leaving], ChannelState::Closed) {
                self.state_listeners.notify(&ChannelEvent::Closed);
            }
        }
        result
    }

    /// Register a handler for `event`. Handlers accumulate.
    pub fn on(&self, event: &str, handler: EventHandler) {
        self.handlers
            .write()
            .entry(event.to_owned())
            .or_default()
            .push(handler);
    }

    /// Remove every handler for `event`.
    pub fn off(&self, event: &str) {
        let _ = self.handlers.write().remove(event);
    }

    /// Observe state changes.
    pub fn register_state_listener(&self, listener: Callback<ChannelEvent>) -> ListenerId {
        self.state_listeners.register(listener)
    }

    /// Stop observing state changes.
    pub fn unregister_state_listener(&self, id: ListenerId) -> bool {
        self.state_listeners.unregister(id)
    }

    // ── Socket → channel ───────────────────────────────────────────────

    /// Route an inbound message for this topic.
    ///
    /// A reply whose ref matches a pending push resolves it. Stale replies
    /// are dropped; everything else reaches the handlers for its event.
    pub fn retrieve_message(&self, message: &Message) {
        match message.event() {
            REPLY_EVENT => {
                let push = message
                    .reference()
                    .and_then(|reference| self.pending.lock().remove(reference));
                match push {
                    Some(push) => self.resolve_push(push, message),
                    None => {
                        debug!(topic = %self.topic, reference = ?message.reference(), "dropping stale reply");
                    }
                }
                return;
            }
            ERROR_EVENT => self.on_server_error(),
            CLOSE_EVENT => self.on_server_close(),
            _ => {}
        }
        self.dispatch(message);
    }

    /// Fail every pending push with `error` and move to `errored`
    /// (`leaving` and `closed` end in `closed`).
    pub fn retrieve_failure(&self, error: &PhxError) {
        let drained: Vec<Push> = self.pending.lock().drain().map(|(_, push)| push).collect();
        let failed = drained.len();
        for push in drained {
            push.resolve(Err(error.clone()));
        }
        self.cancel_rejoin();

        let (previous, next) = {
            let mut state = self.state.lock();
            let previous = *state;
            *state = match previous {
                ChannelState::Closed | ChannelState::Leaving => ChannelState::Closed,
                _ => ChannelState::Errored,
            };
            (previous, *state)
        };
        debug!(
            topic = %self.topic,
            %previous,
            %next,
            failed,
            kind = %error.kind(),
            recoverable = error.is_recoverable(),
            error = %error,
            "channel failure"
        );
        match (previous, next) {
            (ChannelState::Errored, _) | (ChannelState::Closed, ChannelState::Closed) => {}
            (_, ChannelState::Errored) => self.state_listeners.notify(&ChannelEvent::Error(error.clone())),
            (_, _) => self.state_listeners.notify(&ChannelEvent::Closed),
        }
    }

    /// Fail the push tracked under `reference` with a timeout.
    pub fn retrieve_timeout(&self, reference: &str) {
        let Some(push) = self.pending.lock().remove(reference) else {
            return;
        };
        let error = PhxError::Timeout {
            topic: self.topic.clone(),
            reference: reference.to_owned(),
            timeout_ms: u64::try_from(push.timeout.as_millis()).unwrap_or(u64::MAX),
        };
        warn!(
            topic = %self.topic,
            reference,
            event = %push.event,
            kind = %error.kind(),
            "push timed out"
        );
        match push.kind {
            PushKind::Join => {
                if self.transition(&[ChannelState::Joining], ChannelState::Errored) {
                    self.state_listeners.notify(&ChannelEvent::Error(error.clone()));
                }
            }
            PushKind::Leave => {
                if self.transition(&[ChannelState::Leaving], ChannelState::Closed) {
                    self.state_listeners.notify(&ChannelEvent::Closed);
                }
            }
            PushKind::Event => {}
        }
        push.resolve(Err(error));
    }

    /// Rejoin after the socket (re)opened, if the channel wants to be joined.
    pub(crate) async fn on_socket_open(&self) {
        if self.state() != ChannelState::Errored || !self.wants_joined.load(Ordering::SeqCst) {
            return;
        }
        self.rejoin().await;
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn socket(&self) -> Result<Arc<SocketInner>> {
        self.socket.upgrade().ok_or(PhxError::SocketDropped)
    }

    fn require_joined(&self) -> Result<()> {
        let state = self.state();
        if state == ChannelState::Joined {
            Ok(())
        } else {
            Err(self.not_joined(state))
        }
    }

    fn not_joined(&self, state: ChannelState) -> PhxError {
        PhxError::NotJoined {
            topic: self.topic.clone(),
            state: state.to_string(),
        }
    }

    /// Move to `to` if the current state is one of `from`.
    fn transition(&self, from: &[ChannelState], to: ChannelState) -> bool {
        let mut state = self.state.lock();
        if from.contains(&*state) {
            *state = to;
            true
        } else {
            false
        }
    }

    async fn send_push(
        &self,
        socket: &SocketInner,
        kind: PushKind,
        event: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<PushHandle> {
        let reference = socket.make_ref();
        let timeout = timeout.unwrap_or_else(|| socket.settings().default_timeout());
        let (push, rx) = Push::new(kind, event, timeout);
        let _ = self.pending.lock().insert(reference.clone(), push);

        let message = Message::new(&self.topic, event)
            .with_payload(payload)
            .with_ref(&reference);
        trace!(topic = %self.topic, %reference, event, "pushing");
        if let Err(err) = socket
            .send_message(message, Some(timeout), Some(self.me.clone()))
            .await
        {
            let _ = self.pending.lock().remove(&reference);
            return Err(err);
        }
        // Failed while waiting for buffer space: the frame must not go out later.
        let resolved = !self.pending.lock().contains_key(&reference);
        if resolved {
            socket.discard_frame(&reference);
        }
        Ok(PushHandle::new(reference, rx))
    }

    fn resolve_push(&self, push: Push, message: &Message) {
        let response = message.response().cloned().unwrap_or(Value::Null);
        let result = match message.reply_status() {
            Some(ReplyStatus::Ok) => Ok(response),
            _ => Err(PhxError::reply(
                message.status().unwrap_or("unknown"),
                message.reason().map(str::to_owned),
                response,
            )),
        };

        match (push.kind, &result) {
            (PushKind::Join, Ok(_)) => {
                if self.transition(&[ChannelState::Joining], ChannelState::Joined) {
                    info!(topic = %self.topic, "joined channel");
                    self.state_listeners.notify(&ChannelEvent::Joined);
                }
            }
            (PushKind::Join, Err(err)) => {
                warn!(topic = %self.topic, error = %err, "join rejected");
                if self.transition(&[ChannelState::Joining], ChannelState::Errored) {
                    self.state_listeners.notify(&ChannelEvent::Error(err.clone()));
                }
            }
            (PushKind::Leave, _) => {
                if self.transition(&[ChannelState::Leaving], ChannelState::Closed) {
                    info!(topic = %self.topic, "left channel");
                    self.state_listeners.notify(&ChannelEvent::Closed);
                }
            }
            (PushKind::Event, _) => {}
        }
        push.resolve(result);
    }

    fn on_server_error(&self) {
        let error = PhxError::reply("error", Some("server reported phx_error".into()), Value::Null);
        // An in-flight join is superseded by the scheduled rejoin.
        let joins: Vec<Push> = {
            let mut pending = self.pending.lock();
            let refs: Vec<String> = pending
                .iter()
                .filter(|(_, push)| push.kind == PushKind::Join)
                .map(|(reference, _)| reference.clone())
                .collect();
            refs.iter().filter_map(|reference| pending.remove(reference)).collect()
        };
        for push in joins {
            push.resolve(Err(error.clone()));
        }
        if !self.transition(&[ChannelState::Joining, ChannelState::Joined], ChannelState::Errored) {
            return;
        }
        warn!(topic = %self.topic, "server reported channel error");
        self.state_listeners.notify(&ChannelEvent::Error(error));
        self.schedule_rejoin();
    }

    fn on_server_close(&self) {
        self.wants_joined.store(false, Ordering::SeqCst);
        self.cancel_rejoin();
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, ChannelState::Closed)
        };
        if previous != ChannelState::Closed {
            info!(topic = %self.topic, "server closed channel");
            self.state_listeners.notify(&ChannelEvent::Closed);
        }
    }

    fn dispatch(&self, message: &Message) {
        let handlers = self
            .handlers
            .read()
            .get(message.event())
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            if is_lifecycle_event(message.event()) {
                trace!(topic = %self.topic, event = message.event(), "no handler for event");
            } else {
                debug!(topic = %self.topic, event = message.event(), "no handler for event");
            }
        }
        for handler in &handlers {
            handler(message);
        }
    }

    async fn rejoin(&self) {
        let timeout = *self.join_timeout.lock();
        debug!(topic = %self.topic, "rejoining channel");
        // The join outcome is observed through state listeners.
        if let Err(err) = self.join(timeout).await {
            debug!(topic = %self.topic, error = %err, "rejoin not sent");
        }
    }

    fn schedule_rejoin(&self) {
        let Ok(socket) = self.socket() else { return };
        let me = self.me.clone();
        let timer = schedule_once(socket.settings().reconnect_interval(), move || async move {
            let Some(channel) = me.upgrade() else { return };
            let connected = channel.socket().is_ok_and(|socket| socket.can_send_message());
            if connected
                && channel.state() == ChannelState::Errored
                && channel.wants_joined.load(Ordering::SeqCst)
            {
                channel.rejoin().await;
            }
        });
        if let Some(previous) = self.rejoin_timer.lock().replace(timer) {
            previous.cancel();
        }
    }

    fn cancel_rejoin(&self) {
        if let Some(timer) = self.rejoin_timer.lock().take() {
            timer.cancel();
        }
    }
}
