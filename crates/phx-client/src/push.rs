//! Pending pushes and the handle callers await for their reply.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use phx_core::{PhxError, Result};
use serde_json::Value;
use tokio::sync::oneshot;

/// Outcome of a push: the reply's `response` on success.
pub type PushResult = Result<Value>;

/// What a pending push means for the channel state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PushKind {
    Join,
    Leave,
    Event,
}

/// A push waiting for its reply, timeout or failure.
#[derive(Debug)]
pub(crate) struct Push {
    pub(crate) kind: PushKind,
    pub(crate) event: String,
    pub(crate) timeout: Duration,
    reply: oneshot::Sender<PushResult>,
}

impl Push {
    pub(crate) fn new(kind: PushKind, event: &str, timeout: Duration) -> (Self, oneshot::Receiver<PushResult>) {
        let (reply, rx) = oneshot::channel();
        let push = Self {
            kind,
            event: event.to_owned(),
            timeout,
            reply,
        };
        (push, rx)
    }

    /// Deliver the outcome. A dropped [`PushHandle`] is not an error.
    pub(crate) fn resolve(self, result: PushResult) {
        let _ = self.reply.send(result);
    }
}

/// Resolves once the push is answered, times out, or its connection fails.
///
/// Dropping the handle does not cancel the push.
#[derive(Debug)]
#[must_use = "a PushHandle does nothing unless awaited"]
pub struct PushHandle {
    reference: String,
    rx: oneshot::Receiver<PushResult>,
}

impl PushHandle {
    pub(crate) fn new(reference: String, rx: oneshot::Receiver<PushResult>) -> Self {
        Self { reference, rx }
    }

    /// Correlation ref carried by the pushed envelope.
    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl Future for PushHandle {
    type Output = PushResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(PhxError::SocketDropped)))
    }
}
