//! [`Transport`] implementation over `tokio-tungstenite`.
//!
//! Each `open` spawns one connection task. The task owns the socket, writes
//! frames queued through the [`WebSocketHandle`], and turns everything read
//! from the socket into [`TransportEvent`]s. The task ends after emitting
//! `Closed` or `Failure`.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use phx_core::constants::CLOSE_NORMAL;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, info, warn};

use crate::transport::{EventSender, Transport, TransportEvent, TransportHandle};

/// Close code reported when the stream ends without a closing handshake.
const CLOSE_ABNORMAL: u16 = 1006;

/// WebSocket transport. Stateless; every `open` is independent.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a transport.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, url: &str, events: EventSender) -> Arc<dyn TransportHandle> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        drop(tokio::spawn(connection_loop(url.to_owned(), outbound_rx, events)));
        Arc::new(WebSocketHandle { outbound: outbound_tx })
    }
}

enum Outbound {
    Text(String),
    Close(u16, String),
}

/// Write side of one WebSocket connection.
struct WebSocketHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl TransportHandle for WebSocketHandle {
    fn send(&self, text: String) -> bool {
        self.outbound.send(Outbound::Text(text)).is_ok()
    }

    fn close(&self, code: u16, reason: &str) {
        let _ = self.outbound.send(Outbound::Close(code, reason.to_owned()));
    }
}

async fn connection_loop(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: EventSender,
) {
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(err) => {
            warn!(%url, error = %err, "websocket connect failed");
            let _ = events.send(TransportEvent::Failure(err.to_string()));
            return;
        }
    };
    info!(%url, "websocket connected");
    let _ = events.send(TransportEvent::Opened);

    let (mut ws_tx, mut ws_rx) = ws.split();
    // Close code/reason of whichever side initiated the handshake.
    let mut close_info: Option<(u16, String)> = None;
    let mut close_sent = false;

    loop {
        tokio::select! {
            out = outbound.recv(), if !close_sent => {
                let frame = match out {
                    Some(Outbound::Text(text)) => WsMessage::Text(text.into()),
                    Some(Outbound::Close(code, reason)) => {
                        close_sent = true;
                        if close_info.is_none() {
                            close_info = Some((code, reason.clone()));
                        }
                        WsMessage::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        }))
                    }
                    // Every handle is gone; nobody can observe the socket any more.
                    None => {
                        close_sent = true;
                        WsMessage::Close(None)
                    }
                };
                if let Err(err) = ws_tx.send(frame).await {
                    report_error(&events, err, close_info.take());
                    return;
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        let _ = events.send(TransportEvent::Text(text.as_str().to_owned()));
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            let _ = events.send(TransportEvent::Text(text.to_owned()));
                        }
                        Err(_) => debug!(len = bytes.len(), "dropping non-utf8 binary frame"),
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        let (code, reason) = frame.map_or((CLOSE_NORMAL, String::new()), |f| {
                            (u16::from(f.code), f.reason.as_str().to_owned())
                        });
                        debug!(code, %reason, "peer started closing handshake");
                        if close_info.is_none() {
                            close_info = Some((code, reason.clone()));
                        }
                        let _ = events.send(TransportEvent::Closing { code, reason });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        report_error(&events, err, close_info.take());
                        return;
                    }
                    None => {
                        let (code, reason) = close_info
                            .take()
                            .unwrap_or_else(|| (CLOSE_ABNORMAL, "stream ended".to_owned()));
                        info!(code, %reason, "websocket closed");
                        let _ = events.send(TransportEvent::Closed { code, reason });
                        return;
                    }
                }
            }
        }
    }
}

/// Map a tungstenite error to the terminal event.
///
/// `ConnectionClosed` after a handshake is an orderly close, not a failure.
fn report_error(events: &EventSender, err: WsError, close_info: Option<(u16, String)>) {
    match (err, close_info) {
        (WsError::ConnectionClosed | WsError::AlreadyClosed, Some((code, reason))) => {
            info!(code, %reason, "websocket closed");
            let _ = events.send(TransportEvent::Closed { code, reason });
        }
        (err, _) => {
            warn!(error = %err, "websocket failure");
            let _ = events.send(TransportEvent::Failure(err.to_string()));
        }
    }
}
