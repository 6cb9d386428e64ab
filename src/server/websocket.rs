//! Connection handle.
//!
//! [`WebSocket`] wraps one engine socket. Operations call the engine
//! synchronously and never block; failures are surfaced as
//! [`SocketEvent::Error`] on the connection's event channel. Backpressure
//! is enforced here: a send that leaves more than `max_backpressure` bytes
//! queued closes the connection with 1011.

use std::fmt;
use std::sync::Arc;

use axum::body::Bytes;
use tokio::sync::mpsc;

use super::events::{SocketEvent, SocketEvents};
use crate::domain::{AtomicReadyState, ConnectionId, ReadyState, decode_remote_address};
use crate::engine::{EngineSocket, MAX_BACKPRESSURE_REASON, SendStatus, close_code};
use crate::error::WsError;

struct Inner {
    id: ConnectionId,
    socket: Arc<dyn EngineSocket>,
    ready_state: AtomicReadyState,
    max_backpressure: usize,
    events: mpsc::UnboundedSender<SocketEvent>,
}

/// Handle to one accepted connection. Cheap to clone.
#[derive(Clone)]
pub struct WebSocket {
    inner: Arc<Inner>,
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("id", &self.inner.id)
            .field("ready_state", &self.inner.ready_state.get())
            .field("socket", &self.inner.socket)
            .finish()
    }
}

impl PartialEq for WebSocket {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for WebSocket {}

impl WebSocket {
    /// Wraps `socket` in the CONNECTING state.
    pub(crate) fn new(
        id: ConnectionId,
        socket: Arc<dyn EngineSocket>,
        max_backpressure: usize,
    ) -> (Self, SocketEvents) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let handle = Self {
            inner: Arc::new(Inner {
                id,
                socket,
                ready_state: AtomicReadyState::new(ReadyState::Connecting),
                max_backpressure,
                events,
            }),
        };
        (handle, events_rx)
    }

    pub(crate) fn emit(&self, event: SocketEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Moves the ready state forward, returning the previous state.
    pub(crate) fn advance(&self, state: ReadyState) -> ReadyState {
        self.inner.ready_state.advance(state)
    }

    /// Connection identity.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Current ready state.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.inner.ready_state.get()
    }

    /// Sends a ping frame. Fire and forget.
    pub fn ping(&self, data: impl Into<Bytes>) {
        if let Err(err) = self.inner.socket.ping(data.into()) {
            self.emit(SocketEvent::Error(err.to_string()));
        }
    }

    /// Pongs are answered by the engine; sending one on demand is not
    /// possible.
    ///
    /// # Errors
    ///
    /// Always returns [`WsError::Unsupported`].
    pub fn pong(&self, _data: impl Into<Bytes>) -> Result<(), WsError> {
        Err(WsError::Unsupported("pong"))
    }

    /// Sends a text (`is_binary == false`) or binary frame.
    ///
    /// A frame the engine queues above its high-water mark emits
    /// [`SocketEvent::Backpressure`]; if the queue then exceeds a nonzero
    /// `max_backpressure`, the connection is closed with 1011. The engine
    /// lowers its mark to `max_backpressure` when that is smaller.
    ///
    /// # Errors
    ///
    /// Returns the engine failure, which is also emitted as
    /// [`SocketEvent::Error`].
    pub fn send(&self, data: impl Into<Bytes>, is_binary: bool) -> Result<(), WsError> {
        match self.inner.socket.send(data.into(), is_binary) {
            Ok(SendStatus::Accepted) => Ok(()),
            Ok(SendStatus::Backpressured(buffered)) => {
                self.emit(SocketEvent::Backpressure(buffered));

                let limit = self.inner.max_backpressure;
                if limit > 0 && buffered > limit {
                    tracing::warn!(id = %self.inner.id, buffered, limit, "backpressure limit reached");
                    self.close(close_code::INTERNAL_ERROR, MAX_BACKPRESSURE_REASON);
                }
                Ok(())
            }
            Err(err) => {
                self.emit(SocketEvent::Error(err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Publishes to every subscriber of `topic` except this connection.
    pub fn publish(&self, topic: &str, message: impl Into<Bytes>, is_binary: bool) {
        self.inner.socket.publish(topic, message.into(), is_binary);
    }

    /// Subscribes to a topic filter (`+` and `#` wildcards allowed).
    pub fn subscribe(&self, topic: &str) {
        self.inner.socket.subscribe(topic);
    }

    /// Unsubscribes from a topic filter. Returns `false` if this
    /// connection was not subscribed.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.inner.socket.unsubscribe(topic)
    }

    /// Unsubscribes from every topic subscribed at the time of the call.
    pub fn unsubscribe_all(&self) {
        for topic in self.inner.socket.topics() {
            self.inner.socket.unsubscribe(&topic);
        }
    }

    /// Topic filters this connection is subscribed to.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.inner.socket.topics()
    }

    /// Starts a graceful close. Use [`close_code::NORMAL`] and an empty
    /// reason for a normal close.
    pub fn close(&self, code: u16, reason: &str) {
        if let Err(err) = self.inner.socket.end(code, reason) {
            self.emit(SocketEvent::Error(err.to_string()));
        }
    }

    /// Drops the connection immediately and emits
    /// [`SocketEvent::Close`] with 1006 right away, whether or not the
    /// engine abort succeeded.
    pub fn terminate(&self) {
        if let Err(err) = self.inner.socket.close() {
            tracing::debug!(id = %self.inner.id, %err, "terminate on closed socket");
        }
        if self.advance(ReadyState::Closed) < ReadyState::Closed {
            self.emit(SocketEvent::Close {
                code: close_code::ABNORMAL,
                reason: String::new(),
            });
        }
    }

    /// Bytes queued but not yet written. 0 if the engine cannot tell.
    #[must_use]
    pub fn buffered_amount(&self) -> usize {
        self.inner.socket.buffered_amount().unwrap_or(0)
    }

    /// Peer IP address as text (`127.0.0.1`, `::1`).
    #[must_use]
    pub fn remote_address(&self) -> String {
        decode_remote_address(&self.inner.socket.remote_address())
    }
}
