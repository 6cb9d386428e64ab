//! Socket engine: framing, upgrades, listeners and the engine callbacks.
//!
//! The engine owns the transport. It accepts HTTP connections through
//! `axum` (plain) or `axum-server` (TLS), runs the verification gate,
//! upgrades to WebSocket, and drives every socket with a reader loop and a
//! writer task. Everything it observes is reported as an [`EngineEvent`] on
//! a single channel consumed by the server dispatcher; everything the
//! server asks of a socket goes through the synchronous [`EngineSocket`]
//! trait.
//!
//! ```text
//! TcpListener ──► handshake (verify gate) ──► connection::run
//!                                                 │
//!                     EngineEvent channel ◄───────┤ open/message/ping/pong/drain/close
//!                                                 │
//!             WebSocket handle ──► EngineSocket ──► writer task ──► peer
//! ```

pub mod connection;
pub mod handshake;
pub mod listener;
pub mod socket;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;

use crate::domain::{ConnectionId, Payload};
use crate::error::EngineError;

pub use listener::ListenSocket;
pub use socket::{SocketKey, UpgradedSocket};

/// Queued outbound bytes above which a write is reported as not accepted.
pub const SEND_HIGH_WATER: usize = 64 * 1024;

/// Close reason used when a socket's queue exceeds `max_backpressure`.
pub const MAX_BACKPRESSURE_REASON: &str = "reached maxBackpressure";

/// High-water mark for a socket with the given backpressure limit.
///
/// A nonzero limit below [`SEND_HIGH_WATER`] lowers the mark so the limit
/// is checked as soon as it is crossed.
#[must_use]
pub fn high_water(max_backpressure: usize) -> usize {
    if max_backpressure > 0 {
        max_backpressure.min(SEND_HIGH_WATER)
    } else {
        SEND_HIGH_WATER
    }
}

/// How long a graceful close waits for the peer before dropping the
/// transport.
pub const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Close codes used by the engine and the handles.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Close frame carried no status code.
    pub const NO_STATUS: u16 = 1005;
    /// Transport lost without a close frame (abort, idle timeout, error).
    pub const ABNORMAL: u16 = 1006;
    /// Server-side failure; used when the backpressure limit is breached.
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Outcome of a queued data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Queued at or below the high-water mark.
    Accepted,
    /// Queued, leaving this many bytes buffered above the high-water mark.
    Backpressured(usize),
}

/// Synchronous per-socket operations offered by the engine.
///
/// None of these block: writes are queued and flushed by the socket's
/// writer task.
pub trait EngineSocket: fmt::Debug + Send + Sync {
    /// Engine-local key of this socket.
    fn key(&self) -> SocketKey;

    /// Attaches the server-assigned identity. Only the first call sticks.
    fn bind_id(&self, id: ConnectionId);

    /// Identity attached by [`EngineSocket::bind_id`].
    fn bound_id(&self) -> Option<ConnectionId>;

    /// Queues a data frame. [`SendStatus::Backpressured`] means the frame
    /// was queued but the socket is above its high-water mark.
    ///
    /// # Errors
    ///
    /// [`EngineError::Closed`] once the socket is closing or closed,
    /// [`EngineError::InvalidUtf8`] for a non UTF-8 text frame.
    fn send(&self, data: Bytes, is_binary: bool) -> Result<SendStatus, EngineError>;

    /// Queues a ping frame.
    ///
    /// # Errors
    ///
    /// [`EngineError::Closed`] once the socket is closing or closed.
    fn ping(&self, data: Bytes) -> Result<(), EngineError>;

    /// Starts a graceful close with `code` and `reason`.
    ///
    /// # Errors
    ///
    /// [`EngineError::Closed`] if a close already started,
    /// [`EngineError::CloseReasonTooLong`] for reasons over 123 bytes.
    fn end(&self, code: u16, reason: &str) -> Result<(), EngineError>;

    /// Drops the transport immediately.
    ///
    /// # Errors
    ///
    /// [`EngineError::Closed`] if the socket is already closed.
    fn close(&self) -> Result<(), EngineError>;

    /// Bytes queued but not yet flushed to the peer.
    ///
    /// # Errors
    ///
    /// [`EngineError::Closed`] once the socket is closed.
    fn buffered_amount(&self) -> Result<usize, EngineError>;

    /// Peer address as raw network-order bytes (4 or 16).
    fn remote_address(&self) -> Vec<u8>;

    /// Publishes to every other subscriber of `topic`. Returns how many
    /// sockets were reached, 0 once this socket is closing or closed.
    fn publish(&self, topic: &str, data: Bytes, is_binary: bool) -> usize;

    /// Subscribes to a topic filter. `false` if already subscribed or
    /// closed.
    fn subscribe(&self, topic: &str) -> bool;

    /// Unsubscribes from a topic filter. `false` if not subscribed.
    fn unsubscribe(&self, topic: &str) -> bool;

    /// Current topic filters.
    fn topics(&self) -> Vec<String>;
}

/// Callbacks the engine delivers to the server dispatcher, in order.
#[derive(Debug)]
pub enum EngineEvent {
    /// The listening socket is bound.
    Listening(ListenSocket),
    /// Binding (or loading TLS material) failed.
    ListenFailed(String),
    /// A socket completed its upgrade.
    Open(Arc<dyn EngineSocket>),
    /// A data frame arrived.
    Message(Arc<dyn EngineSocket>, Payload),
    /// A backpressured socket flushed its queue.
    Drain(Arc<dyn EngineSocket>),
    /// The peer sent a ping.
    Ping(Arc<dyn EngineSocket>, Bytes),
    /// The peer sent a pong.
    Pong(Arc<dyn EngineSocket>, Bytes),
    /// The socket is gone. Delivered exactly once per opened socket.
    Close {
        /// The closed socket.
        socket: Arc<dyn EngineSocket>,
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}
