//! Server-scope and connection-scope events.
//!
//! Both are delivered over unbounded `tokio::sync::mpsc` channels, so a
//! receiver that starts polling right after `start` returns still sees
//! `Listening` (or the bind `Error`).

use axum::body::Bytes;
use tokio::sync::mpsc;

use super::WebSocket;
use crate::domain::Payload;

/// Receiver of [`ServerEvent`]s.
pub type ServerEvents = mpsc::UnboundedReceiver<ServerEvent>;

/// Receiver of one connection's [`SocketEvent`]s.
pub type SocketEvents = mpsc::UnboundedReceiver<SocketEvent>;

/// Events emitted at server scope.
#[derive(Debug)]
pub enum ServerEvent {
    /// A peer passed the verification gate and opened. Carries the handle
    /// and the receiver for its events.
    Connection(WebSocket, SocketEvents),
    /// The listening socket is bound.
    Listening,
    /// Shutdown finished. Emitted once per server.
    Close,
    /// The listener could not be started.
    Error(String),
    /// A backpressured connection flushed its queue.
    Drain(WebSocket),
    /// A connection received a ping.
    Ping(WebSocket),
    /// A connection received a pong.
    Pong(WebSocket),
}

/// Events emitted on a single connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The connection is open.
    Open,
    /// A data frame arrived.
    Message(Payload),
    /// The connection closed.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// An operation on the connection failed.
    Error(String),
    /// A send was queued above the high-water mark; carries the buffered
    /// byte count.
    Backpressure(usize),
    /// The outbound queue drained; carries the buffered byte count.
    Drain(usize),
    /// The peer sent a ping.
    Ping(Bytes),
    /// The peer sent a pong.
    Pong(Bytes),
}
