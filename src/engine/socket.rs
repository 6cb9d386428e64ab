//! Engine-side socket state.
//!
//! [`UpgradedSocket`] is shared between the connection driver, its writer
//! task, the topic broker and the server's handle. Writes go through an
//! unbounded queue; `buffered` counts the bytes still in it so callers get
//! a backpressure signal instead of blocking.

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use tokio::sync::{Notify, mpsc};

use super::{EngineEvent, EngineSocket, MAX_BACKPRESSURE_REASON, SendStatus, close_code};
use crate::domain::{ConnectionId, raw_address};
use crate::error::EngineError;
use crate::pubsub::{Subscriber, TopicBroker};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Engine-local socket key, distinct from the server's [`ConnectionId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketKey(pub u64);

impl SocketKey {
    fn next() -> Self {
        Self(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SocketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Item on a socket's write queue.
#[derive(Debug)]
pub enum Outbound {
    /// A frame and the number of payload bytes it adds to `buffered`.
    Frame(Message, usize),
    /// Close frame; the writer stops after sending it.
    Close(CloseFrame),
}

const OPEN: u8 = 0;
const ENDING: u8 = 1;
const CLOSED: u8 = 2;

/// Shared state of one upgraded WebSocket.
pub struct UpgradedSocket {
    key: SocketKey,
    id: OnceLock<ConnectionId>,
    remote: IpAddr,
    phase: AtomicU8,
    buffered: AtomicUsize,
    backpressured: AtomicBool,
    high_water: usize,
    max_backpressure: usize,
    local_close: Mutex<Option<(u16, String)>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    pub(crate) ending: Notify,
    pub(crate) aborted: Notify,
    broker: Arc<TopicBroker>,
    events: mpsc::UnboundedSender<EngineEvent>,
    this: Weak<UpgradedSocket>,
}

impl fmt::Debug for UpgradedSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradedSocket")
            .field("key", &self.key)
            .field("id", &self.id.get())
            .field("remote", &self.remote)
            .field("phase", &self.phase.load(Ordering::Relaxed))
            .field("buffered", &self.buffered.load(Ordering::Relaxed))
            .finish()
    }
}

impl UpgradedSocket {
    /// Creates the socket state and the receiving end of its write queue.
    ///
    /// Sends report not accepted above `high_water`. Published messages
    /// that leave more than a nonzero `max_backpressure` queued close the
    /// socket with 1011.
    #[must_use]
    pub fn new(
        remote: IpAddr,
        high_water: usize,
        max_backpressure: usize,
        broker: Arc<TopicBroker>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let socket = Arc::new_cyclic(|this| Self {
            key: SocketKey::next(),
            id: OnceLock::new(),
            remote,
            phase: AtomicU8::new(OPEN),
            buffered: AtomicUsize::new(0),
            backpressured: AtomicBool::new(false),
            high_water,
            max_backpressure,
            local_close: Mutex::new(None),
            outbound,
            ending: Notify::new(),
            aborted: Notify::new(),
            broker,
            events,
            this: Weak::clone(this),
        });
        (socket, outbound_rx)
    }

    fn is_open(&self) -> bool {
        self.phase.load(Ordering::Acquire) == OPEN
    }

    /// `true` once the socket was aborted or its driver finished.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.phase.load(Ordering::Acquire) == CLOSED
    }

    /// Close code and reason passed to [`EngineSocket::end`], if any.
    #[must_use]
    pub fn local_close(&self) -> Option<(u16, String)> {
        self.local_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn emit(&self, event: impl FnOnce(Arc<dyn EngineSocket>) -> EngineEvent) {
        if let Some(this) = self.this.upgrade() {
            let this: Arc<dyn EngineSocket> = this;
            let _ = self.events.send(event(this));
        }
    }

    /// Called by the writer after `len` payload bytes reached the peer.
    /// Fires the drain callback when a backpressured queue empties.
    pub(crate) fn flushed(&self, len: usize) {
        let before = self.buffered.fetch_sub(len, Ordering::AcqRel);
        if before.saturating_sub(len) == 0 && self.backpressured.swap(false, Ordering::AcqRel) {
            self.emit(EngineEvent::Drain);
        }
    }

    /// Marks the socket closed and drops its subscriptions.
    pub(crate) fn finish(&self) {
        self.phase.store(CLOSED, Ordering::Release);
        self.broker.remove(self.key);
    }

    fn enqueue(&self, item: Outbound) -> Result<(), EngineError> {
        self.outbound.send(item).map_err(|_| EngineError::Closed)
    }
}

impl EngineSocket for UpgradedSocket {
    fn key(&self) -> SocketKey {
        self.key
    }

    fn bind_id(&self, id: ConnectionId) {
        let _ = self.id.set(id);
    }

    fn bound_id(&self) -> Option<ConnectionId> {
        self.id.get().copied()
    }

    fn send(&self, data: Bytes, is_binary: bool) -> Result<SendStatus, EngineError> {
        if !self.is_open() {
            return Err(EngineError::Closed);
        }

        let len = data.len();
        let message = if is_binary {
            Message::Binary(data)
        } else {
            let text = Utf8Bytes::try_from(data).map_err(|_| EngineError::InvalidUtf8)?;
            Message::Text(text)
        };

        let buffered = self.buffered.fetch_add(len, Ordering::AcqRel) + len;
        if let Err(err) = self.enqueue(Outbound::Frame(message, len)) {
            self.buffered.fetch_sub(len, Ordering::AcqRel);
            return Err(err);
        }

        if buffered > self.high_water {
            self.backpressured.store(true, Ordering::Release);
            return Ok(SendStatus::Backpressured(buffered));
        }
        Ok(SendStatus::Accepted)
    }

    fn ping(&self, data: Bytes) -> Result<(), EngineError> {
        if !self.is_open() {
            return Err(EngineError::Closed);
        }
        self.enqueue(Outbound::Frame(Message::Ping(data), 0))
    }

    fn end(&self, code: u16, reason: &str) -> Result<(), EngineError> {
        if reason.len() > 123 {
            return Err(EngineError::CloseReasonTooLong(reason.len()));
        }
        self.phase
            .compare_exchange(OPEN, ENDING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::Closed)?;

        *self.local_close.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((code, reason.to_string()));
        let frame = CloseFrame {
            code,
            reason: Utf8Bytes::from(reason.to_string()),
        };
        // The driver bounds the handshake even if the writer is gone.
        let _ = self.enqueue(Outbound::Close(frame));
        self.ending.notify_one();
        Ok(())
    }

    fn close(&self) -> Result<(), EngineError> {
        if self.phase.swap(CLOSED, Ordering::AcqRel) == CLOSED {
            return Err(EngineError::Closed);
        }
        self.aborted.notify_one();
        Ok(())
    }

    fn buffered_amount(&self) -> Result<usize, EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        Ok(self.buffered.load(Ordering::Acquire))
    }

    fn remote_address(&self) -> Vec<u8> {
        raw_address(self.remote)
    }

    fn publish(&self, topic: &str, data: Bytes, is_binary: bool) -> usize {
        if !self.is_open() {
            return 0;
        }
        self.broker.publish(topic, &data, is_binary, Some(self.key))
    }

    fn subscribe(&self, topic: &str) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.this.upgrade() {
            Some(this) => self.broker.subscribe(self.key, this, topic),
            None => false,
        }
    }

    fn unsubscribe(&self, topic: &str) -> bool {
        self.broker.unsubscribe(self.key, topic)
    }

    fn topics(&self) -> Vec<String> {
        self.broker.topics(self.key)
    }
}

impl Subscriber for UpgradedSocket {
    fn deliver(&self, data: Bytes, is_binary: bool) {
        match self.send(data, is_binary) {
            Ok(SendStatus::Accepted) => {}
            Ok(SendStatus::Backpressured(buffered)) => {
                let limit = self.max_backpressure;
                if limit > 0 && buffered > limit {
                    tracing::warn!(key = %self.key, buffered, limit, "subscriber over backpressure limit");
                    let _ = self.end(close_code::INTERNAL_ERROR, MAX_BACKPRESSURE_REASON);
                }
            }
            Err(err) => {
                tracing::debug!(key = %self.key, %err, "dropped published message");
            }
        }
    }
}
