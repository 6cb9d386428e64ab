//! In-memory [`EngineSocket`] for unit tests.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use axum::body::Bytes;

use super::{EngineSocket, SendStatus, SocketKey};
use crate::domain::ConnectionId;
use crate::error::EngineError;

static NEXT_MOCK_KEY: AtomicU64 = AtomicU64::new(1 << 32);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records every call; `fail` makes every fallible call return
/// [`EngineError::Closed`], `accept` controls the send result.
#[derive(Debug)]
pub(crate) struct MockSocket {
    key: SocketKey,
    id: OnceLock<ConnectionId>,
    pub(crate) remote: Vec<u8>,
    pub(crate) accept: AtomicBool,
    pub(crate) fail: AtomicBool,
    pub(crate) buffered: AtomicUsize,
    pub(crate) aborted: AtomicBool,
    pub(crate) sent: Mutex<Vec<(Bytes, bool)>>,
    pub(crate) pings: Mutex<Vec<Bytes>>,
    pub(crate) ended: Mutex<Option<(u16, String)>>,
    pub(crate) published: Mutex<Vec<(String, Bytes, bool)>>,
    topics: Mutex<BTreeSet<String>>,
}

impl MockSocket {
    pub(crate) fn new() -> Self {
        Self {
            key: SocketKey(NEXT_MOCK_KEY.fetch_add(1, Ordering::Relaxed)),
            id: OnceLock::new(),
            remote: vec![127, 0, 0, 1],
            accept: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            buffered: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            pings: Mutex::new(Vec::new()),
            ended: Mutex::new(None),
            published: Mutex::new(Vec::new()),
            topics: Mutex::new(BTreeSet::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        let socket = Self::new();
        socket.fail.store(true, Ordering::Relaxed);
        socket
    }

    fn check(&self) -> Result<(), EngineError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    pub(crate) fn sent(&self) -> Vec<(Bytes, bool)> {
        lock(&self.sent).clone()
    }

    pub(crate) fn ended(&self) -> Option<(u16, String)> {
        lock(&self.ended).clone()
    }
}

impl EngineSocket for MockSocket {
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
        self.check()?;
        let buffered = self.buffered.fetch_add(data.len(), Ordering::Relaxed) + data.len();
        lock(&self.sent).push((data, is_binary));
        if self.accept.load(Ordering::Relaxed) {
            Ok(SendStatus::Accepted)
        } else {
            Ok(SendStatus::Backpressured(buffered))
        }
    }

    fn ping(&self, data: Bytes) -> Result<(), EngineError> {
        self.check()?;
        lock(&self.pings).push(data);
        Ok(())
    }

    fn end(&self, code: u16, reason: &str) -> Result<(), EngineError> {
        self.check()?;
        *lock(&self.ended) = Some((code, reason.to_string()));
        Ok(())
    }

    fn close(&self) -> Result<(), EngineError> {
        self.aborted.store(true, Ordering::Relaxed);
        self.check()
    }

    fn buffered_amount(&self) -> Result<usize, EngineError> {
        self.check()?;
        Ok(self.buffered.load(Ordering::Relaxed))
    }

    fn remote_address(&self) -> Vec<u8> {
        self.remote.clone()
    }

    fn publish(&self, topic: &str, data: Bytes, is_binary: bool) -> usize {
        lock(&self.published).push((topic.to_string(), data, is_binary));
        0
    }

    fn subscribe(&self, topic: &str) -> bool {
        lock(&self.topics).insert(topic.to_string())
    }

    fn unsubscribe(&self, topic: &str) -> bool {
        lock(&self.topics).remove(topic)
    }

    fn topics(&self) -> Vec<String> {
        lock(&self.topics).iter().cloned().collect()
    }
}
