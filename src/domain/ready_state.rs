//! Connection ready states.
//!
//! A connection moves CONNECTING → OPEN → CLOSING → CLOSED and never
//! back. [`AtomicReadyState`] enforces that ordering with `fetch_max`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a connection, ordered by progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ReadyState {
    /// Handshake accepted, open callback not yet delivered.
    Connecting = 0,
    /// Open and usable.
    Open = 1,
    /// Close callback in progress.
    Closing = 2,
    /// Fully closed.
    Closed = 3,
}

impl ReadyState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// A [`ReadyState`] that can only move forward.
#[derive(Debug)]
pub struct AtomicReadyState(AtomicU8);

impl AtomicReadyState {
    /// Starts at `state`.
    #[must_use]
    pub const fn new(state: ReadyState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> ReadyState {
        ReadyState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves to `state` unless already at or past it. Returns the state
    /// held before the call.
    pub fn advance(&self, state: ReadyState) -> ReadyState {
        ReadyState::from_u8(self.0.fetch_max(state as u8, Ordering::AcqRel))
    }
}
