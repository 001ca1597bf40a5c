//! Session connection state.
//!
//! The state lives in a single atomic. Every transition is a compare-and-swap
//! from an expected state, so racing closers and reconnectors cannot both win.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Connection state of a session
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Dialled or reconnecting; handshake not complete
    Connecting = 0,
    /// Handshake complete
    Connected = 1,
    /// Teardown in progress
    Closing = 2,
    /// Terminal
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Connected,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }

    /// Closing or Closed
    pub fn is_terminal(self) -> bool {
        self >= SessionState::Closing
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Atomically updated session state
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// New cell in `Connecting`
    pub fn new() -> Self {
        Self(AtomicU8::new(SessionState::Connecting as u8))
    }

    /// Current state
    pub fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Whether the state is `Connected`
    pub fn is_connected(&self) -> bool {
        self.load() == SessionState::Connected
    }

    /// Move `from` → `to`; false if the state was not `from`
    pub fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Claim the teardown. Exactly one caller sees `true`; everyone else
    /// observes Closing or Closed.
    pub fn begin_close(&self) -> bool {
        let mut current = self.0.load(Ordering::SeqCst);
        loop {
            if SessionState::from_u8(current).is_terminal() {
                return false;
            }
            match self.0.compare_exchange(
                current,
                SessionState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Finish the teardown started by [`begin_close`](Self::begin_close)
    pub fn finish_close(&self) {
        self.0.store(SessionState::Closed as u8, Ordering::SeqCst);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
