//! Error and close-reason types for sessions.

use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

/// Close code of a normal WebSocket closure; anything above is abnormal
pub const NORMAL_CLOSE_CODE: u16 = 1000;
/// Close code reported when a connection drops without a close frame
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Errors reported by a [`Transport`](crate::Transport)
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport was closed locally; nothing more will be read
    #[error("use of closed network connection")]
    ConnectionClosed,

    /// The peer closed the connection
    #[error("connection closed ({code}): {reason}")]
    Closed {
        /// Close code
        code: u16,
        /// Close reason text
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Dial or handshake timed out
    #[error("transport timeout")]
    Timeout,

    /// Any other transport failure
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Peer closure with a code that signals abnormal termination
    pub fn is_abnormal_close(&self) -> bool {
        matches!(self, TransportError::Closed { code, .. } if *code > NORMAL_CLOSE_CODE)
    }
}

/// Session errors surfaced to application code
#[derive(Error, Debug)]
pub enum SessionError {
    /// Acknowledgement did not arrive in time
    #[error("timeout")]
    Timeout,

    /// Session is closing or closed
    #[error("session closed")]
    Closed,

    /// Outbound queue stayed full past the push deadline
    #[error("socket overflood")]
    Overflow,

    /// Dial failed
    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),

    /// Every reconnection attempt failed
    #[error("reconnect failed after {attempts} attempts: {source}")]
    ReconnectFailed {
        /// Attempts made
        attempts: u32,
        /// Last transport error
        source: TransportError,
    },

    /// Building an outbound packet panicked
    #[error("send panicked: {0}")]
    SendPanicked(String),
}

/// Why a session closed, reported to disconnection handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Default: deliberate close by either side
    TransportClose,
    /// Open packet could not be parsed
    ParseOpenMsg(String),
    /// Outbound backlog exceeded its capacity
    QueueOverflow,
    /// No heartbeat and reconnection failed
    PingTimeout,
    /// Server disconnected the namespace
    ServerDisconnect,
    /// Transport or protocol failure
    Transport(String),
}

impl CloseReason {
    /// Numeric code
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::TransportClose => 101,
            CloseReason::ParseOpenMsg(_) => 102,
            CloseReason::QueueOverflow => 103,
            CloseReason::PingTimeout => 104,
            CloseReason::ServerDisconnect => 105,
            CloseReason::Transport(_) => 106,
        }
    }

    /// Human-readable text
    pub fn text(&self) -> String {
        match self {
            CloseReason::TransportClose => "transport close".to_string(),
            CloseReason::ParseOpenMsg(e) => e.clone(),
            CloseReason::QueueOverflow => SessionError::Overflow.to_string(),
            CloseReason::PingTimeout => "ping timeout".to_string(),
            CloseReason::ServerDisconnect => "io server disconnect".to_string(),
            CloseReason::Transport(e) => e.clone(),
        }
    }

    /// JSON form handed to disconnection handlers
    pub fn to_value(&self) -> Value {
        json!({ "code": self.code(), "text": self.text() })
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.text(), self.code())
    }
}

impl From<&TransportError> for CloseReason {
    fn from(err: &TransportError) -> Self {
        CloseReason::Transport(err.to_string())
    }
}
