//! Protocol versions and packet type tables.
//!
//! engine.io frames every transport message with a single leading type
//! character; the `Message` type wraps a socket.io packet whose own type is
//! the next character (text mode) or the `type` field of a msgpack envelope
//! (binary mode).

use serde::{Deserialize, Serialize};

/// Default (and only supported) namespace
pub const DEFAULT_NSP: &str = "/";

/// engine.io protocol revision negotiated through the `EIO` query parameter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// engine.io v3: the client pings, the server pongs
    V3,
    /// engine.io v4: the server pings, the client pongs
    #[default]
    V4,
}

impl ProtocolVersion {
    /// Resolve a requested revision. Anything that is not 3 is treated as the
    /// newest supported revision.
    pub fn from_requested(requested: u8) -> Self {
        match requested {
            3 => ProtocolVersion::V3,
            _ => ProtocolVersion::V4,
        }
    }

    /// Numeric revision
    pub fn number(self) -> u8 {
        match self {
            ProtocolVersion::V3 => 3,
            ProtocolVersion::V4 => 4,
        }
    }

    /// Query string fragment selecting this revision
    pub fn query(self) -> String {
        format!("EIO={}", self.number())
    }
}

/// engine.io packet types (leading character of a text frame)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePacketType {
    /// Handshake, carries the JSON header
    Open = b'0',
    /// Transport close notice
    Close = b'1',
    /// Liveness probe
    Ping = b'2',
    /// Liveness reply
    Pong = b'3',
    /// socket.io payload
    Message = b'4',
    /// Transport upgrade
    Upgrade = b'5',
    /// No operation
    Noop = b'6',
}

impl EnginePacketType {
    /// Prefix character
    pub fn as_char(self) -> char {
        self as u8 as char
    }
}

impl TryFrom<u8> for EnginePacketType {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'0' => Ok(EnginePacketType::Open),
            b'1' => Ok(EnginePacketType::Close),
            b'2' => Ok(EnginePacketType::Ping),
            b'3' => Ok(EnginePacketType::Pong),
            b'4' => Ok(EnginePacketType::Message),
            b'5' => Ok(EnginePacketType::Upgrade),
            b'6' => Ok(EnginePacketType::Noop),
            _ => Err(crate::WireError::UnknownPacketType(value)),
        }
    }
}

/// socket.io packet types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketType {
    /// Namespace connect
    Connect = 0,
    /// Namespace disconnect
    Disconnect = 1,
    /// Event
    Event = 2,
    /// Acknowledgement of an event
    Ack = 3,
    /// Namespace connect refused
    ConnectError = 4,
    /// Event with binary attachments
    BinaryEvent = 5,
    /// Acknowledgement with binary attachments
    BinaryAck = 6,
}

impl PacketType {
    /// Digit used by the text encoding
    pub fn as_char(self) -> char {
        (b'0' + self as u8) as char
    }
}

impl TryFrom<u8> for PacketType {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::Connect),
            1 => Ok(PacketType::Disconnect),
            2 => Ok(PacketType::Event),
            3 => Ok(PacketType::Ack),
            4 => Ok(PacketType::ConnectError),
            5 => Ok(PacketType::BinaryEvent),
            6 => Ok(PacketType::BinaryAck),
            _ => Err(crate::WireError::UnknownPacketType(value)),
        }
    }
}
