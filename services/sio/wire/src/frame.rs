//! engine.io framing: inbound classification and outbound frame building.

use crate::codec::{encode_msgpack, encode_text};
use crate::packet::Packet;
use crate::protocol::{EnginePacketType, PacketType, ProtocolVersion};
use crate::WireError;
use bytes::Bytes;
use serde_json::json;

/// Transport-level message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// UTF-8 text message
    Text,
    /// Binary message
    Binary,
}

/// A fully encoded message ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Text or binary
    pub kind: FrameKind,
    /// Encoded bytes
    pub data: Bytes,
    /// Sender asked for expedited handling
    pub priority: bool,
}

impl Frame {
    /// Text frame
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Text,
            data: Bytes::from(text.into()),
            priority: false,
        }
    }

    /// Binary frame
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Binary,
            data: data.into(),
            priority: false,
        }
    }

    /// Mark the frame as priority
    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    /// Text content, if this is a valid text frame
    pub fn as_text(&self) -> Option<&str> {
        match self.kind {
            FrameKind::Text => std::str::from_utf8(&self.data).ok(),
            FrameKind::Binary => None,
        }
    }
}

/// Items carried by the outbound queue
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundPacket {
    /// Client heartbeat (v3)
    Ping,
    /// Reply to a server heartbeat (v4)
    Pong,
    /// Synthetic close signal; stops the outbound loop
    Close,
    /// Namespace connect request sent after the v4 handshake
    Connect,
    /// Application packet
    Packet {
        /// The socket.io packet
        packet: Packet,
        /// Priority marking from the message context
        priority: bool,
    },
}

impl OutboundPacket {
    /// Packets written immediately, skipping the ordered buffer
    pub fn is_bypass(&self) -> bool {
        matches!(self, OutboundPacket::Close | OutboundPacket::Connect)
    }
}

/// Classified inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// Handshake with its JSON header
    Open(&'a [u8]),
    /// Transport close notice
    Close,
    /// Server heartbeat
    Ping,
    /// Heartbeat reply
    Pong,
    /// Upgrade notice
    Upgrade,
    /// No operation
    Noop,
    /// socket.io payload following the message prefix
    Message(&'a [u8]),
    /// Unprefixed payload (binary envelope)
    Raw(&'a [u8]),
}

/// Classify an inbound message by its leading byte
pub fn classify(raw: &[u8]) -> Result<Inbound<'_>, WireError> {
    let (&first, rest) = raw.split_first().ok_or(WireError::Empty)?;

    Ok(match EnginePacketType::try_from(first) {
        Ok(EnginePacketType::Open) => Inbound::Open(rest),
        Ok(EnginePacketType::Close) => Inbound::Close,
        Ok(EnginePacketType::Ping) => Inbound::Ping,
        Ok(EnginePacketType::Pong) => Inbound::Pong,
        Ok(EnginePacketType::Message) => Inbound::Message(rest),
        Ok(EnginePacketType::Upgrade) => Inbound::Upgrade,
        Ok(EnginePacketType::Noop) => Inbound::Noop,
        Err(_) => Inbound::Raw(raw),
    })
}

fn control(kind: EnginePacketType) -> Frame {
    Frame::text(kind.as_char().to_string())
}

fn encode_message(packet: &Packet, version: ProtocolVersion, binary: bool) -> Result<Frame, WireError> {
    if binary {
        let body = encode_msgpack(packet)?;
        let data = match version {
            ProtocolVersion::V3 => {
                let mut prefixed = Vec::with_capacity(body.len() + 1);
                prefixed.push(EnginePacketType::Message as u8);
                prefixed.extend_from_slice(&body);
                prefixed
            }
            ProtocolVersion::V4 => body,
        };
        Ok(Frame::binary(data))
    } else {
        let mut text = String::new();
        text.push(EnginePacketType::Message.as_char());
        text.push_str(&encode_text(packet)?);
        Ok(Frame::text(text))
    }
}

/// Build the transport frame for an outbound queue item
pub fn encode_outbound(
    packet: &OutboundPacket,
    version: ProtocolVersion,
    binary: bool,
) -> Result<Frame, WireError> {
    match packet {
        OutboundPacket::Ping => Ok(control(EnginePacketType::Ping)),
        OutboundPacket::Pong => Ok(control(EnginePacketType::Pong)),
        OutboundPacket::Close => Ok(control(EnginePacketType::Close)),
        OutboundPacket::Connect => {
            let connect = if binary {
                Packet::new(PacketType::Connect, Some(json!({})))
            } else {
                Packet::connect()
            };
            encode_message(&connect, version, binary)
        }
        OutboundPacket::Packet { packet, priority } => {
            Ok(encode_message(packet, version, binary)?.with_priority(*priority))
        }
    }
}
