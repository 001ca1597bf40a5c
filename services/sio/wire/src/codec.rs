//! Text and msgpack encodings of socket.io packets.
//!
//! Text layout: `<type>[<attachments>-][<nsp>,][<id>][<json>]`. The default
//! namespace is implied and never written. Binary layout is a msgpack map
//! `{type, data, nsp, id}` with no leading character.

use crate::packet::{AckId, Packet};
use crate::protocol::{PacketType, DEFAULT_NSP};
use crate::WireError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

/// Encode a packet with the text sub-protocol (engine.io prefix not included)
pub fn encode_text(packet: &Packet) -> Result<String, WireError> {
    let mut out = String::with_capacity(16);
    out.push(packet.kind.as_char());

    if !packet.is_default_nsp() {
        out.push_str(&packet.nsp);
        out.push(',');
    }

    if let Some(id) = packet.id {
        out.push_str(&id.to_string());
    }

    if let Some(data) = &packet.data {
        out.push_str(&serde_json::to_string(data)?);
    }

    Ok(out)
}

/// Decode a text sub-protocol packet (engine.io prefix already stripped)
pub fn decode_text(payload: &[u8]) -> Result<Packet, WireError> {
    let text = std::str::from_utf8(payload).map_err(|e| WireError::Malformed(e.to_string()))?;
    let first = *text.as_bytes().first().ok_or(WireError::Empty)?;
    if !first.is_ascii_digit() {
        return Err(WireError::UnknownPacketType(first));
    }
    let kind = PacketType::try_from(first - b'0')?;
    let mut rest = &text[1..];

    // Attachment count; placeholders are left inside the JSON untouched
    if matches!(kind, PacketType::BinaryEvent | PacketType::BinaryAck) {
        if let Some(dash) = rest.find('-') {
            if dash > 0 && rest[..dash].bytes().all(|b| b.is_ascii_digit()) {
                trace!("Skipping {} binary attachment(s)", &rest[..dash]);
                rest = &rest[dash + 1..];
            }
        }
    }

    let nsp = if rest.starts_with('/') {
        match rest.find(',') {
            Some(comma) => {
                let nsp = &rest[..comma];
                rest = &rest[comma + 1..];
                nsp
            }
            None => std::mem::take(&mut rest),
        }
    } else {
        DEFAULT_NSP
    };

    let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
    let id = if digits > 0 {
        Some(
            rest[..digits]
                .parse::<AckId>()
                .map_err(|e| WireError::Malformed(format!("ack id: {}", e)))?,
        )
    } else {
        None
    };
    rest = &rest[digits..];

    let data = if rest.is_empty() {
        None
    } else {
        Some(serde_json::from_str::<Value>(rest)?)
    };

    Ok(Packet {
        kind,
        nsp: nsp.to_string(),
        id,
        data,
    })
}

fn default_nsp() -> String {
    DEFAULT_NSP.to_string()
}

/// msgpack envelope used by the binary parser
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    data: Value,
    #[serde(default = "default_nsp")]
    nsp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<AckId>,
}

/// Encode a packet as a msgpack envelope
pub fn encode_msgpack(packet: &Packet) -> Result<Vec<u8>, WireError> {
    let envelope = Envelope {
        kind: packet.kind as u8,
        data: packet.data.clone().unwrap_or(Value::Null),
        nsp: packet.nsp.clone(),
        id: packet.id,
    };

    Ok(rmp_serde::to_vec_named(&envelope)?)
}

/// Decode a msgpack envelope
pub fn decode_msgpack(payload: &[u8]) -> Result<Packet, WireError> {
    if payload.is_empty() {
        return Err(WireError::Empty);
    }
    let envelope: Envelope = rmp_serde::from_slice(payload)?;

    Ok(Packet {
        kind: PacketType::try_from(envelope.kind)?,
        nsp: envelope.nsp,
        id: envelope.id,
        data: match envelope.data {
            Value::Null => None,
            other => Some(other),
        },
    })
}

/// Decode a socket.io payload using the encoding the transport negotiated
pub fn decode_packet(payload: &[u8], binary: bool) -> Result<Packet, WireError> {
    if binary {
        decode_msgpack(payload)
    } else {
        decode_text(payload)
    }
}
