//! engine.io / socket.io packet framing for sio.
//!
//! This crate owns the wire contract between the session engine and the
//! transport: classifying inbound messages by their engine.io prefix,
//! parsing the handshake header, and encoding socket.io packets in either
//! the text sub-protocol or the msgpack envelope used by binary parsers.
//!
//! ## Wire Format
//!
//! ```text
//! text:   <engine type>[<socket type>[<nsp>,][<ack id>][<json array>]]
//!         0{"sid":"abc","pingInterval":25000,"pingTimeout":20000}
//!         42["message","hello","world"]
//!         431[{"ok":true}]
//!
//! binary: msgpack {type, data, nsp, id}   (v3 prefixes a '4')
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod packet;
pub mod protocol;

// Re-export main types
pub use codec::{decode_msgpack, decode_packet, decode_text, encode_msgpack, encode_text};
pub use error::WireError;
pub use frame::{classify, encode_outbound, Frame, FrameKind, Inbound, OutboundPacket};
pub use handshake::{Handshake, DEFAULT_PING_INTERVAL_MS, DEFAULT_PING_TIMEOUT_MS};
pub use packet::{AckId, Packet};
pub use protocol::{EnginePacketType, PacketType, ProtocolVersion, DEFAULT_NSP};
