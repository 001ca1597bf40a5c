//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Zero-length packet
    #[error("empty packet")]
    Empty,

    /// Unknown engine.io or socket.io packet type
    #[error("unknown packet type {0:#04x}")]
    UnknownPacketType(u8),

    /// Malformed packet structure
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// Invalid JSON payload
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack envelope could not be encoded
    #[error("msgpack encode: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack envelope could not be decoded
    #[error("msgpack decode: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}
