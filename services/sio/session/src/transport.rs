//! Transport seam between the session engine and the byte-stream connection.
//!
//! The session never touches sockets directly; it reads whole messages,
//! writes encoded [`Frame`]s and asks the transport to re-establish itself
//! when the peer drops. [`Connector`] produces transports at dial time.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use sio_wire::{Frame, ProtocolVersion};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// A connected message transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Read the next whole message
    async fn read(&self) -> Result<Bytes, TransportError>;

    /// Write one frame
    async fn write(&self, frame: Frame) -> Result<(), TransportError>;

    /// Re-establish the underlying connection
    async fn reconnect(&self) -> Result<(), TransportError>;

    /// Close the connection; pending and later reads fail with
    /// [`TransportError::ConnectionClosed`]
    async fn close(&self);

    /// Negotiated engine.io protocol version
    fn protocol(&self) -> ProtocolVersion;

    /// Whether packets travel as msgpack binary frames
    fn use_binary(&self) -> bool;

    /// Transport-level heartbeat interval and timeout
    fn ping_params(&self) -> (Duration, Duration);

    /// Local socket address, when known
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Remote socket address, when known
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Total bytes read
    fn bytes_read(&self) -> u64;

    /// Total bytes written
    fn bytes_written(&self) -> u64;
}

/// Creates transports for a URL
#[async_trait]
pub trait Connector: Send + Sync {
    /// Protocol version the connector will request
    fn protocol(&self) -> ProtocolVersion;

    /// Dial `url`
    async fn connect(&self, url: &str) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Build a socket.io websocket endpoint URL
pub fn socket_io_url(host: &str, port: u16, secure: bool) -> String {
    let scheme = if secure { "wss" } else { "ws" };
    format!("{}://{}:{}/socket.io/?transport=websocket", scheme, host, port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_io_url() {
        assert_eq!(
            socket_io_url("localhost", 3000, false),
            "ws://localhost:3000/socket.io/?transport=websocket"
        );
        assert!(socket_io_url("example.com", 443, true).starts_with("wss://example.com:443/"));
    }
}
