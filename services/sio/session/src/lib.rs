//! socket.io client sessions: state machine, I/O loops, acknowledgements and reconnection.
//!
//! A session wraps one [`Transport`] and keeps it usable for as long as the
//! application wants it: it performs the engine.io handshake, answers or
//! sends heartbeats depending on the protocol version, delivers outbound
//! packets in order, correlates acknowledgements and reconnects with
//! backoff when the peer drops.
//!
//! ## Features
//!
//! - **Three loops per session**: inbound, outbound and heartbeat watchdog
//! - **Protocol v3 and v4**: client-driven pings on v3, server-driven on v4
//! - **Text and msgpack framing**: chosen by the transport
//! - **Bounded outbound queue**: overflow closes the session instead of dropping packets
//! - **Acknowledgements**: `ack` waits for the correlated reply or times out
//! - **WebSocket transport**: behind the default `websocket` feature
//!
//! ## Example
//!
//! ```rust,no_run
//! use sio_session::{socket_io_url, SessionBuilder, WebSocketConnector, CONNECTION};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), sio_session::SessionError> {
//! let connector = WebSocketConnector::default();
//! let session = SessionBuilder::new()
//!     .on(CONNECTION, |session, _| {
//!         println!("connected as {}", session.id());
//!         None
//!     })
//!     .on("news", |_, args| {
//!         println!("news: {:?}", args);
//!         None
//!     })
//!     .dial(&socket_io_url("localhost", 3000, false), &connector)
//!     .await?;
//!
//! session.emit("message", None, vec![json!("hello"), json!("world")]).await?;
//! let reply = session.ack("ping", Duration::from_secs(1), None, Vec::new()).await?;
//! println!("ack: {:?}", reply);
//!
//! session.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ack;
pub mod backoff;
pub mod error;
pub mod handlers;
pub mod queue;
pub mod session;
pub mod state;
pub mod transport;
#[cfg(feature = "websocket")]
pub mod websocket;

mod inbound;
mod keepalive;
mod outbound;

#[cfg(test)]
mod mock;

// Re-export main types
pub use ack::AckCorrelator;
pub use backoff::{Backoff, DefaultBackoff, FixedBackoff, MAX_RECONNECT_ATTEMPTS};
pub use error::{CloseReason, SessionError, TransportError};
pub use handlers::{Handler, Handlers, CONNECTION, DISCONNECTION, ERROR, MESSAGE, RECONNECTION};
pub use queue::{OutboundQueue, DEFAULT_QUEUE_CAPACITY};
pub use session::{dial, MessageContext, Session, SessionBuilder, SessionConfig, SessionStats};
pub use state::SessionState;
pub use transport::{socket_io_url, Connector, Transport};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
