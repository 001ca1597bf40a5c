//! WebSocket transport built on tokio-tungstenite.

use crate::error::{TransportError, ABNORMAL_CLOSE_CODE};
use crate::transport::{Connector, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use sio_wire::{Frame, FrameKind, ProtocolVersion};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Close code used when the peer sent a close frame without a status
const NO_STATUS_CODE: u16 = 1005;

/// Upper bound on the close handshake with a peer that may have stopped reading
const GRACEFUL_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Dial parameters shared by a connector and the transports it creates
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    /// Requested engine.io protocol version
    pub protocol: ProtocolVersion,
    /// Exchange msgpack binary frames instead of text
    pub use_binary: bool,
    /// Heartbeat interval assumed before the handshake
    pub ping_interval: Duration,
    /// Heartbeat timeout assumed before the handshake
    pub ping_timeout: Duration,
    /// Upper bound on a single dial
    pub connect_timeout: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self {
            protocol: ProtocolVersion::V4,
            use_binary: false,
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    async fn connect(&self, url: &str) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = WebSocketTransport::connect(url, self.clone()).await?;
        Ok(Arc::new(transport))
    }
}

struct Connection {
    sink: WsSink,
    source: WsSource,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
}

/// A socket.io connection over a single WebSocket
pub struct WebSocketTransport {
    url: String,
    params: WebSocketConnector,
    sink: Mutex<Option<WsSink>>,
    source: Mutex<Option<WsSource>>,
    /// Cancelled when the current connection is replaced
    generation: RwLock<CancellationToken>,
    /// Cancelled by a local close
    closed: CancellationToken,
    addrs: RwLock<(Option<SocketAddr>, Option<SocketAddr>)>,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.url)
            .field("protocol", &self.params.protocol)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl WebSocketTransport {
    /// Dial `url` and wrap the resulting stream
    pub async fn connect(url: &str, params: WebSocketConnector) -> Result<Self, TransportError> {
        let conn = dial(url, params.connect_timeout).await?;
        info!("WebSocket connected to {}", url);

        Ok(Self {
            url: url.to_string(),
            params,
            sink: Mutex::new(Some(conn.sink)),
            source: Mutex::new(Some(conn.source)),
            generation: RwLock::new(CancellationToken::new()),
            closed: CancellationToken::new(),
            addrs: RwLock::new((conn.local_addr, conn.remote_addr)),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        })
    }

    fn current_generation(&self) -> CancellationToken {
        self.generation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn interrupted(&self, reason: &str) -> TransportError {
        if self.closed.is_cancelled() {
            TransportError::ConnectionClosed
        } else {
            abnormal(reason)
        }
    }
}

async fn dial(url: &str, connect_timeout: Duration) -> Result<Connection, TransportError> {
    let (stream, _response) = tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(url))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(map_ws_error)?;

    let (local_addr, remote_addr) = match stream.get_ref() {
        MaybeTlsStream::Plain(tcp) => (tcp.local_addr().ok(), tcp.peer_addr().ok()),
        _ => (None, None),
    };
    let (sink, source) = stream.split();

    Ok(Connection {
        sink,
        source,
        local_addr,
        remote_addr,
    })
}

fn abnormal(reason: impl Into<String>) -> TransportError {
    TransportError::Closed {
        code: ABNORMAL_CLOSE_CODE,
        reason: reason.into(),
    }
}

fn map_ws_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Io(e) => TransportError::Io(e),
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            abnormal(err.to_string())
        }
        other => TransportError::Other(other.to_string()),
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn read(&self) -> Result<Bytes, TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }
        let generation = self.current_generation();

        let mut source = tokio::select! {
            guard = self.source.lock() => guard,
            _ = self.closed.cancelled() => return Err(TransportError::ConnectionClosed),
            _ = generation.cancelled() => return Err(self.interrupted("reconnecting")),
        };

        loop {
            let stream = source.as_mut().ok_or_else(|| abnormal("no connection"))?;
            let next = tokio::select! {
                next = stream.next() => next,
                _ = self.closed.cancelled() => return Err(TransportError::ConnectionClosed),
                _ = generation.cancelled() => return Err(self.interrupted("reconnecting")),
            };

            match next {
                Some(Ok(Message::Text(text))) => {
                    self.bytes_read.fetch_add(text.len() as u64, Ordering::Relaxed);
                    return Ok(Bytes::copy_from_slice(text.as_bytes()));
                }
                Some(Ok(Message::Binary(data))) => {
                    self.bytes_read.fetch_add(data.len() as u64, Ordering::Relaxed);
                    return Ok(data);
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                        None => (NO_STATUS_CODE, String::new()),
                    };
                    debug!("WebSocket close frame {} {}", code, reason);
                    return Err(TransportError::Closed { code, reason });
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(self.interrupted(&e.to_string())),
                None => return Err(self.interrupted("stream ended")),
            }
        }
    }

    async fn write(&self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }
        let len = frame.data.len() as u64;
        let message = match frame.kind {
            FrameKind::Text => {
                let text = std::str::from_utf8(&frame.data)
                    .map_err(|e| TransportError::Other(e.to_string()))?;
                Message::Text(text.to_owned().into())
            }
            FrameKind::Binary => Message::Binary(frame.data),
        };

        let generation = self.current_generation();

        // a peer that stops reading blocks the send; close and reconnect must still get through
        let mut sink = tokio::select! {
            guard = self.sink.lock() => guard,
            _ = self.closed.cancelled() => return Err(TransportError::ConnectionClosed),
            _ = generation.cancelled() => return Err(self.interrupted("reconnecting")),
        };
        let stream = sink.as_mut().ok_or_else(|| abnormal("no connection"))?;
        tokio::select! {
            sent = stream.send(message) => sent.map_err(map_ws_error)?,
            _ = self.closed.cancelled() => return Err(TransportError::ConnectionClosed),
            _ = generation.cancelled() => return Err(self.interrupted("reconnecting")),
        }
        self.bytes_written.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }
        let conn = dial(&self.url, self.params.connect_timeout).await?;

        // release readers and writers parked on the old connection before taking its halves
        let previous = std::mem::replace(
            &mut *self.generation.write().unwrap_or_else(PoisonError::into_inner),
            CancellationToken::new(),
        );
        previous.cancel();

        let old = self.sink.lock().await.replace(conn.sink);
        *self.source.lock().await = Some(conn.source);
        if let Some(mut old) = old {
            let _ = tokio::time::timeout(GRACEFUL_CLOSE_TIMEOUT, old.close()).await;
        }
        *self.addrs.write().unwrap_or_else(PoisonError::into_inner) = (conn.local_addr, conn.remote_addr);

        info!("WebSocket reconnected to {}", self.url);
        Ok(())
    }

    async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            match tokio::time::timeout(GRACEFUL_CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("WebSocket close failed: {}", e),
                Err(_) => warn!("WebSocket close handshake timed out, dropping connection"),
            }
        }
        debug!("WebSocket to {} closed", self.url);
    }

    fn protocol(&self) -> ProtocolVersion {
        self.params.protocol
    }

    fn use_binary(&self) -> bool {
        self.params.use_binary
    }

    fn ping_params(&self) -> (Duration, Duration) {
        (self.params.ping_interval, self.params.ping_timeout)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.addrs.read().unwrap_or_else(PoisonError::into_inner).0
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.addrs.read().unwrap_or_else(PoisonError::into_inner).1
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_map_to_abnormal_close() {
        let err = map_ws_error(tungstenite::Error::ConnectionClosed);
        assert!(err.is_abnormal_close());

        let err = map_ws_error(tungstenite::Error::Io(std::io::Error::from(
            std::io::ErrorKind::ConnectionReset,
        )));
        assert!(matches!(err, TransportError::Io(_)));
    }

    /// Accepts one WebSocket client and then never reads from it
    async fn stalled_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            std::future::pending::<()>().await;
        });
        (crate::transport::socket_io_url("127.0.0.1", port, false), server)
    }

    #[tokio::test]
    async fn test_close_interrupts_write_to_stalled_peer() {
        let (url, server) = stalled_server().await;
        let transport = Arc::new(WebSocketTransport::connect(&url, WebSocketConnector::default()).await.unwrap());

        let writer = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                for _ in 0..64 {
                    transport.write(Frame::binary(vec![0u8; 1 << 20])).await?;
                }
                Ok::<(), TransportError>(())
            })
        };

        // let the socket buffers fill until the writer blocks
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!writer.is_finished());

        tokio::time::timeout(Duration::from_secs(5), transport.close())
            .await
            .expect("close hung behind a blocked write");

        let result = tokio::time::timeout(Duration::from_secs(1), writer).await.unwrap().unwrap();
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
        assert!(matches!(transport.write(Frame::text("2")).await, Err(TransportError::ConnectionClosed)));
        server.abort();
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = crate::transport::socket_io_url("127.0.0.1", port, false);
        let result = WebSocketTransport::connect(&url, WebSocketConnector::default()).await;
        assert!(result.is_err());
    }
}
