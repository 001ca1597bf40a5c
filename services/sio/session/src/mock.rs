//! In-memory transport for session tests.

use crate::error::TransportError;
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use sio_wire::{Frame, ProtocolVersion};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Upper bound on any single wait in a test
const WAIT_LIMIT: Duration = Duration::from_secs(600);

pub(crate) struct MockTransport {
    protocol: ProtocolVersion,
    binary: bool,
    inbound_tx: mpsc::UnboundedSender<Result<Bytes, TransportError>>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Result<Bytes, TransportError>>>,
    written_tx: mpsc::UnboundedSender<Frame>,
    written_rx: Mutex<mpsc::UnboundedReceiver<Frame>>,
    written: AtomicUsize,
    fail_writes: AtomicBool,
    stall_writes: AtomicBool,
    fail_reconnects: AtomicBool,
    reconnects: AtomicUsize,
    closed: CancellationToken,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl MockTransport {
    pub(crate) fn new(protocol: ProtocolVersion, binary: bool) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (written_tx, written_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            protocol,
            binary,
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            written_tx,
            written_rx: Mutex::new(written_rx),
            written: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
            stall_writes: AtomicBool::new(false),
            fail_reconnects: AtomicBool::new(false),
            reconnects: AtomicUsize::new(0),
            closed: CancellationToken::new(),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        })
    }

    pub(crate) fn push_text(&self, text: &str) {
        let _ = self.inbound_tx.send(Ok(Bytes::copy_from_slice(text.as_bytes())));
    }

    pub(crate) fn push_binary(&self, data: Vec<u8>) {
        let _ = self.inbound_tx.send(Ok(Bytes::from(data)));
    }

    pub(crate) fn push_close(&self, code: u16) {
        let _ = self.inbound_tx.send(Err(TransportError::Closed {
            code,
            reason: "peer closed".to_string(),
        }));
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Writes block until the transport is closed, like a peer that stopped reading
    pub(crate) fn stall_writes(&self, stall: bool) {
        self.stall_writes.store(stall, Ordering::SeqCst);
    }

    pub(crate) fn fail_reconnects(&self, fail: bool) {
        self.fail_reconnects.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn reconnect_attempts(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub(crate) fn written_count(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub(crate) async fn next_frame(&self) -> Frame {
        let mut rx = self.written_rx.lock().await;
        tokio::time::timeout(WAIT_LIMIT, rx.recv())
            .await
            .expect("timed out waiting for a written frame")
            .expect("written channel closed")
    }

    pub(crate) async fn next_frame_except_ping(&self) -> Frame {
        loop {
            let frame = self.next_frame().await;
            if frame.as_text() != Some("2") {
                return frame;
            }
        }
    }

    pub(crate) async fn next_written(&self) -> String {
        let frame = self.next_frame().await;
        frame.as_text().expect("expected a text frame").to_string()
    }

    pub(crate) async fn next_written_except_ping(&self) -> String {
        let frame = self.next_frame_except_ping().await;
        frame.as_text().expect("expected a text frame").to_string()
    }

    /// Text frames written so far and not yet consumed
    pub(crate) fn drain_written(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Ok(mut rx) = self.written_rx.try_lock() {
            while let Ok(frame) = rx.try_recv() {
                if let Some(text) = frame.as_text() {
                    out.push(text.to_string());
                }
            }
        }
        out
    }

    pub(crate) async fn wait_until<F: Fn() -> bool>(&self, condition: F) {
        let waited = tokio::time::timeout(WAIT_LIMIT, async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "condition not reached in time");
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn read(&self) -> Result<Bytes, TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::ConnectionClosed),
            next = rx.recv() => {
                let message = next.unwrap_or(Err(TransportError::ConnectionClosed))?;
                self.bytes_read.fetch_add(message.len() as u64, Ordering::Relaxed);
                Ok(message)
            }
        }
    }

    async fn write(&self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Other("write refused".to_string()));
        }
        if self.stall_writes.load(Ordering::SeqCst) {
            self.closed.cancelled().await;
            return Err(TransportError::ConnectionClosed);
        }
        self.bytes_written.fetch_add(frame.data.len() as u64, Ordering::Relaxed);
        self.written.fetch_add(1, Ordering::SeqCst);
        let _ = self.written_tx.send(frame);
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_reconnects.load(Ordering::SeqCst) {
            return Err(TransportError::Closed {
                code: 1006,
                reason: "refused".to_string(),
            });
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.cancel();
    }

    fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    fn use_binary(&self) -> bool {
        self.binary
    }

    fn ping_params(&self) -> (Duration, Duration) {
        (Duration::from_secs(25), Duration::from_secs(20))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}
