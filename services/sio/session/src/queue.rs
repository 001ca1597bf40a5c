//! Bounded outbound queue shared by application senders and the outbound loop.

use crate::error::SessionError;
use sio_wire::OutboundPacket;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Capacity used when none is configured
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Ordered, bounded multi-producer queue with a single consumer
#[derive(Debug)]
pub struct OutboundQueue {
    tx: mpsc::Sender<OutboundPacket>,
    rx: Mutex<mpsc::Receiver<OutboundPacket>>,
    capacity: usize,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` packets
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    /// Enqueue a packet, waiting up to `timeout` for room.
    ///
    /// A queue that stays full for the whole wait is reported as
    /// [`SessionError::Overflow`]; a drained queue as [`SessionError::Closed`].
    pub async fn push(&self, packet: OutboundPacket, timeout: Duration) -> Result<(), SessionError> {
        match tokio::time::timeout(timeout, self.tx.send(packet)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SessionError::Closed),
            Err(_) => Err(SessionError::Overflow),
        }
    }

    /// Wait for the next packet. `None` once the queue has been drained.
    pub async fn pop(&self) -> Option<OutboundPacket> {
        self.rx.lock().await.recv().await
    }

    /// Take a packet if one is ready and no other consumer is active
    pub fn try_pop(&self) -> Option<OutboundPacket> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Stop accepting packets and discard everything queued.
    /// Returns the number of packets dropped.
    pub async fn drain(&self) -> usize {
        let mut rx = self.rx.lock().await;
        rx.close();
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Packets currently queued
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued packets
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
