//! Acknowledgement correlation between outbound events and their replies.

use dashmap::DashMap;
use serde_json::Value;
use sio_wire::AckId;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::oneshot;
use tracing::debug;

/// Tracks outstanding acknowledgement requests
#[derive(Debug)]
pub struct AckCorrelator {
    next_id: AtomicI64,
    waiters: DashMap<AckId, oneshot::Sender<Vec<Value>>>,
}

impl AckCorrelator {
    /// Create an empty correlator; IDs start at 1
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            waiters: DashMap::new(),
        }
    }

    /// Allocate the next request ID. Wraps back into the non-negative range.
    pub fn next_id(&self) -> AckId {
        self.next_id.fetch_add(1, Ordering::SeqCst) & i64::MAX
    }

    /// Register a waiter for `id`, replacing any stale registration
    pub fn add_waiter(&self, id: AckId) -> oneshot::Receiver<Vec<Value>> {
        let (tx, rx) = oneshot::channel();
        if self.waiters.insert(id, tx).is_some() {
            debug!("Replaced stale ack waiter {}", id);
        }
        rx
    }

    /// Unregister `id`. Returns whether a waiter was present.
    pub fn remove_waiter(&self, id: AckId) -> bool {
        self.waiters.remove(&id).is_some()
    }

    /// Deliver a reply to the waiter for `id`, removing it
    pub fn resolve(&self, id: AckId, args: Vec<Value>) -> bool {
        match self.waiters.remove(&id) {
            Some((_, tx)) => tx.send(args).is_ok(),
            None => {
                debug!("Ack {} has no waiter", id);
                false
            }
        }
    }

    /// Number of outstanding waiters
    pub fn pending(&self) -> usize {
        self.waiters.len()
    }
}

/// Unregisters its waiter when dropped, so an abandoned wait never leaves
/// its ID behind
pub(crate) struct WaiterGuard<'a> {
    acks: &'a AckCorrelator,
    id: AckId,
}

impl<'a> WaiterGuard<'a> {
    pub(crate) fn new(acks: &'a AckCorrelator, id: AckId) -> Self {
        Self { acks, id }
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.acks.remove_waiter(self.id);
    }
}

impl Default for AckCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_are_monotonic_and_unique() {
        let acks = AckCorrelator::new();
        let first = acks.next_id();
        let second = acks.next_id();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[test]
    fn test_id_wraps_non_negative() {
        let acks = AckCorrelator::new();
        acks.next_id.store(i64::MAX, Ordering::SeqCst);

        assert_eq!(acks.next_id(), i64::MAX);
        assert!(acks.next_id() >= 0);
    }

    #[tokio::test]
    async fn test_resolve_delivers_once() {
        let acks = AckCorrelator::new();
        let id = acks.next_id();
        let rx = acks.add_waiter(id);

        assert_eq!(acks.pending(), 1);
        assert!(acks.resolve(id, vec![json!("pong")]));
        assert!(!acks.resolve(id, vec![json!("again")]));
        assert_eq!(acks.pending(), 0);
        assert_eq!(rx.await.unwrap(), vec![json!("pong")]);
    }

    #[test]
    fn test_guard_removes_waiter_on_drop() {
        let acks = AckCorrelator::new();
        let id = acks.next_id();
        let _rx = acks.add_waiter(id);

        {
            let _guard = WaiterGuard::new(&acks, id);
            assert_eq!(acks.pending(), 1);
        }
        assert_eq!(acks.pending(), 0);
        assert!(!acks.resolve(id, vec![json!(1)]));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let acks = AckCorrelator::new();
        let _rx = acks.add_waiter(7);

        assert!(acks.remove_waiter(7));
        assert!(!acks.remove_waiter(7));
        assert_eq!(acks.pending(), 0);
    }
}
