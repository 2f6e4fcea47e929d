//! Pending-request table for one connection.
//!
//! ```text
//! request:   register(topic) -> (id, rx) -> send Request{id} -> await rx
//! response:  Response{id} arrives -> resolve(id, outcome) -> rx fires
//! timeout:   caller gives up -> cancel(id)
//! teardown:  reject_all() -> every rx gets PeerDisconnected, table closes
//! ```
//!
//! Each id is resolved at most once: whichever of `resolve`, `cancel` or
//! `reject_all` removes the entry first wins, and later answers for that id
//! are ignored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use interbus_core::{BusError, CorrelationId, Result};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

/// Receiver side of a registered request.
pub type PendingReceiver = oneshot::Receiver<Result<Value>>;

struct PendingRequest {
    topic: String,
    started: Instant,
    slot: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct TableState {
    pending: HashMap<CorrelationId, PendingRequest>,
    closed: bool,
}

/// Outstanding requests awaiting a response, keyed by correlation id.
pub struct CorrelationTable {
    next_id: AtomicU64,
    state: Mutex<TableState>,
}

impl CorrelationTable {
    /// Create an empty, open table.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(TableState::default()),
        }
    }

    /// Allocate an id and a slot for its response.
    ///
    /// Fails with [`BusError::PeerDisconnected`] once the table is closed.
    pub fn register(&self, topic: &str) -> Result<(CorrelationId, PendingReceiver)> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(BusError::PeerDisconnected);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (slot, rx) = oneshot::channel();
        let _ = state.pending.insert(
            id,
            PendingRequest {
                topic: topic.to_owned(),
                started: Instant::now(),
                slot,
            },
        );
        Ok((id, rx))
    }

    /// Complete request `id` with `outcome`.
    ///
    /// Returns `false` for an unknown or already-settled id.
    pub fn resolve(&self, id: CorrelationId, outcome: Result<Value>) -> bool {
        let Some(entry) = self.state.lock().pending.remove(&id) else {
            return false;
        };
        debug!(
            correlation_id = id,
            topic = %entry.topic,
            elapsed_ms = entry.started.elapsed().as_millis() as u64,
            "request settled"
        );
        // The waiter may have stopped listening; nothing to do then.
        let _ = entry.slot.send(outcome);
        true
    }

    /// Forget request `id` without answering it.
    pub fn cancel(&self, id: CorrelationId) -> bool {
        self.state.lock().pending.remove(&id).is_some()
    }

    /// Close the table and fail every outstanding request with
    /// [`BusError::PeerDisconnected`]. Returns how many were failed.
    pub fn reject_all(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.pending.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();
        for entry in drained {
            let _ = entry.slot.send(Err(BusError::PeerDisconnected));
        }
        count
    }

    /// Age of the oldest outstanding request.
    pub fn oldest_pending(&self) -> Option<Duration> {
        self.state
            .lock()
            .pending
            .values()
            .map(|entry| entry.started.elapsed())
            .max()
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether no request is outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`reject_all`](Self::reject_all) has run.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[tokio::test]
    async fn resolve_delivers_outcome() {
        let table = CorrelationTable::new();
        let (id, rx) = table.register("t").unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.resolve(id, Ok(json!("done"))));
        assert_eq!(rx.await.unwrap().unwrap(), json!("done"));
        assert!(table.is_empty());
    }

    #[test]
    fn ids_are_unique() {
        let table = CorrelationTable::new();
        let (a, _ra) = table.register("t").unwrap();
        let (b, _rb) = table.register("t").unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn second_resolution_is_ignored() {
        let table = CorrelationTable::new();
        let (id, rx) = table.register("t").unwrap();
        assert!(table.resolve(id, Ok(json!(1))));
        assert!(!table.resolve(id, Ok(json!(2))));
        assert_eq!(rx.await.unwrap().unwrap(), json!(1));
    }

    #[test]
    fn unknown_id_is_ignored() {
        let table = CorrelationTable::new();
        assert!(!table.resolve(42, Ok(Value::Null)));
    }

    #[tokio::test]
    async fn cancel_then_late_response() {
        let table = CorrelationTable::new();
        let (id, rx) = table.register("t").unwrap();
        assert!(table.cancel(id));
        assert!(!table.resolve(id, Ok(json!("late"))));
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn reject_all_fails_everything_and_closes() {
        let table = CorrelationTable::new();
        let (_, first) = table.register("a").unwrap();
        let (_, second) = table.register("b").unwrap();
        assert_eq!(table.reject_all(), 2);
        assert_matches!(first.await.unwrap(), Err(BusError::PeerDisconnected));
        assert_matches!(second.await.unwrap(), Err(BusError::PeerDisconnected));
        assert!(table.is_closed());
        assert_matches!(table.register("c"), Err(BusError::PeerDisconnected));
        assert_eq!(table.reject_all(), 0);
    }

    #[test]
    fn oldest_pending_tracks_outstanding() {
        let table = CorrelationTable::new();
        assert!(table.oldest_pending().is_none());
        let (id, _rx) = table.register("t").unwrap();
        assert!(table.oldest_pending().is_some());
        assert!(table.cancel(id));
        assert!(table.oldest_pending().is_none());
    }
}
