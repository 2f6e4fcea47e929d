//! Lifecycle observer lists.

use std::sync::Arc;

use interbus_core::Identity;
use parking_lot::RwLock;
use serde_json::Value;

/// Called when a member joins, with its resolved identity and connect payload.
pub type ConnectionObserver = dyn Fn(&Identity, Option<&Value>) + Send + Sync;

/// Called when the other side of a connection goes away.
pub type DisconnectionObserver = dyn Fn(&Identity) + Send + Sync;

/// Append-only list of callbacks.
///
/// Callbacks run on a snapshot so they may register further observers.
pub(crate) struct ObserverList<F: ?Sized> {
    observers: RwLock<Vec<Arc<F>>>,
}

impl<F: ?Sized> ObserverList<F> {
    pub(crate) fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self, observer: Arc<F>) {
        self.observers.write().push(observer);
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<F>> {
        self.observers.read().clone()
    }
}
