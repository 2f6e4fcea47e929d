//! In-process transport pair.

use std::sync::Arc;

use interbus_core::ConnectionId;
use tokio::sync::mpsc;

use super::{QueueTransport, TransportLink};

/// Two cross-wired endpoints: frames sent on one arrive on the other.
///
/// Both ends share one [`ConnectionId`] so log lines from either side of
/// the connection line up.
pub fn pair() -> (TransportLink, TransportLink) {
    let id = ConnectionId::new();
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();

    let left = TransportLink::new(Arc::new(QueueTransport::new(id.clone(), right_tx)), left_rx);
    let right = TransportLink::new(Arc::new(QueueTransport::new(id, left_tx)), right_rx);
    (left, right)
}
