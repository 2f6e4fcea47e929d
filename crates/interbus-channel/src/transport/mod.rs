//! Transport seam between a channel connection and the bytes it moves.
//!
//! A connection only needs three things from its transport: send a frame,
//! close, and a stream of inbound frames. Frames are whole encoded
//! [`Envelope`](interbus_core::Envelope)s; ordering is preserved per direction.
//!
//! - [`memory::pair`] wires two in-process endpoints together
//! - [`ws::link`] and [`ws::connect`] adapt a WebSocket stream
//! - [`socket::spawn_link`] pumps any split WebSocket given a [`socket::MessageCodec`]

pub mod memory;
pub mod socket;
pub mod ws;

use std::sync::Arc;

use bytes::Bytes;
use interbus_core::{BusError, ConnectionId, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Outbound half of a connection.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Identifier used in logs.
    fn id(&self) -> &ConnectionId;

    /// Queue one frame for delivery to the peer.
    ///
    /// Fails with [`BusError::TransportClosed`] once the transport is closed.
    fn send(&self, frame: Bytes) -> Result<()>;

    /// Stop sending; the peer observes the end of its inbound stream.
    ///
    /// Idempotent.
    fn close(&self);

    /// Whether [`close`](Transport::close) was called or the peer went away.
    fn is_closed(&self) -> bool;
}

/// A transport together with the inbound frames it delivers.
pub struct TransportLink {
    /// Outbound half.
    pub transport: Arc<dyn Transport>,
    /// Inbound frames; ends when the peer closes.
    pub inbound: mpsc::UnboundedReceiver<Bytes>,
}

impl TransportLink {
    /// Bundle an outbound transport with its inbound stream.
    pub fn new(transport: Arc<dyn Transport>, inbound: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self { transport, inbound }
    }
}

/// Transport backed by an unbounded queue.
///
/// Whatever drains the queue (the peer's inbound stream or a socket writer
/// task) sees the end of the queue once this transport is closed or dropped.
pub struct QueueTransport {
    id: ConnectionId,
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl QueueTransport {
    /// Wrap the sending side of a frame queue.
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            id,
            tx: Mutex::new(Some(tx)),
        }
    }
}

impl Transport for QueueTransport {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, frame: Bytes) -> Result<()> {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(BusError::TransportClosed);
        };
        tx.send(frame).map_err(|_| BusError::TransportClosed)
    }

    fn close(&self) {
        drop(self.tx.lock().take());
    }

    fn is_closed(&self) -> bool {
        self.tx.lock().as_ref().is_none_or(mpsc::UnboundedSender::is_closed)
    }
}
