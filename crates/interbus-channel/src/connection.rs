//! One established channel connection and its message pump.
//!
//! Both providers and clients run the same machinery once a handshake has
//! completed:
//!
//! - [`PeerConnection`] sends requests and publishes and owns the
//!   [`CorrelationTable`] for requests it is waiting on
//! - [`run_pump`] reads inbound frames: responses settle pending requests
//!   immediately, requests and publishes go to a per-connection worker that
//!   runs handlers one at a time in arrival order
//!
//! Keeping response handling out of the worker lets a handler dispatch back
//! to its peer without deadlocking the connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use interbus_core::envelope::response_outcome;
use interbus_core::{BusError, ConnectionId, Envelope, Identity, Result};
use metrics::{counter, histogram};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::correlation::CorrelationTable;
use crate::metrics::{DISPATCH_DURATION_SECONDS, DISPATCH_ERRORS_TOTAL, DISPATCH_TOTAL};
use crate::router::TopicRouter;
use crate::state::{ConnectionState, StateCell};
use crate::transport::{Transport, TransportLink};

/// The opening frame of a connection, as seen by the accepting side.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectRequest {
    /// Channel the client wants.
    pub channel_name: String,
    /// The client's base identity.
    pub identity: Identity,
    /// Connect payload, forwarded to connection observers.
    pub payload: Option<Value>,
    /// Whether to wait for the channel to be created.
    pub wait: bool,
}

/// Read the handshake opener from a freshly accepted link.
///
/// Fails with [`BusError::Timeout`] if nothing arrives within `within`,
/// [`BusError::TransportClosed`] if the link ends first, and
/// [`BusError::Protocol`] if the first frame is not a `connect`.
pub async fn read_connect(link: &mut TransportLink, within: Duration) -> Result<ConnectRequest> {
    let frame = match tokio::time::timeout(within, link.inbound.recv()).await {
        Ok(Some(frame)) => frame,
        Ok(None) => return Err(BusError::TransportClosed),
        Err(_) => {
            return Err(BusError::Timeout {
                operation: "connect handshake".into(),
                timeout_ms: within.as_millis() as u64,
            });
        }
    };
    match Envelope::decode(&frame)? {
        Envelope::Connect {
            channel_name,
            identity,
            payload,
            wait,
        } => Ok(ConnectRequest {
            channel_name,
            identity,
            payload,
            wait,
        }),
        other => Err(BusError::protocol(format!(
            "expected connect, got {}",
            other.kind()
        ))),
    }
}

/// Refuse a handshake: send `connectReject` carrying `error`, then close.
pub fn reject_connect(transport: &dyn Transport, error: &BusError) {
    let reject = Envelope::ConnectReject {
        error: error.to_error_body(),
    };
    match reject.encode() {
        Ok(frame) => {
            if let Err(e) = transport.send(frame) {
                debug!(conn_id = %transport.id(), error = %e, "connect reject not delivered");
            }
        }
        Err(e) => warn!(error = %e, "failed to encode connect reject"),
    }
    transport.close();
}

/// Why a pump stopped reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PumpExit {
    /// The client sent `disconnect`.
    PeerDisconnect,
    /// The provider acknowledged our `disconnect`.
    DisconnectAck,
    /// The inbound stream ended.
    TransportClosed,
}

/// The sending half of an established connection.
pub(crate) struct PeerConnection {
    channel: String,
    local: Identity,
    remote: Identity,
    transport: Arc<dyn Transport>,
    pending: CorrelationTable,
    state: StateCell,
    dispatch_timeout: Duration,
}

impl PeerConnection {
    pub(crate) fn new(
        channel: impl Into<String>,
        local: Identity,
        remote: Identity,
        transport: Arc<dyn Transport>,
        state: StateCell,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            channel: channel.into(),
            local,
            remote,
            transport,
            pending: CorrelationTable::new(),
            state,
            dispatch_timeout,
        }
    }

    pub(crate) fn id(&self) -> &ConnectionId {
        self.transport.id()
    }

    pub(crate) fn channel(&self) -> &str {
        &self.channel
    }

    /// Our identity on this connection.
    pub(crate) fn local(&self) -> &Identity {
        &self.local
    }

    /// The peer's identity on this connection.
    pub(crate) fn remote(&self) -> &Identity {
        &self.remote
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub(crate) fn advance(&self, next: ConnectionState) -> bool {
        self.state.advance(next)
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Encode and hand one envelope to the transport.
    pub(crate) fn send(&self, envelope: &Envelope) -> Result<()> {
        self.transport.send(envelope.encode()?)
    }

    /// Send a request and wait for its correlated response.
    pub(crate) async fn request(&self, topic: &str, payload: Value) -> Result<Value> {
        counter!(DISPATCH_TOTAL, "topic" => topic.to_owned()).increment(1);
        let start = Instant::now();

        let outcome = self.round_trip(topic, payload).await;

        histogram!(DISPATCH_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
        if let Err(e) = &outcome {
            counter!(DISPATCH_ERRORS_TOTAL, "topic" => topic.to_owned(), "error_type" => e.code().to_owned())
                .increment(1);
        }
        outcome
    }

    async fn round_trip(&self, topic: &str, payload: Value) -> Result<Value> {
        if self.state() != ConnectionState::Connected {
            return Err(BusError::PeerDisconnected);
        }
        let (id, rx) = self.pending.register(topic)?;
        let request = Envelope::Request {
            correlation_id: id,
            topic: topic.to_owned(),
            payload,
            sender: self.local.clone(),
        };
        if let Err(e) = self.send(&request) {
            let _ = self.pending.cancel(id);
            return Err(e);
        }

        match tokio::time::timeout(self.dispatch_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BusError::PeerDisconnected),
            Err(_) => {
                let _ = self.pending.cancel(id);
                let timeout_ms = self.dispatch_timeout.as_millis() as u64;
                warn!(channel = %self.channel, topic, correlation_id = id, timeout_ms, "dispatch timed out");
                Err(BusError::Timeout {
                    operation: format!("dispatch '{topic}'"),
                    timeout_ms,
                })
            }
        }
    }

    /// Send an uncorrelated publish.
    pub(crate) fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(BusError::PeerDisconnected);
        }
        self.send(&Envelope::Publish {
            topic: topic.to_owned(),
            payload,
            sender: self.local.clone(),
        })
    }

    /// Enter `Disconnecting`. Only the first caller gets `true`.
    pub(crate) fn begin_close(&self) -> bool {
        self.state.advance(ConnectionState::Disconnecting)
    }

    /// Fail every outstanding request with [`BusError::PeerDisconnected`].
    pub(crate) fn reject_pending(&self) -> usize {
        let rejected = self.pending.reject_all();
        if rejected > 0 {
            debug!(channel = %self.channel, conn_id = %self.id(), rejected, "failed pending requests");
        }
        rejected
    }

    /// Close the transport and settle in `Disconnected`.
    pub(crate) fn close(&self) {
        self.transport.close();
        let _ = self.state.advance(ConnectionState::Disconnecting);
        let _ = self.state.advance(ConnectionState::Disconnected);
    }
}

/// Read inbound frames until the connection ends.
///
/// `backlog` holds requests and publishes that arrived before the pump
/// started; they are handled first.
#[instrument(skip_all, fields(channel = %conn.channel(), conn_id = %conn.id(), peer = %conn.remote()))]
pub(crate) async fn run_pump(
    conn: Arc<PeerConnection>,
    mut inbound: mpsc::UnboundedReceiver<Bytes>,
    router: Arc<TopicRouter>,
    backlog: Vec<Envelope>,
) -> PumpExit {
    let (work_tx, work_rx) = mpsc::unbounded_channel::<Envelope>();
    let _ = tokio::spawn(run_handlers(Arc::clone(&conn), router, work_rx));
    for envelope in backlog {
        let _ = work_tx.send(envelope);
    }

    let exit = loop {
        let Some(frame) = inbound.recv().await else {
            break PumpExit::TransportClosed;
        };
        let envelope = match Envelope::decode(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, len = frame.len(), "dropping undecodable frame");
                continue;
            }
        };
        match envelope {
            Envelope::Response {
                correlation_id,
                result,
                error,
            } => {
                if !conn.pending.resolve(correlation_id, response_outcome(result, error)) {
                    debug!(correlation_id, "response for unknown or settled request");
                }
            }
            work @ (Envelope::Request { .. } | Envelope::Publish { .. }) => {
                let _ = work_tx.send(work);
            }
            Envelope::Disconnect { .. } => break PumpExit::PeerDisconnect,
            Envelope::DisconnectAck => break PumpExit::DisconnectAck,
            other => warn!(kind = other.kind(), "unexpected frame on established connection"),
        }
    };
    debug!(?exit, "pump stopped");
    exit
}

/// Run handlers for queued requests and publishes, one at a time.
///
/// The sender passed to handlers is the peer identity resolved at
/// handshake, not the identity claimed inside the frame.
async fn run_handlers(
    conn: Arc<PeerConnection>,
    router: Arc<TopicRouter>,
    mut work: mpsc::UnboundedReceiver<Envelope>,
) {
    while let Some(envelope) = work.recv().await {
        match envelope {
            Envelope::Request {
                correlation_id,
                topic,
                payload,
                ..
            } => {
                let outcome = router.dispatch(&topic, payload, conn.remote().clone()).await;
                if let Err(e) = &outcome {
                    debug!(topic, correlation_id, error = %e, "request handler failed");
                }
                if let Err(e) = conn.send(&Envelope::response(correlation_id, &outcome)) {
                    debug!(topic, correlation_id, error = %e, "response not delivered");
                }
            }
            Envelope::Publish { topic, payload, .. } => {
                let _ = router.deliver(&topic, payload, conn.remote().clone()).await;
            }
            _ => {}
        }
    }
}
