//! Client side of a channel.
//!
//! A [`ChannelClient`] is one member's connection to a provider. It
//! dispatches requests to the provider, handles requests and publishes
//! the provider sends, and disconnects cleanly:
//!
//! ```text
//! disconnect():  Connected -> Disconnecting, pending requests fail
//!                send disconnect, wait for disconnectAck (bounded)
//!                transport closes -> Disconnected
//! ```
//!
//! Disconnection observers only run when the provider side goes away, not
//! for a disconnect this client asked for.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use interbus_core::{BusError, ConnectionId, Envelope, Identity, NAME_ALIAS_KEY, Result};
use interbus_settings::ChannelSettings;
use metrics::counter;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{PeerConnection, PumpExit, run_pump};
use crate::metrics::CHANNEL_DISCONNECTIONS_TOTAL;
use crate::observer::{DisconnectionObserver, ObserverList};
use crate::registry::ChannelRegistry;
use crate::router::{TopicHandler, TopicRouter};
use crate::state::{ConnectionState, StateCell};
use crate::transport::TransportLink;

/// Options for [`ChannelBus::connect`](crate::ChannelBus::connect).
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectOptions {
    /// Forwarded to the provider's connection observers. A `nameAlias`
    /// string in it becomes this member's `name`.
    pub payload: Option<Value>,
    /// Wait for the channel to be created instead of failing with
    /// [`BusError::ChannelNotFound`] right away.
    pub wait: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            payload: None,
            wait: true,
        }
    }
}

impl ConnectOptions {
    /// Options carrying `payload`.
    pub fn with_payload(payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::default()
        }
    }

    /// Options asking the provider to address this member as `alias`.
    pub fn with_name_alias(alias: &str) -> Self {
        let mut payload = Map::new();
        let _ = payload.insert(NAME_ALIAS_KEY.to_owned(), Value::String(alias.to_owned()));
        Self::with_payload(Value::Object(payload))
    }

    /// Fail immediately if the channel does not exist yet.
    #[must_use]
    pub fn no_wait(mut self) -> Self {
        self.wait = false;
        self
    }
}

struct ClientInner {
    channel: String,
    conn: Arc<PeerConnection>,
    router: Arc<TopicRouter>,
    on_disconnection: ObserverList<DisconnectionObserver>,
    closed: CancellationToken,
    requested_disconnect: AtomicBool,
    disconnect_timeout: Duration,
    registry: Weak<ChannelRegistry>,
}

/// Handle to one connection to a channel provider.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ChannelClient {
    inner: Arc<ClientInner>,
}

impl ChannelClient {
    /// Run the handshake over `link` and start serving the connection.
    ///
    /// Requests and publishes that reach the client before `connectAck`
    /// are queued and handled once the connection is up.
    pub(crate) async fn handshake(
        link: TransportLink,
        channel: &str,
        identity: Identity,
        options: ConnectOptions,
        settings: ChannelSettings,
        registry: Weak<ChannelRegistry>,
    ) -> Result<Self> {
        let TransportLink {
            transport,
            mut inbound,
        } = link;
        let state = StateCell::new(ConnectionState::Disconnected);
        let _ = state.advance(ConnectionState::Connecting);

        let opener = Envelope::Connect {
            channel_name: channel.to_owned(),
            identity,
            payload: options.payload,
            wait: options.wait,
        };
        if let Err(e) = transport.send(opener.encode()?) {
            let _ = state.advance(ConnectionState::Disconnected);
            return Err(e);
        }

        // A waiting connect may spend one connect window on the channel
        // appearing and another on the handshake itself.
        let budget = if options.wait {
            settings.connect_timeout() * 2
        } else {
            settings.connect_timeout()
        };

        let mut backlog = Vec::new();
        let answer = tokio::time::timeout(budget, await_answer(&mut inbound, &mut backlog)).await;

        let (member, provider) = match answer {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                debug!(channel, error = %e, "handshake refused");
                let _ = state.advance(ConnectionState::Disconnected);
                transport.close();
                return Err(e);
            }
            Err(_) => {
                warn!(channel, "handshake timed out");
                let _ = state.advance(ConnectionState::Disconnected);
                transport.close();
                return Err(BusError::Timeout {
                    operation: format!("connect to '{channel}'"),
                    timeout_ms: budget.as_millis() as u64,
                });
            }
        };
        let _ = state.advance(ConnectionState::Connected);

        let conn = Arc::new(PeerConnection::new(
            channel,
            member.clone(),
            provider.clone(),
            transport,
            state,
            settings.dispatch_timeout(),
        ));
        let router = Arc::new(TopicRouter::new());
        let inner = Arc::new(ClientInner {
            channel: channel.to_owned(),
            conn: Arc::clone(&conn),
            router: Arc::clone(&router),
            on_disconnection: ObserverList::new(),
            closed: CancellationToken::new(),
            requested_disconnect: AtomicBool::new(false),
            disconnect_timeout: settings.disconnect_timeout(),
            registry,
        });
        if let Some(registry) = inner.registry.upgrade() {
            registry.track_client(conn.id().clone(), channel, member.clone());
        }
        info!(channel, member = %member, provider = %provider, early = backlog.len(), "connected to channel");

        let serving = Arc::clone(&inner);
        let _ = tokio::spawn(async move {
            let exit = run_pump(conn, inbound, router, backlog).await;
            serving.teardown(exit);
        });

        Ok(Self { inner })
    }

    /// Channel name.
    pub fn channel_name(&self) -> &str {
        &self.inner.channel
    }

    /// The identity the provider assigned to this member.
    pub fn identity(&self) -> &Identity {
        self.inner.conn.local()
    }

    /// The provider's identity.
    pub fn provider_identity(&self) -> &Identity {
        self.inner.conn.remote()
    }

    /// Transport connection id.
    pub fn connection_id(&self) -> &ConnectionId {
        self.inner.conn.id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.conn.state()
    }

    /// Dispatches still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.conn.pending_len()
    }

    /// Handle requests from the provider on `topic`. A later registration wins.
    pub fn register(&self, topic: &str, handler: impl TopicHandler + 'static) -> bool {
        self.inner.router.register(topic, handler)
    }

    /// Stop handling `topic`.
    pub fn remove(&self, topic: &str) -> bool {
        self.inner.router.remove(topic)
    }

    /// Run `observer` with the provider's identity if the provider side
    /// goes away.
    pub fn on_disconnection(&self, observer: impl Fn(&Identity) + Send + Sync + 'static) {
        self.inner.on_disconnection.push(Arc::new(observer));
    }

    /// Send a request to the provider and wait for its response.
    pub async fn dispatch(&self, topic: &str, payload: Value) -> Result<Value> {
        debug!(channel = %self.inner.channel, topic, "dispatch");
        self.inner.conn.request(topic, payload).await
    }

    /// Leave the channel.
    ///
    /// Resolves once the provider has processed the disconnect (its
    /// disconnection observers have run) or the disconnect window elapsed,
    /// in which case the connection is closed anyway and
    /// [`BusError::Timeout`] is returned. Calling it again is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        let conn = &self.inner.conn;
        if !conn.begin_close() {
            self.inner.closed.cancelled().await;
            return Ok(());
        }
        self.inner.requested_disconnect.store(true, Ordering::SeqCst);
        // Responses still in flight are dropped from here on.
        let _ = conn.reject_pending();
        debug!(channel = %self.inner.channel, member = %conn.local(), "disconnecting");

        let farewell = Envelope::Disconnect {
            sender: conn.local().clone(),
        };
        let outcome = match conn.send(&farewell) {
            Ok(()) => {
                match tokio::time::timeout(self.inner.disconnect_timeout, self.inner.closed.cancelled()).await {
                    Ok(()) => Ok(()),
                    Err(_) => {
                        warn!(channel = %self.inner.channel, "provider did not acknowledge disconnect");
                        Err(BusError::Timeout {
                            operation: format!("disconnect from '{}'", self.inner.channel),
                            timeout_ms: self.inner.disconnect_timeout.as_millis() as u64,
                        })
                    }
                }
            }
            // Transport already gone; the pump is tearing down on its own.
            Err(_) => Ok(()),
        };

        conn.close();
        self.inner.closed.cancel();
        outcome
    }

    fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Read frames until the provider accepts or refuses the handshake.
///
/// Requests and publishes that arrive first are kept in `backlog`.
async fn await_answer(
    inbound: &mut mpsc::UnboundedReceiver<Bytes>,
    backlog: &mut Vec<Envelope>,
) -> Result<(Identity, Identity)> {
    while let Some(frame) = inbound.recv().await {
        match Envelope::decode(&frame)? {
            Envelope::ConnectAck { member, provider } => return Ok((member, provider)),
            Envelope::ConnectReject { error } => return Err(BusError::from_error_body(error)),
            early @ (Envelope::Request { .. } | Envelope::Publish { .. }) => backlog.push(early),
            other => {
                return Err(BusError::protocol(format!(
                    "unexpected {} during handshake",
                    other.kind()
                )));
            }
        }
    }
    Err(BusError::PeerDisconnected)
}

impl ClientInner {
    fn teardown(&self, exit: PumpExit) {
        let provider_left = !self.requested_disconnect.load(Ordering::SeqCst);
        let _ = self.conn.begin_close();
        let _ = self.conn.reject_pending();
        self.conn.close();
        if let Some(registry) = self.registry.upgrade() {
            registry.untrack_client(self.conn.id());
        }
        counter!(CHANNEL_DISCONNECTIONS_TOTAL).increment(1);

        if provider_left {
            info!(channel = %self.channel, provider = %self.conn.remote(), reason = ?exit, "provider disconnected");
            for observer in self.on_disconnection.snapshot() {
                observer(self.conn.remote());
            }
        } else {
            debug!(channel = %self.channel, reason = ?exit, "disconnect complete");
        }
        self.closed.cancel();
    }
}

impl PartialEq for ChannelClient {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl std::fmt::Debug for ChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelClient")
            .field("channel", &self.inner.channel)
            .field("identity", self.identity())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
