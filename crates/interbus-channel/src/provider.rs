//! Provider side of a channel.
//!
//! A [`ChannelProvider`] owns one channel name. It accepts client
//! handshakes, keeps the member list in join order, dispatches requests to
//! a specific member, publishes to every member and reports membership
//! changes to observers.
//!
//! Handshake, as seen by the provider:
//!
//! 1. read `connect { channelName, identity, payload }`
//! 2. resolve the member identity (`nameAlias` in the payload replaces `name`)
//! 3. refuse with `connectReject` if that identity is already a member
//! 4. add the member, run connection observers, send `connectAck`
//!
//! Teardown (client `disconnect` or transport loss) removes the member,
//! fails its pending requests, runs disconnection observers and, for a
//! client-initiated disconnect, answers `disconnectAck` before closing.

use std::sync::{Arc, Weak};

use interbus_core::{BusError, Envelope, Identity, Result, name_alias};
use interbus_settings::ChannelSettings;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::{ConnectRequest, PeerConnection, PumpExit, read_connect, reject_connect, run_pump};
use crate::metrics::{
    CHANNEL_CONNECTIONS_TOTAL, CHANNEL_DISCONNECTIONS_TOTAL, CHANNEL_MEMBERS_ACTIVE, PUBLISH_TOTAL,
};
use crate::observer::{ConnectionObserver, DisconnectionObserver, ObserverList};
use crate::registry::ChannelRegistry;
use crate::router::{TopicHandler, TopicRouter};
use crate::state::{ConnectionState, StateCell};
use crate::transport::TransportLink;

struct Member {
    identity: Identity,
    conn: Arc<PeerConnection>,
}

#[derive(Default)]
struct MemberSet {
    members: Vec<Member>,
    destroyed: bool,
}

struct ProviderInner {
    name: String,
    identity: Identity,
    settings: ChannelSettings,
    router: Arc<TopicRouter>,
    members: Mutex<MemberSet>,
    on_connection: ObserverList<ConnectionObserver>,
    on_disconnection: ObserverList<DisconnectionObserver>,
    registry: Weak<ChannelRegistry>,
}

/// Handle to a channel this participant created.
///
/// Cheap to clone; clones share the same channel.
#[derive(Clone)]
pub struct ChannelProvider {
    inner: Arc<ProviderInner>,
}

impl ChannelProvider {
    pub(crate) fn new(
        name: &str,
        identity: Identity,
        settings: ChannelSettings,
        registry: Weak<ChannelRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                name: name.to_owned(),
                identity,
                settings,
                router: Arc::new(TopicRouter::new()),
                members: Mutex::new(MemberSet::default()),
                on_connection: ObserverList::new(),
                on_disconnection: ObserverList::new(),
                registry,
            }),
        }
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The provider's own identity, sent to members in `connectAck`.
    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    /// Handle requests from members on `topic`. A later registration wins.
    pub fn register(&self, topic: &str, handler: impl TopicHandler + 'static) -> bool {
        self.inner.router.register(topic, handler)
    }

    /// Stop handling `topic`.
    pub fn remove(&self, topic: &str) -> bool {
        self.inner.router.remove(topic)
    }

    /// Run `observer` for every member that joins, with its resolved
    /// identity and connect payload.
    pub fn on_connection(&self, observer: impl Fn(&Identity, Option<&Value>) + Send + Sync + 'static) {
        self.inner.on_connection.push(Arc::new(observer));
    }

    /// Run `observer` for every member that leaves, with its resolved identity.
    pub fn on_disconnection(&self, observer: impl Fn(&Identity) + Send + Sync + 'static) {
        self.inner.on_disconnection.push(Arc::new(observer));
    }

    /// Current members in join order.
    pub fn connections(&self) -> Vec<Identity> {
        self.inner
            .members
            .lock()
            .members
            .iter()
            .map(|m| m.identity.clone())
            .collect()
    }

    /// Whether [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.inner.members.lock().destroyed
    }

    pub(crate) fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Send a request to one member and wait for its response.
    ///
    /// Fails with [`BusError::MemberNotFound`] if `target` is not a current
    /// member; otherwise with whatever the member's handler answered, or
    /// [`BusError::PeerDisconnected`] / [`BusError::Timeout`].
    pub async fn dispatch(&self, target: &Identity, topic: &str, payload: Value) -> Result<Value> {
        let conn = self.member(target)?;
        debug!(channel = %self.inner.name, member = %target, topic, "dispatch");
        conn.request(topic, payload).await
    }

    /// Send a publish to every current member.
    ///
    /// Delivery is fire-and-forget; members that are mid-teardown are skipped.
    pub fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        let targets: Vec<Arc<PeerConnection>> = {
            let set = self.inner.members.lock();
            if set.destroyed {
                return Err(self.not_found());
            }
            set.members.iter().map(|m| Arc::clone(&m.conn)).collect()
        };
        counter!(PUBLISH_TOTAL).increment(1);
        for conn in &targets {
            if let Err(e) = conn.publish(topic, payload.clone()) {
                debug!(channel = %self.inner.name, member = %conn.remote(), topic, error = %e, "publish not delivered");
            }
        }
        debug!(channel = %self.inner.name, topic, recipients = targets.len(), "published");
        Ok(())
    }

    /// Tear the channel down.
    ///
    /// Unregisters the name, disconnects every member (their pending
    /// requests fail with [`BusError::PeerDisconnected`]) and refuses further
    /// operations. Disconnection observers are not run. Idempotent.
    pub fn destroy(&self) {
        let members = {
            let mut set = self.inner.members.lock();
            if set.destroyed {
                return;
            }
            set.destroyed = true;
            std::mem::take(&mut set.members)
        };
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remove_provider(self);
        }
        for member in &members {
            let _ = member.conn.begin_close();
            let _ = member.conn.reject_pending();
            member.conn.close();
            gauge!(CHANNEL_MEMBERS_ACTIVE).decrement(1.0);
        }
        info!(channel = %self.inner.name, members = members.len(), "channel destroyed");
    }

    /// Read the handshake opener from `link` and serve the connection
    /// until it ends.
    pub async fn accept(&self, mut link: TransportLink) {
        match read_connect(&mut link, self.inner.settings.connect_timeout()).await {
            Ok(request) => self.attach(link, request).await,
            Err(e) => {
                debug!(channel = %self.inner.name, error = %e, "handshake not started");
                reject_connect(link.transport.as_ref(), &e);
            }
        }
    }

    /// Complete a handshake whose opener was already read and serve the
    /// connection until it ends.
    pub async fn attach(&self, link: TransportLink, request: ConnectRequest) {
        let TransportLink { transport, inbound } = link;
        let member = request
            .identity
            .with_alias(name_alias(request.payload.as_ref()));
        let conn = Arc::new(PeerConnection::new(
            self.inner.name.clone(),
            self.inner.identity.clone(),
            member.clone(),
            transport,
            StateCell::new(ConnectionState::Connecting),
            self.inner.settings.dispatch_timeout(),
        ));

        if let Err(err) = self.admit(&request.channel_name, &conn) {
            warn!(channel = %self.inner.name, member = %member, error = %err, "connect rejected");
            let _ = conn.advance(ConnectionState::Disconnected);
            let _ = conn.send(&Envelope::ConnectReject {
                error: err.to_error_body(),
            });
            conn.close();
            return;
        }

        info!(channel = %self.inner.name, member = %member, conn_id = %conn.id(), "member connected");
        counter!(CHANNEL_CONNECTIONS_TOTAL).increment(1);
        gauge!(CHANNEL_MEMBERS_ACTIVE).increment(1.0);

        for observer in self.inner.on_connection.snapshot() {
            observer(&member, request.payload.as_ref());
        }
        let ack = Envelope::ConnectAck {
            member,
            provider: self.inner.identity.clone(),
        };
        if let Err(e) = conn.send(&ack) {
            debug!(channel = %self.inner.name, error = %e, "connect ack not delivered");
        }

        self.serve(conn, inbound).await;
    }

    /// Add `conn` to the member list and mark it connected.
    fn admit(&self, channel_name: &str, conn: &Arc<PeerConnection>) -> Result<()> {
        if channel_name != self.inner.name {
            return Err(BusError::ChannelNotFound {
                channel: channel_name.to_owned(),
            });
        }
        let mut set = self.inner.members.lock();
        if set.destroyed {
            return Err(self.not_found());
        }
        let identity = conn.remote().clone();
        if set.members.iter().any(|m| m.identity == identity) {
            return Err(BusError::AlreadyConnected {
                channel: self.inner.name.clone(),
                identity,
            });
        }
        let _ = conn.advance(ConnectionState::Connected);
        set.members.push(Member {
            identity,
            conn: Arc::clone(conn),
        });
        Ok(())
    }

    async fn serve(&self, conn: Arc<PeerConnection>, inbound: mpsc::UnboundedReceiver<bytes::Bytes>) {
        let exit = run_pump(Arc::clone(&conn), inbound, Arc::clone(&self.inner.router), Vec::new()).await;
        self.teardown(&conn, exit);
    }

    fn teardown(&self, conn: &Arc<PeerConnection>, exit: PumpExit) {
        let _ = conn.begin_close();
        let removed = {
            let mut set = self.inner.members.lock();
            let position = set.members.iter().position(|m| Arc::ptr_eq(&m.conn, conn));
            position.map(|i| set.members.remove(i))
        };
        let _ = conn.reject_pending();

        if let Some(member) = removed {
            info!(channel = %self.inner.name, member = %member.identity, reason = ?exit, "member disconnected");
            counter!(CHANNEL_DISCONNECTIONS_TOTAL).increment(1);
            gauge!(CHANNEL_MEMBERS_ACTIVE).decrement(1.0);
            for observer in self.inner.on_disconnection.snapshot() {
                observer(&member.identity);
            }
        }

        if exit == PumpExit::PeerDisconnect {
            if let Err(e) = conn.send(&Envelope::DisconnectAck) {
                debug!(channel = %self.inner.name, error = %e, "disconnect ack not delivered");
            }
        }
        conn.close();
    }

    fn member(&self, target: &Identity) -> Result<Arc<PeerConnection>> {
        let set = self.inner.members.lock();
        if set.destroyed {
            return Err(self.not_found());
        }
        set.members
            .iter()
            .find(|m| m.identity == *target)
            .map(|m| Arc::clone(&m.conn))
            .ok_or_else(|| BusError::MemberNotFound {
                identity: target.clone(),
            })
    }

    fn not_found(&self) -> BusError {
        BusError::ChannelNotFound {
            channel: self.inner.name.clone(),
        }
    }
}

impl std::fmt::Debug for ChannelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelProvider")
            .field("name", &self.inner.name)
            .field("identity", &self.inner.identity)
            .finish_non_exhaustive()
    }
}
