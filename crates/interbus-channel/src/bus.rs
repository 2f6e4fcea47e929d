//! A participant's entry point to channels.
//!
//! [`ChannelBus`] binds one [`Identity`] to a [`ChannelRegistry`]: it creates
//! providers under that identity and connects clients as that identity,
//! either in-process through the registry or to a remote broker over a
//! WebSocket.

use std::sync::Arc;

use interbus_core::{BusError, Identity, Result};
use interbus_settings::ChannelSettings;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::client::{ChannelClient, ConnectOptions};
use crate::provider::ChannelProvider;
use crate::registry::ChannelRegistry;
use crate::state::ConnectionState;
use crate::transport::{TransportLink, memory, ws};

/// Channel operations performed as one identity.
///
/// The bus keeps the providers and clients it opened so [`shutdown`](Self::shutdown)
/// can close them; destroyed providers and disconnected clients are pruned
/// whenever either list is touched.
pub struct ChannelBus {
    identity: Identity,
    registry: Arc<ChannelRegistry>,
    settings: ChannelSettings,
    providers: Mutex<Vec<ChannelProvider>>,
    clients: Mutex<Vec<ChannelClient>>,
}

impl ChannelBus {
    /// Bind `identity` to `registry`.
    pub fn new(identity: Identity, registry: Arc<ChannelRegistry>, settings: ChannelSettings) -> Self {
        Self {
            identity,
            registry,
            settings,
            providers: Mutex::new(Vec::new()),
            clients: Mutex::new(Vec::new()),
        }
    }

    /// The identity this bus acts as.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The registry channels are created in and looked up from.
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Timeouts applied to connections made through this bus.
    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    /// Create channel `name` with this bus's identity as provider.
    ///
    /// Fails with [`BusError::ChannelAlreadyExists`] while another live
    /// provider owns the name.
    pub fn create(&self, name: &str) -> Result<ChannelProvider> {
        let provider = ChannelProvider::new(
            name,
            self.identity.clone(),
            self.settings.clone(),
            Arc::downgrade(&self.registry),
        );
        self.registry.insert_provider(provider.clone())?;
        {
            let mut providers = self.providers.lock();
            prune_providers(&mut providers);
            providers.push(provider.clone());
        }
        info!(channel = name, provider = %self.identity, "channel created");
        Ok(provider)
    }

    /// Connect to channel `name` in this process.
    ///
    /// With [`ConnectOptions::wait`] set, waits up to the connect timeout for
    /// the channel to be created; otherwise a missing channel fails with
    /// [`BusError::ChannelNotFound`] at once.
    pub async fn connect(&self, name: &str, options: ConnectOptions) -> Result<ChannelClient> {
        let found = if options.wait {
            self.registry
                .wait_for(name, self.settings.connect_timeout())
                .await
        } else {
            self.registry.lookup(name)
        };
        let Some(provider) = found else {
            debug!(channel = name, "no provider for channel");
            return Err(BusError::ChannelNotFound {
                channel: name.to_owned(),
            });
        };

        let (client_end, provider_end) = memory::pair();
        let _ = tokio::spawn(async move { provider.accept(provider_end).await });
        // The provider is already known; the handshake needs no extra wait window.
        self.connect_link(client_end, name, options.no_wait()).await
    }

    /// Connect to channel `name` hosted behind the broker at `url`.
    pub async fn connect_remote(&self, url: &str, name: &str, options: ConnectOptions) -> Result<ChannelClient> {
        let link = ws::connect(url).await?;
        self.connect_link(link, name, options).await
    }

    /// Connect to channel `name` over an already established link.
    pub async fn connect_link(
        &self,
        link: TransportLink,
        name: &str,
        options: ConnectOptions,
    ) -> Result<ChannelClient> {
        let client = ChannelClient::handshake(
            link,
            name,
            self.identity.clone(),
            options,
            self.settings.clone(),
            Arc::downgrade(&self.registry),
        )
        .await?;
        let mut clients = self.clients.lock();
        prune_clients(&mut clients);
        clients.push(client.clone());
        Ok(client)
    }

    /// Channels created through this bus that are still live.
    pub fn providers(&self) -> Vec<ChannelProvider> {
        let mut providers = self.providers.lock();
        prune_providers(&mut providers);
        providers.clone()
    }

    /// Clients opened through this bus that have not disconnected.
    pub fn clients(&self) -> Vec<ChannelClient> {
        let mut clients = self.clients.lock();
        prune_clients(&mut clients);
        clients.clone()
    }

    /// Destroy every channel this bus created and disconnect every client
    /// it opened.
    pub async fn shutdown(&self) {
        let providers = std::mem::take(&mut *self.providers.lock());
        let clients = std::mem::take(&mut *self.clients.lock());
        for client in &clients {
            if let Err(e) = client.disconnect().await {
                debug!(channel = client.channel_name(), error = %e, "client disconnect during shutdown");
            }
        }
        for provider in &providers {
            provider.destroy();
        }
        info!(
            identity = %self.identity,
            providers = providers.len(),
            clients = clients.len(),
            "channel bus shut down"
        );
    }
}

fn prune_providers(providers: &mut Vec<ChannelProvider>) {
    providers.retain(|provider| !provider.is_destroyed());
}

fn prune_clients(clients: &mut Vec<ChannelClient>) {
    clients.retain(|client| client.state() != ConnectionState::Disconnected);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use assert_matches::assert_matches;
    use serde_json::{Value, json};

    fn settings() -> ChannelSettings {
        ChannelSettings {
            dispatch_timeout_ms: 2_000,
            connect_timeout_ms: 300,
            disconnect_timeout_ms: 300,
        }
    }

    fn buses() -> (ChannelBus, ChannelBus) {
        let registry = Arc::new(ChannelRegistry::new());
        (
            ChannelBus::new(
                Identity::new("provider-app", "provider-app"),
                Arc::clone(&registry),
                settings(),
            ),
            ChannelBus::new(Identity::external("externalConnectionUUID"), registry, settings()),
        )
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let (bus, _) = buses();
        let _provider = bus.create("test-channel-1").unwrap();
        assert_matches!(
            bus.create("test-channel-1"),
            Err(BusError::ChannelAlreadyExists { channel }) if channel == "test-channel-1"
        );
    }

    #[tokio::test]
    async fn connect_without_wait_to_missing_channel() {
        let (_, client_bus) = buses();
        let err = client_bus
            .connect("missing", ConnectOptions::default().no_wait())
            .await
            .unwrap_err();
        assert_matches!(err, BusError::ChannelNotFound { channel } if channel == "missing");
    }

    #[tokio::test(start_paused = true)]
    async fn connect_with_wait_gives_up_after_connect_timeout() {
        let (_, client_bus) = buses();
        let err = client_bus
            .connect("missing", ConnectOptions::default())
            .await
            .unwrap_err();
        assert_matches!(err, BusError::ChannelNotFound { .. });
    }

    #[tokio::test]
    async fn connect_with_wait_sees_late_create() {
        let (provider_bus, client_bus) = buses();
        let connecting = tokio::spawn(async move {
            client_bus
                .connect("late-channel", ConnectOptions::default())
                .await
                .map(|client| client.provider_identity().clone())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _provider = provider_bus.create("late-channel").unwrap();
        let provider_identity = connecting.await.unwrap().unwrap();
        assert_eq!(provider_identity, Identity::new("provider-app", "provider-app"));
    }

    #[tokio::test]
    async fn connected_client_is_tracked_until_disconnect() {
        let (provider_bus, client_bus) = buses();
        let provider = provider_bus.create("test-channel-1").unwrap();
        let client = client_bus
            .connect("test-channel-1", ConnectOptions::default())
            .await
            .unwrap();
        assert_eq!(client_bus.registry().client_count(), 1);
        assert_eq!(provider.connections(), vec![client.identity().clone()]);

        client.disconnect().await.unwrap();
        assert!(provider.connections().is_empty());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn shutdown_destroys_channels_and_disconnects_clients() {
        let (provider_bus, client_bus) = buses();
        let provider = provider_bus.create("test-channel-1").unwrap();
        let _ = provider.register("ping", |_: Value, _: Identity| async { Ok(json!("pong")) });
        let client = client_bus
            .connect("test-channel-1", ConnectOptions::default())
            .await
            .unwrap();
        assert_eq!(client.dispatch("ping", Value::Null).await.unwrap(), json!("pong"));

        client_bus.shutdown().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);

        provider_bus.shutdown().await;
        assert!(provider.is_destroyed());
        assert!(provider_bus.registry().lookup("test-channel-1").is_none());
    }

    #[tokio::test]
    async fn repeated_connect_disconnect_does_not_accumulate_clients() {
        let (provider_bus, client_bus) = buses();
        let _provider = provider_bus.create("test-channel-1").unwrap();
        for _ in 0..50 {
            let client = client_bus
                .connect("test-channel-1", ConnectOptions::default())
                .await
                .unwrap();
            client.disconnect().await.unwrap();
        }
        assert!(client_bus.clients.lock().len() <= 1);
        assert!(client_bus.clients().is_empty());
        assert_eq!(client_bus.registry().client_count(), 0);
    }

    #[tokio::test]
    async fn destroyed_providers_are_released() {
        let (provider_bus, _) = buses();
        for _ in 0..10 {
            provider_bus.create("test-channel-1").unwrap().destroy();
        }
        assert!(provider_bus.providers.lock().len() <= 1);
        assert!(provider_bus.providers().is_empty());

        let _live = provider_bus.create("test-channel-2").unwrap();
        let providers = provider_bus.providers();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].name(), "test-channel-2");
    }
}
