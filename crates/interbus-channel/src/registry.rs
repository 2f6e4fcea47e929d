//! Process-wide map from channel names to live providers.
//!
//! Creation is atomic per name: of two concurrent `create` calls for the
//! same name exactly one succeeds. A destroyed provider's name becomes free
//! again. Connected clients are tracked alongside for health reporting.

use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use interbus_core::{BusError, ConnectionId, Identity, Result};
use metrics::{counter, gauge};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::metrics::{CHANNELS_ACTIVE, CHANNELS_CREATED_TOTAL};
use crate::provider::ChannelProvider;

#[derive(Clone, Debug)]
struct ClientEntry {
    channel: String,
    identity: Identity,
}

/// Registry of channels and the clients connected to them.
pub struct ChannelRegistry {
    providers: DashMap<String, ChannelProvider>,
    clients: DashMap<ConnectionId, ClientEntry>,
    created: Notify,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
            clients: DashMap::new(),
            created: Notify::new(),
        }
    }

    /// Claim `provider`'s name.
    pub(crate) fn insert_provider(&self, provider: ChannelProvider) -> Result<()> {
        let name = provider.name().to_owned();
        match self.providers.entry(name.clone()) {
            Entry::Occupied(_) => return Err(BusError::ChannelAlreadyExists { channel: name }),
            Entry::Vacant(slot) => {
                let _ = slot.insert(provider);
            }
        }
        counter!(CHANNELS_CREATED_TOTAL).increment(1);
        gauge!(CHANNELS_ACTIVE).increment(1.0);
        debug!(channel = %name, "channel registered");
        self.created.notify_waiters();
        Ok(())
    }

    /// Release `provider`'s name if it still owns it.
    pub(crate) fn remove_provider(&self, provider: &ChannelProvider) -> bool {
        let removed = self
            .providers
            .remove_if(provider.name(), |_, current| current.same_as(provider))
            .is_some();
        if removed {
            gauge!(CHANNELS_ACTIVE).decrement(1.0);
            debug!(channel = provider.name(), "channel unregistered");
        }
        removed
    }

    /// The live provider for `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<ChannelProvider> {
        self.providers
            .get(name)
            .map(|entry| entry.value().clone())
            .filter(|provider| !provider.is_destroyed())
    }

    /// Wait up to `within` for a provider to create `name`.
    pub async fn wait_for(&self, name: &str, within: Duration) -> Option<ChannelProvider> {
        let deadline = Instant::now() + within;
        loop {
            let notified = self.created.notified();
            tokio::pin!(notified);
            // Register interest before checking so a create in between is not missed.
            let _ = notified.as_mut().enable();

            if let Some(provider) = self.lookup(name) {
                return Some(provider);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.lookup(name);
            }
        }
    }

    /// Registered channel names (sorted).
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered channels.
    pub fn channel_count(&self) -> usize {
        self.providers.len()
    }

    /// Members across every registered channel.
    pub fn member_count(&self) -> usize {
        self.providers
            .iter()
            .map(|e| e.value().connections().len())
            .sum()
    }

    pub(crate) fn track_client(&self, id: ConnectionId, channel: &str, identity: Identity) {
        let _ = self.clients.insert(
            id,
            ClientEntry {
                channel: channel.to_owned(),
                identity,
            },
        );
    }

    pub(crate) fn untrack_client(&self, id: &ConnectionId) {
        let _ = self.clients.remove(id);
    }

    /// Number of clients this process has connected.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Identities this process is connected as on `channel`.
    pub fn clients_of(&self, channel: &str) -> Vec<Identity> {
        self.clients
            .iter()
            .filter(|e| e.value().channel == channel)
            .map(|e| e.value().identity.clone())
            .collect()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Weak};

    use super::*;
    use assert_matches::assert_matches;
    use interbus_settings::ChannelSettings;

    fn provider_for(registry: &Arc<ChannelRegistry>, name: &str) -> ChannelProvider {
        ChannelProvider::new(
            name,
            Identity::new("provider-app", "provider-app"),
            ChannelSettings::default(),
            Arc::downgrade(registry),
        )
    }

    #[test]
    fn insert_and_lookup() {
        let registry = Arc::new(ChannelRegistry::new());
        registry.insert_provider(provider_for(&registry, "a")).unwrap();
        assert!(registry.lookup("a").is_some());
        assert!(registry.lookup("b").is_none());
        assert_eq!(registry.channel_names(), vec!["a"]);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let registry = Arc::new(ChannelRegistry::new());
        registry.insert_provider(provider_for(&registry, "a")).unwrap();
        let err = registry
            .insert_provider(provider_for(&registry, "a"))
            .unwrap_err();
        assert_matches!(err, BusError::ChannelAlreadyExists { channel } if channel == "a");
        assert_eq!(registry.channel_count(), 1);
    }

    #[test]
    fn destroy_frees_the_name() {
        let registry = Arc::new(ChannelRegistry::new());
        let first = provider_for(&registry, "a");
        registry.insert_provider(first.clone()).unwrap();
        first.destroy();
        assert!(registry.lookup("a").is_none());
        registry.insert_provider(provider_for(&registry, "a")).unwrap();
    }

    #[test]
    fn stale_provider_does_not_remove_successor() {
        let registry = Arc::new(ChannelRegistry::new());
        let stale = ChannelProvider::new(
            "a",
            Identity::external("x"),
            ChannelSettings::default(),
            Weak::new(),
        );
        registry.insert_provider(provider_for(&registry, "a")).unwrap();
        assert!(!registry.remove_provider(&stale));
        assert!(registry.lookup("a").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_sees_late_create() {
        let registry = Arc::new(ChannelRegistry::new());
        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_for("late", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        registry.insert_provider(provider_for(&registry, "late")).unwrap();
        let found = waiter.await.unwrap();
        assert_eq!(found.map(|p| p.name().to_owned()), Some("late".to_owned()));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_gives_up() {
        let registry = ChannelRegistry::new();
        assert!(registry.wait_for("never", Duration::from_millis(50)).await.is_none());
    }

    #[test]
    fn client_tracking() {
        let registry = ChannelRegistry::new();
        let id = ConnectionId::new();
        registry.track_client(id.clone(), "a", Identity::external("c"));
        assert_eq!(registry.client_count(), 1);
        assert_eq!(registry.clients_of("a"), vec![Identity::external("c")]);
        assert!(registry.clients_of("b").is_empty());
        registry.untrack_client(&id);
        assert_eq!(registry.client_count(), 0);
    }
}
