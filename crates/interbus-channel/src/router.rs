//! Topic table shared by providers and clients.
//!
//! Each side of a channel owns one [`TopicRouter`]. Incoming requests are
//! routed by topic to a [`TopicHandler`]; an unknown topic answers with
//! [`BusError::TopicNotRegistered`]. Publishes to an unknown topic are
//! dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use interbus_core::{BusError, Identity, Result};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

/// Handler bound to one topic.
///
/// Closures `Fn(Value, Identity) -> impl Future<Output = Result<Value>>`
/// implement this trait directly.
#[async_trait]
pub trait TopicHandler: Send + Sync {
    /// Handle one message from `sender`; the value becomes the response.
    async fn handle(&self, payload: Value, sender: Identity) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> TopicHandler for F
where
    F: Fn(Value, Identity) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn handle(&self, payload: Value, sender: Identity) -> Result<Value> {
        self(payload, sender).await
    }
}

/// Registry mapping topic names to handlers.
///
/// Registering a topic twice replaces the earlier handler.
#[derive(Default)]
pub struct TopicRouter {
    handlers: RwLock<HashMap<String, Arc<dyn TopicHandler>>>,
}

impl TopicRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `topic`. Returns `true` if a handler was replaced.
    pub fn register(&self, topic: &str, handler: impl TopicHandler + 'static) -> bool {
        let replaced = self
            .handlers
            .write()
            .insert(topic.to_owned(), Arc::new(handler))
            .is_some();
        if replaced {
            debug!(topic, "topic handler replaced");
        }
        replaced
    }

    /// Unbind `topic`. Returns `true` if a handler was removed.
    pub fn remove(&self, topic: &str) -> bool {
        self.handlers.write().remove(topic).is_some()
    }

    /// Whether `topic` has a handler.
    pub fn has_topic(&self, topic: &str) -> bool {
        self.handlers.read().contains_key(topic)
    }

    /// Registered topic names (sorted).
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn handler(&self, topic: &str) -> Option<Arc<dyn TopicHandler>> {
        self.handlers.read().get(topic).cloned()
    }

    /// Route a request; the handler's outcome is the response.
    pub async fn dispatch(&self, topic: &str, payload: Value, sender: Identity) -> Result<Value> {
        let Some(handler) = self.handler(topic) else {
            debug!(topic, %sender, "request for unregistered topic");
            return Err(BusError::TopicNotRegistered {
                topic: topic.to_owned(),
            });
        };
        handler.handle(payload, sender).await
    }

    /// Route a publish. Returns `false` if nothing handled it.
    ///
    /// Handler errors are logged and otherwise ignored; publishes have no
    /// response to carry them.
    pub async fn deliver(&self, topic: &str, payload: Value, sender: Identity) -> bool {
        let Some(handler) = self.handler(topic) else {
            debug!(topic, %sender, "publish for unregistered topic dropped");
            return false;
        };
        if let Err(e) = handler.handle(payload, sender).await {
            warn!(topic, error = %e, "publish handler failed");
        }
        true
    }
}
