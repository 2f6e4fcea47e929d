//! `ChannelServer`: axum HTTP + WebSocket broker.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use interbus_channel::ChannelRegistry;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::{BROKER_SOCKETS_ACTIVE, BROKER_SOCKETS_REFUSED_TOTAL, BROKER_SOCKETS_TOTAL};
use crate::session::{self, run_broker_session};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Channels reachable through the broker.
    pub registry: Arc<ChannelRegistry>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
    sockets: Arc<AtomicUsize>,
}

/// Broker exposing a [`ChannelRegistry`] over WebSockets.
pub struct ChannelServer {
    config: Arc<ServerConfig>,
    registry: Arc<ChannelRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: PrometheusHandle,
    sockets: Arc<AtomicUsize>,
}

impl ChannelServer {
    /// Create a broker for `registry`.
    pub fn new(config: ServerConfig, registry: Arc<ChannelRegistry>, metrics: PrometheusHandle) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
            sockets: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            sockets: Arc::clone(&self.sockets),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the handle of the
    /// serving task, which completes once shutdown is initiated.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "broker listener failed");
            }
        });

        info!(%addr, "interbus broker listening");
        Ok((addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the channel registry.
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Open broker WebSocket connections.
    pub fn socket_count(&self) -> usize {
        self.sockets.load(Ordering::Relaxed)
    }
}

/// Holds one slot of the connection limit until dropped.
struct SocketSlot {
    sockets: Arc<AtomicUsize>,
}

impl SocketSlot {
    fn acquire(sockets: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        let claimed =
            sockets.fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| (open < limit).then_some(open + 1));
        if claimed.is_err() {
            return None;
        }
        gauge!(BROKER_SOCKETS_ACTIVE).increment(1.0);
        Some(Self {
            sockets: Arc::clone(sockets),
        })
    }
}

impl Drop for SocketSlot {
    fn drop(&mut self) {
        let _ = self.sockets.fetch_sub(1, Ordering::AcqRel);
        gauge!(BROKER_SOCKETS_ACTIVE).decrement(1.0);
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let Some(slot) = SocketSlot::acquire(&state.sockets, state.config.max_connections) else {
        warn!(limit = state.config.max_connections, "connection limit reached, refusing upgrade");
        counter!(BROKER_SOCKETS_REFUSED_TOTAL).increment(1);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    counter!(BROKER_SOCKETS_TOTAL).increment(1);

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let link = session::link(socket);
            let session = run_broker_session(
                link,
                Arc::clone(&state.registry),
                state.config.channel.clone(),
                state.shutdown.token(),
            );
            state.shutdown.spawn(async move {
                session.await;
                drop(slot);
            });
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.channel_count(),
        state.registry.member_count(),
        state.sockets.load(Ordering::Relaxed),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use interbus_channel::ChannelBus;
    use interbus_core::Identity;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server() -> ChannelServer {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        ChannelServer::new(ServerConfig::default(), Arc::new(ChannelRegistry::new()), handle)
    }

    async fn get_json(app: Router, uri: &str) -> serde_json::Value {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_reports_channels() {
        let server = make_server();
        let bus = ChannelBus::new(
            Identity::new("provider-app", "provider-app"),
            Arc::clone(server.registry()),
            server.config().channel.clone(),
        );
        let _provider = bus.create("health-channel").unwrap();

        let parsed = get_json(server.router(), "/health").await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["channels"], 1);
        assert_eq!(parsed["members"], 0);
        assert_eq!(parsed["connections"], 0);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_text() {
        let server = make_server();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn plain_get_on_ws_is_not_an_upgrade() {
        let server = make_server();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn socket_slots_respect_the_limit() {
        let sockets = Arc::new(AtomicUsize::new(0));
        let first = SocketSlot::acquire(&sockets, 2).unwrap();
        let _second = SocketSlot::acquire(&sockets, 2).unwrap();
        assert!(SocketSlot::acquire(&sockets, 2).is_none());
        drop(first);
        assert_eq!(sockets.load(Ordering::Relaxed), 1);
        assert!(SocketSlot::acquire(&sockets, 2).is_some());
    }

    #[tokio::test]
    async fn listen_stops_on_shutdown() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("shutdown timed out")
            .expect("join error");
    }
}
