//! # interbus-server
//!
//! Axum broker that exposes a process's channel registry to external
//! connections.
//!
//! - `GET /ws`: WebSocket upgrade; the first frame must be a `connect`
//!   envelope naming a channel registered in this process
//! - `GET /health`: uptime and channel/member counts
//! - `GET /metrics`: Prometheus text rendering
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod session;
pub mod shutdown;

pub use config::ServerConfig;
pub use server::ChannelServer;
pub use shutdown::ShutdownCoordinator;
