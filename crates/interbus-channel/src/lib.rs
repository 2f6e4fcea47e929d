//! # interbus-channel
//!
//! Named channels between one provider and any number of clients.
//!
//! - **Bus**: [`ChannelBus`] is a participant's entry point (`create`, `connect`)
//! - **Provider**: [`ChannelProvider`] owns a channel, tracks members, dispatches and publishes
//! - **Client**: [`ChannelClient`] is one member's connection to a provider
//! - **Registry**: [`ChannelRegistry`] maps channel names to live providers
//! - **Routing**: [`TopicRouter`] maps topics to [`TopicHandler`]s on either side
//! - **Transport**: [`Transport`] seam with in-memory and WebSocket implementations
//!
//! Every dispatch is correlated with its response through a per-connection
//! [`CorrelationTable`]; messages received on one connection are handled in
//! arrival order.

#![deny(unsafe_code)]

pub mod bus;
pub mod client;
pub mod connection;
pub mod correlation;
pub mod metrics;
pub mod observer;
pub mod provider;
pub mod registry;
pub mod router;
pub mod state;
pub mod transport;

pub use bus::ChannelBus;
pub use client::{ChannelClient, ConnectOptions};
pub use connection::{ConnectRequest, read_connect, reject_connect};
pub use correlation::CorrelationTable;
pub use observer::{ConnectionObserver, DisconnectionObserver};
pub use provider::ChannelProvider;
pub use registry::ChannelRegistry;
pub use router::{TopicHandler, TopicRouter};
pub use state::ConnectionState;
pub use transport::{QueueTransport, Transport, TransportLink};
