//! # interbus-core
//!
//! Shared vocabulary for the interbus channel crates:
//!
//! - **Identities**: [`Identity`] naming a participant, alias resolution at connect time
//! - **Connection ids**: [`ConnectionId`] newtype over a UUID v7 string
//! - **Errors**: [`BusError`] taxonomy via `thiserror`, with wire-format [`ErrorBody`]
//! - **Envelope**: [`Envelope`] messages exchanged over a transport connection
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod identity;
pub mod ids;
pub mod logging;

pub use envelope::{CorrelationId, Envelope};
pub use errors::{BusError, ErrorBody, Result};
pub use identity::{Identity, NAME_ALIAS_KEY, name_alias};
pub use ids::ConnectionId;
