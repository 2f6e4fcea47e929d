//! Wire envelope exchanged over a transport connection.
//!
//! Envelopes are JSON objects tagged by `kind`:
//!
//! | kind | direction | purpose |
//! |------|-----------|---------|
//! | `connect` | client → provider | handshake: channel name, base identity, connect payload |
//! | `connectAck` | provider → client | handshake accepted: resolved member identity |
//! | `connectReject` | provider → client | handshake refused with an error body |
//! | `request` | both | correlated call to the peer's topic table |
//! | `response` | both | result or error for a request |
//! | `publish` | provider → client | uncorrelated broadcast |
//! | `disconnect` | client → provider | client-initiated teardown |
//! | `disconnectAck` | provider → client | provider finished processing the teardown |

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{BusError, ErrorBody, Result};
use crate::identity::Identity;

/// Identifier pairing a request with its response (unique per connection).
pub type CorrelationId = u64;

/// A single message on a channel connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Envelope {
    /// Handshake opener sent by a connecting client.
    Connect {
        /// Channel to attach to.
        channel_name: String,
        /// The client's base identity (before alias resolution).
        identity: Identity,
        /// Connect payload forwarded to the provider (may carry `nameAlias`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        /// Whether the receiving side should wait for the channel to appear.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        wait: bool,
    },
    /// Handshake accepted.
    ConnectAck {
        /// Identity the provider assigned to this member.
        member: Identity,
        /// The provider's identity.
        provider: Identity,
    },
    /// Handshake refused.
    ConnectReject {
        /// Why.
        error: ErrorBody,
    },
    /// Correlated request for the peer's handler table.
    Request {
        /// Correlation id, unique among outstanding requests on this connection.
        correlation_id: CorrelationId,
        /// Topic name.
        topic: String,
        /// Request payload.
        #[serde(default)]
        payload: Value,
        /// Sender identity.
        sender: Identity,
    },
    /// Answer to a request.
    Response {
        /// Correlation id of the request being answered.
        correlation_id: CorrelationId,
        /// Handler result (present on success).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Error (present on failure).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    /// Uncorrelated broadcast.
    Publish {
        /// Topic name.
        topic: String,
        /// Publish payload.
        #[serde(default)]
        payload: Value,
        /// Sender identity.
        sender: Identity,
    },
    /// Client-initiated teardown.
    Disconnect {
        /// Identity of the departing member.
        sender: Identity,
    },
    /// Provider finished processing a disconnect.
    DisconnectAck,
}

impl Envelope {
    /// Build a response envelope from a handler outcome.
    pub fn response(correlation_id: CorrelationId, outcome: &Result<Value>) -> Self {
        match outcome {
            Ok(value) => Self::Response {
                correlation_id,
                result: Some(value.clone()),
                error: None,
            },
            Err(err) => Self::Response {
                correlation_id,
                result: None,
                error: Some(err.to_error_body()),
            },
        }
    }

    /// Short kind label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::ConnectAck { .. } => "connectAck",
            Self::ConnectReject { .. } => "connectReject",
            Self::Request { .. } => "request",
            Self::Response { .. } => "response",
            Self::Publish { .. } => "publish",
            Self::Disconnect { .. } => "disconnect",
            Self::DisconnectAck => "disconnectAck",
        }
    }

    /// Serialize to the bytes handed to a transport.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parse bytes received from a transport.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Turn a received response into the caller's outcome.
///
/// A response carrying neither result nor error resolves to `null`, the
/// value a handler with no return value produces.
pub fn response_outcome(result: Option<Value>, error: Option<ErrorBody>) -> Result<Value> {
    match error {
        Some(body) => Err(BusError::from_error_body(body)),
        None => Ok(result.unwrap_or(Value::Null)),
    }
}
