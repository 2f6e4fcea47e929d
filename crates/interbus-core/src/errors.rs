//! Channel error taxonomy and wire error bodies.
//!
//! [`BusError`] is the single error type returned by channel operations. Each
//! variant maps to a stable machine-readable code. Errors that happen on the
//! far side of a connection travel as an [`ErrorBody`] inside a response or
//! connect-reject envelope and are rebuilt into the same variant with
//! [`BusError::from_error_body`].

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::identity::Identity;

// ── Error code constants ────────────────────────────────────────────

/// A live provider already owns the channel name.
pub const CHANNEL_ALREADY_EXISTS: &str = "CHANNEL_ALREADY_EXISTS";
/// No provider is reachable for the channel name.
pub const CHANNEL_NOT_FOUND: &str = "CHANNEL_NOT_FOUND";
/// Dispatch target is not a current member.
pub const MEMBER_NOT_FOUND: &str = "MEMBER_NOT_FOUND";
/// The peer has no handler for the topic.
pub const TOPIC_NOT_REGISTERED: &str = "TOPIC_NOT_REGISTERED";
/// The peer went away while the request was outstanding.
pub const PEER_DISCONNECTED: &str = "PEER_DISCONNECTED";
/// No answer within the configured window.
pub const TIMEOUT: &str = "TIMEOUT";
/// The transport connection is closed.
pub const TRANSPORT_CLOSED: &str = "TRANSPORT_CLOSED";
/// The resolved identity is already a member of the channel.
pub const ALREADY_CONNECTED: &str = "ALREADY_CONNECTED";
/// Default code for errors raised by topic handlers.
pub const HANDLER_ERROR: &str = "HANDLER_ERROR";
/// Malformed or out-of-sequence envelope.
pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
/// Envelope could not be encoded or decoded.
pub const CODEC_ERROR: &str = "CODEC_ERROR";

/// Error type for every channel operation.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// `create` targeted a name owned by a live provider.
    #[error("channel '{channel}' already exists")]
    ChannelAlreadyExists {
        /// Channel name.
        channel: String,
    },

    /// No provider owns the channel name (or it went away).
    #[error("channel '{channel}' not found")]
    ChannelNotFound {
        /// Channel name.
        channel: String,
    },

    /// Dispatch target is not a current member of the channel.
    #[error("{identity} is not connected to this channel")]
    MemberNotFound {
        /// The identity that was addressed.
        identity: Identity,
    },

    /// The receiving side has no handler for the topic.
    #[error("no handler registered for topic '{topic}'")]
    TopicNotRegistered {
        /// Topic name.
        topic: String,
    },

    /// The connection ended while the request was outstanding.
    #[error("peer disconnected")]
    PeerDisconnected,

    /// No answer within the configured window.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// What was being waited for (e.g. `dispatch 'topic'`).
        operation: String,
        /// The window that elapsed.
        timeout_ms: u64,
    },

    /// The transport refused the message because it is closed.
    #[error("transport closed")]
    TransportClosed,

    /// Handshake rejected: the resolved identity is already a member.
    #[error("{identity} is already connected to channel '{channel}'")]
    AlreadyConnected {
        /// Channel name.
        channel: String,
        /// The duplicate identity.
        identity: Identity,
    },

    /// Structured error returned by a topic handler, passed through verbatim.
    #[error("{message}")]
    Handler {
        /// Machine-readable code chosen by the handler.
        code: String,
        /// Human-readable message.
        message: String,
        /// Optional structured details.
        details: Option<Value>,
    },

    /// Malformed or unexpected envelope.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description.
        message: String,
    },

    /// JSON encode/decode failure.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Structured error carried inside an envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl BusError {
    /// Handler error with the default [`HANDLER_ERROR`] code.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            code: HANDLER_ERROR.to_owned(),
            message: message.into(),
            details: None,
        }
    }

    /// Handler error with an arbitrary code and optional details.
    pub fn custom(code: impl Into<String>, message: impl Into<String>, details: Option<Value>) -> Self {
        Self::Handler {
            code: code.into(),
            message: message.into(),
            details,
        }
    }

    /// Build a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &str {
        match self {
            Self::ChannelAlreadyExists { .. } => CHANNEL_ALREADY_EXISTS,
            Self::ChannelNotFound { .. } => CHANNEL_NOT_FOUND,
            Self::MemberNotFound { .. } => MEMBER_NOT_FOUND,
            Self::TopicNotRegistered { .. } => TOPIC_NOT_REGISTERED,
            Self::PeerDisconnected => PEER_DISCONNECTED,
            Self::Timeout { .. } => TIMEOUT,
            Self::TransportClosed => TRANSPORT_CLOSED,
            Self::AlreadyConnected { .. } => ALREADY_CONNECTED,
            Self::Handler { code, .. } => code,
            Self::Protocol { .. } => PROTOCOL_ERROR,
            Self::Codec(_) => CODEC_ERROR,
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> ErrorBody {
        let details = match self {
            Self::ChannelAlreadyExists { channel } | Self::ChannelNotFound { channel } => {
                Some(json!({ "channel": channel }))
            }
            Self::MemberNotFound { identity } => Some(json!({ "identity": identity })),
            Self::TopicNotRegistered { topic } => Some(json!({ "topic": topic })),
            Self::Timeout {
                operation,
                timeout_ms,
            } => Some(json!({ "operation": operation, "timeoutMs": timeout_ms })),
            Self::AlreadyConnected { channel, identity } => {
                Some(json!({ "channel": channel, "identity": identity }))
            }
            Self::Handler { details, .. } => details.clone(),
            Self::PeerDisconnected | Self::TransportClosed | Self::Protocol { .. } | Self::Codec(_) => {
                None
            }
        };
        ErrorBody {
            code: self.code().to_owned(),
            message: self.to_string(),
            details,
        }
    }

    /// Rebuild an error received from the far side of a connection.
    ///
    /// Known codes map back to their variant; anything else (including
    /// handler-chosen codes) becomes [`BusError::Handler`] unchanged.
    pub fn from_error_body(body: ErrorBody) -> Self {
        let detail_str = |key: &str| {
            body.details
                .as_ref()
                .and_then(|d| d.get(key))
                .and_then(Value::as_str)
                .map(str::to_owned)
        };
        let detail_identity = || {
            body.details
                .as_ref()
                .and_then(|d| d.get("identity"))
                .and_then(|v| serde_json::from_value::<Identity>(v.clone()).ok())
        };

        let rebuilt = match body.code.as_str() {
            CHANNEL_ALREADY_EXISTS => {
                detail_str("channel").map(|channel| Self::ChannelAlreadyExists { channel })
            }
            CHANNEL_NOT_FOUND => detail_str("channel").map(|channel| Self::ChannelNotFound { channel }),
            MEMBER_NOT_FOUND => detail_identity().map(|identity| Self::MemberNotFound { identity }),
            TOPIC_NOT_REGISTERED => detail_str("topic").map(|topic| Self::TopicNotRegistered { topic }),
            PEER_DISCONNECTED => Some(Self::PeerDisconnected),
            TIMEOUT => {
                let timeout_ms = body
                    .details
                    .as_ref()
                    .and_then(|d| d.get("timeoutMs"))
                    .and_then(Value::as_u64);
                detail_str("operation")
                    .zip(timeout_ms)
                    .map(|(operation, timeout_ms)| Self::Timeout {
                        operation,
                        timeout_ms,
                    })
            }
            TRANSPORT_CLOSED => Some(Self::TransportClosed),
            ALREADY_CONNECTED => detail_str("channel")
                .zip(detail_identity())
                .map(|(channel, identity)| Self::AlreadyConnected { channel, identity }),
            PROTOCOL_ERROR | CODEC_ERROR => Some(Self::Protocol {
                message: body.message.clone(),
            }),
            _ => None,
        };

        rebuilt.unwrap_or(Self::Handler {
            code: body.code,
            message: body.message,
            details: body.details,
        })
    }
}
