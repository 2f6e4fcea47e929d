//! Connection lifecycle state.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected
//!                      |                                           ^
//!                      +---------- handshake failed ---------------+
//! ```

use std::fmt;

use parking_lot::Mutex;
use tracing::debug;

/// Where a connection is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport, or the transport has been torn down.
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Handshake complete; dispatch and publish are allowed.
    Connected,
    /// Teardown started; pending requests are being failed.
    Disconnecting,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` follows the lifecycle.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected | Self::Disconnected)
                | (Self::Connected, Self::Disconnecting)
                | (Self::Disconnecting, Self::Disconnected)
        )
    }

    /// Label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, lock-guarded [`ConnectionState`].
pub(crate) struct StateCell {
    state: Mutex<ConnectionState>,
}

impl StateCell {
    pub(crate) fn new(initial: ConnectionState) -> Self {
        Self {
            state: Mutex::new(initial),
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move to `next` if the lifecycle allows it. Returns whether it moved.
    pub(crate) fn advance(&self, next: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            return false;
        }
        debug!(from = %*state, to = %next, "connection state");
        *state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let cell = StateCell::new(ConnectionState::Disconnected);
        assert!(cell.advance(ConnectionState::Connecting));
        assert!(cell.advance(ConnectionState::Connected));
        assert!(cell.advance(ConnectionState::Disconnecting));
        assert!(cell.advance(ConnectionState::Disconnected));
        assert_eq!(cell.get(), ConnectionState::Disconnected);
    }

    #[test]
    fn handshake_failure_returns_to_disconnected() {
        let cell = StateCell::new(ConnectionState::Connecting);
        assert!(cell.advance(ConnectionState::Disconnected));
    }

    #[test]
    fn disconnecting_only_once() {
        let cell = StateCell::new(ConnectionState::Connected);
        assert!(cell.advance(ConnectionState::Disconnecting));
        assert!(!cell.advance(ConnectionState::Disconnecting));
    }

    #[test]
    fn connected_cannot_skip_teardown() {
        assert!(!ConnectionState::Connected.can_transition_to(ConnectionState::Disconnected));
        assert!(!ConnectionState::Disconnected.can_transition_to(ConnectionState::Connected));
    }

    #[test]
    fn display_labels() {
        assert_eq!(ConnectionState::Disconnecting.to_string(), "disconnecting");
    }
}
