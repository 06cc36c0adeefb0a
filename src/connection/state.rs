//! Connection state and its replay-latest broadcast stream.
//!
//! The stream is a tokio `watch` channel: a new subscriber sees the current
//! state immediately, and a slow subscriber sees only the latest state rather
//! than every intermediate one.

use std::fmt;
use tokio::sync::watch;

/// Where the connection currently is. Exactly one value is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Generic transport error or abnormal close
    Failed,
    /// Host name could not be resolved
    UnknownHostFailed,
    /// Server rejected credentials (HTTP 401/403)
    AuthenticationFailed,
    /// Device revoked or inactive (HTTP 451)
    InactiveFailed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    /// States from which the monitor starts a reconnect sequence.
    ///
    /// Also the states in which late socket callbacks are ignored.
    pub fn needs_reconnect(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected
                | ConnectionState::Failed
                | ConnectionState::UnknownHostFailed
                | ConnectionState::AuthenticationFailed
                | ConnectionState::InactiveFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
            ConnectionState::UnknownHostFailed => "unknown_host_failed",
            ConnectionState::AuthenticationFailed => "authentication_failed",
            ConnectionState::InactiveFailed => "inactive_failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiving side of the state stream.
pub type StateStream = watch::Receiver<ConnectionState>;

/// Single cached state value with change notification.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Publish a new state, returning the one it replaced.
    ///
    /// Subscribers are woken even when the value is unchanged.
    pub fn set(&self, state: ConnectionState) -> ConnectionState {
        self.tx.send_replace(state)
    }

    pub fn subscribe(&self) -> StateStream {
        self.tx.subscribe()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_disconnected() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_reconnectable_states() {
        assert!(ConnectionState::Failed.needs_reconnect());
        assert!(ConnectionState::InactiveFailed.needs_reconnect());
        assert!(ConnectionState::Disconnected.needs_reconnect());
        assert!(!ConnectionState::Connecting.needs_reconnect());
        assert!(!ConnectionState::Connected.needs_reconnect());
    }

    #[tokio::test]
    async fn test_new_subscriber_sees_only_latest() {
        let cell = StateCell::new();
        cell.set(ConnectionState::Connecting);
        cell.set(ConnectionState::Connected);

        let rx = cell.subscribe();
        assert_eq!(*rx.borrow(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_set_wakes_subscribers_even_when_unchanged() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();
        let _ = rx.borrow_and_update();

        let previous = cell.set(ConnectionState::Disconnected);
        assert_eq!(previous, ConnectionState::Disconnected);
        assert!(rx.has_changed().unwrap());
    }
}
