//! Connection state machine for a single publish session
//!
//! The state is owned by the coordinator and mutated only in response to
//! [`SessionEvent`]s reported by the session driver. Transitions are pure
//! functions so the whole machine is testable without a network.

use std::fmt;
use tracing::{debug, info, warn};

/// Broker-assigned identifier correlating a publish with its acknowledgment
pub type MessageId = u16;

/// Connection lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state, and final state after cleanup
    Disconnected,
    /// Connect requested, waiting for the broker to acknowledge
    Connecting,
    /// Session established and ready to publish
    Connected,
    /// Disconnect requested, waiting for the session to wind down
    Disconnecting,
    /// Terminal failure with reason
    Failed(String),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnecting => write!(f, "disconnecting"),
            ConnectionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Asynchronous events surfaced by a session driver
///
/// These are the driver's connect / disconnect / publish-acknowledged
/// notifications, delivered to the coordinator over a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Broker accepted the connection (ConnAck success)
    Connected,
    /// Broker refused the connection, with the reason code text
    ConnectionRefused(String),
    /// Session ended, either requested or dropped by the broker
    Disconnected { reason: String },
    /// Broker acknowledged the publish with this message id
    PublishAcknowledged(MessageId),
}

/// Compute the next connection state for a session event (pure function)
///
/// Acknowledgment events never move the state machine; they only feed the
/// in-flight table. A disconnect while `Connected` is unexpected and lands
/// in `Failed`, while the same event during `Disconnecting` is the normal
/// end of the session.
pub fn next_state(current: &ConnectionState, event: &SessionEvent) -> ConnectionState {
    match (current, event) {
        (ConnectionState::Connecting, SessionEvent::Connected) => ConnectionState::Connected,
        (ConnectionState::Connecting, SessionEvent::ConnectionRefused(reason)) => {
            ConnectionState::Failed(format!("broker refused connection: {reason}"))
        }
        (ConnectionState::Connecting, SessionEvent::Disconnected { reason }) => {
            ConnectionState::Failed(format!("session ended before ConnAck: {reason}"))
        }
        (ConnectionState::Connected, SessionEvent::Disconnected { reason }) => {
            ConnectionState::Failed(format!("unexpected disconnect: {reason}"))
        }
        (ConnectionState::Disconnecting, SessionEvent::Disconnected { .. }) => {
            ConnectionState::Disconnected
        }
        (_, SessionEvent::PublishAcknowledged(_)) => current.clone(),
        // Anything else leaves the state untouched
        _ => current.clone(),
    }
}

/// Log a state transition (pure logging function)
pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
    if from == to {
        return;
    }
    match to {
        ConnectionState::Connected => {
            info!(target: "session", from = %from, "connection established");
        }
        ConnectionState::Failed(reason) => {
            warn!(target: "session", from = %from, reason = %reason, "session failed");
        }
        ConnectionState::Disconnected => {
            info!(target: "session", from = %from, "session closed");
        }
        _ => {
            debug!(target: "session", from = %from, to = %to, "state transition");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connecting_to_connected() {
        let next = next_state(&ConnectionState::Connecting, &SessionEvent::Connected);
        assert_eq!(next, ConnectionState::Connected);
    }

    #[test]
    fn test_connecting_refused_fails() {
        let next = next_state(
            &ConnectionState::Connecting,
            &SessionEvent::ConnectionRefused("bad username or password".to_string()),
        );
        assert!(matches!(next, ConnectionState::Failed(reason) if reason.contains("bad username")));
    }

    #[test]
    fn test_connecting_dropped_fails() {
        let next = next_state(
            &ConnectionState::Connecting,
            &SessionEvent::Disconnected {
                reason: "connection reset".to_string(),
            },
        );
        assert!(matches!(next, ConnectionState::Failed(_)));
    }

    #[test]
    fn test_unexpected_disconnect_fails() {
        let next = next_state(
            &ConnectionState::Connected,
            &SessionEvent::Disconnected {
                reason: "broker closed".to_string(),
            },
        );
        assert!(matches!(next, ConnectionState::Failed(reason) if reason.contains("unexpected")));
    }

    #[test]
    fn test_requested_disconnect_completes() {
        let next = next_state(
            &ConnectionState::Disconnecting,
            &SessionEvent::Disconnected {
                reason: "client disconnect".to_string(),
            },
        );
        assert_eq!(next, ConnectionState::Disconnected);
    }

    #[test]
    fn test_ack_never_moves_state() {
        for state in [
            ConnectionState::Connected,
            ConnectionState::Connecting,
            ConnectionState::Disconnecting,
        ] {
            let next = next_state(&state, &SessionEvent::PublishAcknowledged(7));
            assert_eq!(next, state);
        }
    }

    #[test]
    fn test_late_connected_while_disconnecting_is_ignored() {
        let next = next_state(&ConnectionState::Disconnecting, &SessionEvent::Connected);
        assert_eq!(next, ConnectionState::Disconnecting);
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::Failed("auth".to_string()).to_string(),
            "failed: auth"
        );
    }
}
