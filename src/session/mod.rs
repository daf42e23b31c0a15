//! Session driver boundary
//!
//! This module defines the capability set the publish coordinator requires
//! of any pub/sub client library: connect, disconnect, publish, and a stream
//! of session events. The coordinator depends only on this trait, so the
//! concrete library can be swapped for a mock in tests.

use crate::state::{MessageId, SessionEvent};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod rumqtt;

pub use rumqtt::RumqttSession;

/// Delivery guarantee for a published message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosLevel {
    /// Best effort, no acknowledgment expected
    AtMostOnce,
    /// At-least-once, acknowledged by the broker
    AtLeastOnce,
    /// Exactly-once semantics
    ExactlyOnce,
}

impl QosLevel {
    /// Whether this level completes with a broker acknowledgment
    pub fn expects_ack(&self) -> bool {
        !matches!(self, QosLevel::AtMostOnce)
    }

    pub fn from_u8(level: u8) -> Option<Self> {
        match level {
            0 => Some(QosLevel::AtMostOnce),
            1 => Some(QosLevel::AtLeastOnce),
            2 => Some(QosLevel::ExactlyOnce),
            _ => None,
        }
    }
}

impl fmt::Display for QosLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        };
        write!(f, "{level}")
    }
}

/// Errors from driver calls themselves
///
/// Asynchronous failures (refused connections, lost sessions) arrive as
/// [`SessionEvent`]s instead; these variants cover the request path only.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect request failed")]
    ConnectRequest(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("publish request failed")]
    PublishRequest(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("disconnect request failed")]
    DisconnectRequest(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("no message id assigned for publish")]
    MessageIdUnavailable,

    #[error("session event stream already taken")]
    EventStreamTaken,
}

/// Capability set required of a pub/sub session
///
/// Implementations own the network session and its background event loop.
/// They report connection progress and publish acknowledgments through the
/// event receiver handed out by [`SessionDriver::take_events`].
#[async_trait]
pub trait SessionDriver: Send {
    /// Begin connecting; completion arrives as a [`SessionEvent`]
    async fn connect(&mut self) -> Result<(), SessionError>;

    /// Request a clean disconnect; completion arrives as a [`SessionEvent`]
    async fn disconnect(&mut self) -> Result<(), SessionError>;

    /// Submit a publish and return the message id used to correlate its
    /// acknowledgment
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QosLevel,
    ) -> Result<MessageId, SessionError>;

    /// Take the session event stream; yields `None` once already taken
    fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_from_u8() {
        assert_eq!(QosLevel::from_u8(0), Some(QosLevel::AtMostOnce));
        assert_eq!(QosLevel::from_u8(1), Some(QosLevel::AtLeastOnce));
        assert_eq!(QosLevel::from_u8(2), Some(QosLevel::ExactlyOnce));
        assert_eq!(QosLevel::from_u8(3), None);
    }

    #[test]
    fn test_qos_expects_ack() {
        assert!(!QosLevel::AtMostOnce.expects_ack());
        assert!(QosLevel::AtLeastOnce.expects_ack());
        assert!(QosLevel::ExactlyOnce.expects_ack());
    }

    #[test]
    fn test_qos_display() {
        assert_eq!(QosLevel::AtMostOnce.to_string(), "0");
        assert_eq!(QosLevel::AtLeastOnce.to_string(), "1");
        assert_eq!(QosLevel::ExactlyOnce.to_string(), "2");
    }
}
