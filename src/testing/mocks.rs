//! Mock session driver for testing
//!
//! Provides a scripted [`SessionDriver`] so coordinator behavior can be
//! tested deterministically: connection acceptance, refusal or silence, and
//! acknowledgments that arrive promptly, late, never, or with the wrong
//! message id.

use crate::session::{QosLevel, SessionDriver, SessionError};
use crate::state::{MessageId, SessionEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Scripted connect behavior
#[derive(Debug, Clone)]
pub enum MockConnect {
    /// Emit a successful connection event after the delay
    AcceptAfter(Duration),
    /// Emit a refusal with the given reason
    Refuse(String),
    /// Never emit any connection event
    Silent,
}

/// Scripted acknowledgment behavior
#[derive(Debug, Clone)]
pub enum MockAck {
    /// Acknowledge as soon as the publish is submitted
    Immediate,
    /// Acknowledge after the delay
    AfterDelay(Duration),
    /// Never acknowledge
    Never,
    /// Acknowledge a different message id than the one submitted
    WrongId,
}

pub type PublishedRecord = (String, Vec<u8>, QosLevel);

/// Mock session driver with scripted behavior
pub struct MockSession {
    connect_behavior: MockConnect,
    ack_behavior: MockAck,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: Option<mpsc::Receiver<SessionEvent>>,
    published: Arc<Mutex<Vec<PublishedRecord>>>,
    connect_calls: Arc<AtomicU32>,
    disconnect_calls: Arc<AtomicU32>,
    next_message_id: MessageId,
}

impl MockSession {
    pub fn new(connect_behavior: MockConnect, ack_behavior: MockAck) -> Self {
        let (events_tx, events_rx) = mpsc::channel(16);
        Self {
            connect_behavior,
            ack_behavior,
            events_tx,
            events_rx: Some(events_rx),
            published: Arc::new(Mutex::new(Vec::new())),
            connect_calls: Arc::new(AtomicU32::new(0)),
            disconnect_calls: Arc::new(AtomicU32::new(0)),
            next_message_id: 1,
        }
    }

    /// A session that connects quickly and acknowledges every publish
    pub fn accepting() -> Self {
        Self::new(
            MockConnect::AcceptAfter(Duration::from_millis(5)),
            MockAck::Immediate,
        )
    }

    /// Handle for asserting which messages were published
    pub fn published_handle(&self) -> Arc<Mutex<Vec<PublishedRecord>>> {
        self.published.clone()
    }

    /// Handle for asserting how many times connect was requested
    pub fn connect_calls_handle(&self) -> Arc<AtomicU32> {
        self.connect_calls.clone()
    }

    /// Handle for asserting how many times disconnect was requested
    pub fn disconnect_calls_handle(&self) -> Arc<AtomicU32> {
        self.disconnect_calls.clone()
    }
}

#[async_trait]
impl SessionDriver for MockSession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let events = self.events_tx.clone();
        match self.connect_behavior.clone() {
            MockConnect::AcceptAfter(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(SessionEvent::Connected).await;
                });
            }
            MockConnect::Refuse(reason) => {
                tokio::spawn(async move {
                    let _ = events.send(SessionEvent::ConnectionRefused(reason)).await;
                });
            }
            MockConnect::Silent => {}
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        let _ = self
            .events_tx
            .send(SessionEvent::Disconnected {
                reason: "client disconnect".to_string(),
            })
            .await;
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QosLevel,
    ) -> Result<MessageId, SessionError> {
        let message_id = self.next_message_id;
        self.next_message_id += 1;

        self.published
            .lock()
            .await
            .push((topic.to_string(), payload.to_vec(), qos));

        let events = self.events_tx.clone();
        match self.ack_behavior.clone() {
            MockAck::Immediate => {
                let _ = events
                    .send(SessionEvent::PublishAcknowledged(message_id))
                    .await;
            }
            MockAck::AfterDelay(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events
                        .send(SessionEvent::PublishAcknowledged(message_id))
                        .await;
                });
            }
            MockAck::Never => {}
            MockAck::WrongId => {
                let _ = events
                    .send(SessionEvent::PublishAcknowledged(message_id + 1))
                    .await;
            }
        }

        Ok(message_id)
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events_rx.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accepting_session_emits_connected() {
        let mut session = MockSession::accepting();
        let mut events = session.take_events().unwrap();

        session.connect().await.unwrap();

        let event = tokio::time::timeout(Duration::from_millis(100), events.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(SessionEvent::Connected));
    }

    #[tokio::test]
    async fn test_publish_records_message() {
        let mut session = MockSession::accepting();
        let published = session.published_handle();

        let id = session
            .publish("device/device1A/firmware", b"payload", QosLevel::AtLeastOnce)
            .await
            .unwrap();

        assert_eq!(id, 1);
        let records = published.lock().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, "device/device1A/firmware");
        assert_eq!(records[0].1, b"payload");
        assert_eq!(records[0].2, QosLevel::AtLeastOnce);
    }

    #[tokio::test]
    async fn test_message_ids_increment() {
        let mut session = MockSession::new(MockConnect::Silent, MockAck::Never);
        let first = session.publish("t", b"a", QosLevel::AtLeastOnce).await.unwrap();
        let second = session.publish("t", b"b", QosLevel::AtLeastOnce).await.unwrap();
        assert_eq!(second, first + 1);
    }
}
