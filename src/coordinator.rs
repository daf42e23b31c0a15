//! Publish coordinator - the core one-shot publish path
//!
//! Drives a session driver through connect, publish, acknowledgment and
//! disconnect, with every wait bounded by a timeout and keyed to an explicit
//! session event (connection state target for connects, message id for
//! acknowledgments). The result of an invocation is always an [`Outcome`];
//! failures after configuration never surface as errors or panics.

use crate::config::TransportConfig;
use crate::session::{QosLevel, RumqttSession, SessionDriver};
use crate::state::{
    log_state_transition, next_state, ConnectionState, MessageId, SessionEvent,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::future::pending;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of a single publish invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Payload delivered (QoS 0: submitted; QoS 1/2: acknowledged)
    Published,
    /// No session: refused, unreachable, or no confirmation in time
    ConnectFailed,
    /// Session established but the acknowledgment never arrived
    PublishTimedOut,
    /// Rejected before any network activity
    TransportRejected,
}

/// Typed outcome returned once per invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub detail: String,
}

impl Outcome {
    pub fn published(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Published,
            detail: detail.into(),
        }
    }

    pub fn connect_failed(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::ConnectFailed,
            detail: detail.into(),
        }
    }

    pub fn publish_timed_out(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::PublishTimedOut,
            detail: detail.into(),
        }
    }

    pub fn transport_rejected(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::TransportRejected,
            detail: detail.into(),
        }
    }

    pub fn is_published(&self) -> bool {
        self.status == OutcomeStatus::Published
    }
}

/// Bounds for the waits inside a publish invocation
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Bound on waiting for connection confirmation
    pub connect_timeout: Duration,
    /// Bound on waiting for the publish acknowledgment
    pub ack_timeout: Duration,
    /// Grace period for the best-effort disconnect
    pub disconnect_grace: Duration,
    /// Payloads larger than this are rejected before connecting
    pub max_payload_bytes: usize,
    /// Optional caller-initiated abort; a raised signal makes any
    /// in-progress wait behave as timed out
    pub cancel: Option<watch::Receiver<bool>>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
            disconnect_grace: Duration::from_secs(2),
            max_payload_bytes: 256 * 1024,
            cancel: None,
        }
    }
}

/// A publish submitted to the driver, awaiting its acknowledgment
#[derive(Debug, Clone)]
pub struct InFlightPublish {
    pub message_id: MessageId,
    pub topic: String,
    pub payload: Bytes,
    pub qos: QosLevel,
    pub submitted_at: Instant,
    pub acknowledged: bool,
}

/// Orchestrates one connect - publish - acknowledge - disconnect lifecycle
///
/// Owns the connection state machine and the in-flight table exclusively;
/// the driver's background task communicates only through the session event
/// channel, so no shared mutable state crosses threads unsynchronized.
/// Exactly one driver per invocation: `publish_once` consumes the
/// coordinator.
pub struct PublishCoordinator<D: SessionDriver> {
    driver: D,
    options: PublishOptions,
    state: ConnectionState,
    in_flight: HashMap<MessageId, InFlightPublish>,
}

impl PublishCoordinator<RumqttSession> {
    /// Coordinator over a real MQTT session for the given configuration
    pub fn over_mqtt(config: &TransportConfig, options: PublishOptions) -> Self {
        Self::with_driver(RumqttSession::new(config), options)
    }
}

impl<D: SessionDriver> PublishCoordinator<D> {
    pub fn with_driver(driver: D, options: PublishOptions) -> Self {
        Self {
            driver,
            options,
            state: ConnectionState::Disconnected,
            in_flight: HashMap::new(),
        }
    }

    /// Publish a single payload and report the outcome
    ///
    /// Validates the request, connects with a bounded wait, submits the
    /// publish, waits for its acknowledgment (QoS 0 acknowledges on submit),
    /// and always attempts a best-effort disconnect before returning.
    pub async fn publish_once(
        mut self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QosLevel,
    ) -> Outcome {
        let payload = payload.into();

        // Reject bad requests before any network activity
        if topic.is_empty() {
            return Outcome::transport_rejected("topic must not be empty");
        }
        if payload.len() > self.options.max_payload_bytes {
            return Outcome::transport_rejected(format!(
                "payload of {} bytes exceeds maximum of {} bytes",
                payload.len(),
                self.options.max_payload_bytes
            ));
        }

        let Some(mut events) = self.driver.take_events() else {
            return Outcome::connect_failed("session event stream unavailable");
        };
        let mut cancel = CancelSignal::new(self.options.cancel.take());

        if let Err(e) = self.driver.connect().await {
            return Outcome::connect_failed(format!("connect request failed: {e}"));
        }
        self.transition(ConnectionState::Connecting);

        if let Err(outcome) = self.await_connected(&mut events, &mut cancel).await {
            return self.finish(outcome, &mut events, &mut cancel).await;
        }

        let message_id = match self.driver.publish(topic, &payload, qos).await {
            Ok(id) => id,
            Err(e) => {
                let outcome = Outcome::connect_failed(format!("publish submission failed: {e}"));
                return self.finish(outcome, &mut events, &mut cancel).await;
            }
        };
        self.in_flight.insert(
            message_id,
            InFlightPublish {
                message_id,
                topic: topic.to_string(),
                payload: payload.clone(),
                qos,
                submitted_at: Instant::now(),
                acknowledged: false,
            },
        );
        debug!(target: "publish", %topic, %qos, message_id, "publish submitted");

        let outcome = self.await_acknowledgment(topic, message_id, qos, &mut events, &mut cancel).await;
        self.finish(outcome, &mut events, &mut cancel).await
    }

    /// Wait until the state machine reaches Connected, or fail
    async fn await_connected(
        &mut self,
        events: &mut mpsc::Receiver<SessionEvent>,
        cancel: &mut CancelSignal,
    ) -> Result<(), Outcome> {
        let deadline = Instant::now() + self.options.connect_timeout;
        loop {
            match next_event(events, deadline, cancel).await {
                Waited::Event(event) => {
                    self.apply(&event);
                    match &self.state {
                        ConnectionState::Connected => return Ok(()),
                        ConnectionState::Failed(reason) => {
                            return Err(Outcome::connect_failed(reason.clone()));
                        }
                        _ => continue,
                    }
                }
                Waited::TimedOut => {
                    return Err(Outcome::connect_failed(format!(
                        "timeout: no connection confirmation within {:?}",
                        self.options.connect_timeout
                    )));
                }
                Waited::Cancelled => {
                    return Err(Outcome::connect_failed("cancelled while connecting"));
                }
                Waited::StreamClosed => {
                    return Err(Outcome::connect_failed("session event stream closed"));
                }
            }
        }
    }

    /// Wait for the acknowledgment correlated to `message_id`
    async fn await_acknowledgment(
        &mut self,
        topic: &str,
        message_id: MessageId,
        qos: QosLevel,
        events: &mut mpsc::Receiver<SessionEvent>,
        cancel: &mut CancelSignal,
    ) -> Outcome {
        if !qos.expects_ack() {
            // QoS 0 carries no broker round-trip; submit is delivery
            self.in_flight.remove(&message_id);
            return Outcome::published(format!("submitted to {topic} with QoS 0"));
        }

        let deadline = Instant::now() + self.options.ack_timeout;
        loop {
            match next_event(events, deadline, cancel).await {
                Waited::Event(SessionEvent::PublishAcknowledged(id)) if id == message_id => {
                    if let Some(mut entry) = self.in_flight.remove(&id) {
                        entry.acknowledged = true;
                        info!(
                            target: "publish",
                            %topic,
                            message_id = id,
                            elapsed_ms = entry.submitted_at.elapsed().as_millis() as u64,
                            "publish acknowledged"
                        );
                    }
                    return Outcome::published(format!(
                        "message {id} acknowledged on {topic}"
                    ));
                }
                Waited::Event(SessionEvent::PublishAcknowledged(other)) => {
                    debug!(target: "publish", message_id = other, "discarding acknowledgment for unknown message id");
                }
                Waited::Event(event) => {
                    self.apply(&event);
                    if let ConnectionState::Failed(reason) = &self.state {
                        let reason = reason.clone();
                        self.in_flight.remove(&message_id);
                        return Outcome::publish_timed_out(format!(
                            "connection lost before acknowledgment: {reason}"
                        ));
                    }
                }
                Waited::TimedOut => {
                    self.in_flight.remove(&message_id);
                    return Outcome::publish_timed_out(format!(
                        "no acknowledgment for message {message_id} within {:?}",
                        self.options.ack_timeout
                    ));
                }
                Waited::Cancelled => {
                    self.in_flight.remove(&message_id);
                    return Outcome::publish_timed_out("cancelled while awaiting acknowledgment");
                }
                Waited::StreamClosed => {
                    self.in_flight.remove(&message_id);
                    return Outcome::publish_timed_out(
                        "session event stream closed before acknowledgment",
                    );
                }
            }
        }
    }

    /// Best-effort disconnect with a bounded grace period
    ///
    /// Never changes the primary outcome: a disconnect that does not finish
    /// within the grace period is treated as already torn down.
    async fn finish(
        mut self,
        outcome: Outcome,
        events: &mut mpsc::Receiver<SessionEvent>,
        cancel: &mut CancelSignal,
    ) -> Outcome {
        self.transition(ConnectionState::Disconnecting);

        if let Err(e) = self.driver.disconnect().await {
            debug!(target: "session", error = %e, "disconnect request failed, treating session as torn down");
            self.transition(ConnectionState::Disconnected);
            return outcome;
        }

        let deadline = Instant::now() + self.options.disconnect_grace;
        loop {
            match next_event(events, deadline, cancel).await {
                Waited::Event(SessionEvent::PublishAcknowledged(id)) => {
                    // A timed-out entry is never resurrected by a late ack
                    warn!(target: "publish", message_id = id, "late acknowledgment after wait ended, discarding");
                }
                Waited::Event(event) => {
                    self.apply(&event);
                    if self.state == ConnectionState::Disconnected {
                        break;
                    }
                }
                Waited::TimedOut | Waited::Cancelled | Waited::StreamClosed => {
                    debug!(target: "session", "disconnect grace period ended, treating session as torn down");
                    self.transition(ConnectionState::Disconnected);
                    break;
                }
            }
        }

        outcome
    }

    /// Feed a session event through the state machine
    fn apply(&mut self, event: &SessionEvent) {
        let next = next_state(&self.state, event);
        log_state_transition(&self.state, &next);
        self.state = next;
    }

    fn transition(&mut self, next: ConnectionState) {
        log_state_transition(&self.state, &next);
        self.state = next;
    }
}

/// Caller-initiated abort signal, absent by default
struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    fn new(rx: Option<watch::Receiver<bool>>) -> Self {
        Self { rx }
    }

    /// Resolves only when the caller raises the signal
    async fn triggered(&mut self) {
        loop {
            let Some(rx) = self.rx.as_mut() else {
                return pending().await;
            };
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without cancelling; it never will now
                self.rx = None;
            }
        }
    }
}

enum Waited {
    Event(SessionEvent),
    TimedOut,
    Cancelled,
    StreamClosed,
}

/// One bounded wait step on the session event stream
async fn next_event(
    events: &mut mpsc::Receiver<SessionEvent>,
    deadline: Instant,
    cancel: &mut CancelSignal,
) -> Waited {
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => Waited::TimedOut,
        _ = cancel.triggered() => Waited::Cancelled,
        event = events.recv() => match event {
            Some(event) => Waited::Event(event),
            None => Waited::StreamClosed,
        },
    }
}
