//! rumqttc-backed session driver
//!
//! Wraps the rumqttc v5 client behind the [`SessionDriver`] boundary. The
//! event loop runs on a background task and is translated into
//! [`SessionEvent`]s; the broker-assigned packet id of a submitted publish
//! is captured from the outgoing-publish event so acknowledgments can be
//! correlated.
//!
//! One-shot semantics: the first event-loop error terminates the session
//! instead of retrying. Retry policy belongs to the caller.

use super::{QosLevel, SessionDriver, SessionError};
use crate::config::{TransportConfig, TrustMode};
use crate::state::{MessageId, SessionEvent};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, Event, EventLoop, MqttOptions};
use rumqttc::{Outgoing, TlsConfiguration, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Event channel depth; a single publish session emits few events
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Bound on waiting for the event loop to surface the packet id
const MESSAGE_ID_WAIT: Duration = Duration::from_secs(5);

/// Session driver over the rumqttc v5 async client
pub struct RumqttSession {
    client: AsyncClient,
    event_loop: Option<EventLoop>,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: Option<mpsc::Receiver<SessionEvent>>,
    message_id_slot: Arc<Mutex<Option<oneshot::Sender<MessageId>>>>,
    loop_handle: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RumqttSession {
    pub fn new(config: &TransportConfig) -> Self {
        let options = configure_session_options(config);
        let (client, event_loop) = AsyncClient::new(options, 10);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            client,
            event_loop: Some(event_loop),
            events_tx,
            events_rx: Some(events_rx),
            message_id_slot: Arc::new(Mutex::new(None)),
            loop_handle: None,
            shutdown_tx,
            shutdown_rx,
        }
    }

    async fn run_event_loop(
        mut event_loop: EventLoop,
        events: mpsc::Sender<SessionEvent>,
        message_id_slot: Arc<Mutex<Option<oneshot::Sender<MessageId>>>>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut connected = false;
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!(target: "session", "shutdown signal received, stopping event loop");
                        break;
                    }
                }
                polled = event_loop.poll() => match polled {
                    Ok(event) => {
                        if let Event::Outgoing(Outgoing::Publish(pkid)) = &event {
                            if let Some(tx) = message_id_slot.lock().await.take() {
                                let _ = tx.send(*pkid);
                            }
                        }
                        if let Event::Outgoing(Outgoing::Disconnect) = &event {
                            let _ = events
                                .send(SessionEvent::Disconnected {
                                    reason: "client disconnect".to_string(),
                                })
                                .await;
                            break;
                        }
                        if let Event::Incoming(packet) = event {
                            if let Some(session_event) = route_incoming(&packet) {
                                if matches!(session_event, SessionEvent::Connected) {
                                    connected = true;
                                }
                                let terminal = matches!(
                                    session_event,
                                    SessionEvent::ConnectionRefused(_)
                                        | SessionEvent::Disconnected { .. }
                                );
                                let _ = events.send(session_event).await;
                                if terminal {
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        if connected {
                            warn!(target: "session", %reason, "session lost");
                        } else {
                            warn!(target: "session", %reason, "connection attempt failed");
                        }
                        let _ = events.send(SessionEvent::Disconnected { reason }).await;
                        break;
                    }
                }
            }
        }
        debug!(target: "session", "event loop stopped");
    }
}

#[async_trait]
impl SessionDriver for RumqttSession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        let event_loop = self.event_loop.take().ok_or_else(|| {
            SessionError::ConnectRequest("event loop already started".to_string().into())
        })?;

        info!(target: "session", "starting MQTT event loop");
        let handle = tokio::spawn(Self::run_event_loop(
            event_loop,
            self.events_tx.clone(),
            self.message_id_slot.clone(),
            self.shutdown_rx.clone(),
        ));
        self.loop_handle = Some(handle);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| SessionError::DisconnectRequest(Box::new(e)))?;
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QosLevel,
    ) -> Result<MessageId, SessionError> {
        if !qos.expects_ack() {
            // QoS 0 publishes carry no packet id on the wire
            self.client
                .publish(topic.to_string(), to_rumqtt_qos(qos), false, payload.to_vec())
                .await
                .map_err(|e| SessionError::PublishRequest(Box::new(e)))?;
            return Ok(0);
        }

        let (tx, rx) = oneshot::channel();
        *self.message_id_slot.lock().await = Some(tx);

        self.client
            .publish(topic.to_string(), to_rumqtt_qos(qos), false, payload.to_vec())
            .await
            .map_err(|e| SessionError::PublishRequest(Box::new(e)))?;

        match tokio::time::timeout(MESSAGE_ID_WAIT, rx).await {
            Ok(Ok(message_id)) => Ok(message_id),
            _ => Err(SessionError::MessageIdUnavailable),
        }
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events_rx.take()
    }
}

impl Drop for RumqttSession {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.loop_handle.take() {
            handle.abort();
        }
    }
}

/// Route an incoming packet to its session event (pure function)
fn route_incoming(packet: &Packet) -> Option<SessionEvent> {
    match packet {
        Packet::ConnAck(ack) => match ack.code {
            ConnectReturnCode::Success => Some(SessionEvent::Connected),
            code => Some(SessionEvent::ConnectionRefused(describe_connect_code(code))),
        },
        Packet::PubAck(ack) => Some(SessionEvent::PublishAcknowledged(ack.pkid)),
        // QoS 2 completes on PubComp; PubRec is an intermediate step
        Packet::PubComp(comp) => Some(SessionEvent::PublishAcknowledged(comp.pkid)),
        Packet::Disconnect(_) => Some(SessionEvent::Disconnected {
            reason: "broker disconnected".to_string(),
        }),
        other => {
            debug!(target: "session", "event: {other:?}");
            None
        }
    }
}

/// Human-readable text for broker connect refusals
fn describe_connect_code(code: ConnectReturnCode) -> String {
    match code {
        ConnectReturnCode::BadUserNamePassword => "bad username or password".to_string(),
        ConnectReturnCode::NotAuthorized => "not authorized".to_string(),
        ConnectReturnCode::ServerUnavailable => "server unavailable".to_string(),
        ConnectReturnCode::ClientIdentifierNotValid => "invalid client identifier".to_string(),
        ConnectReturnCode::UnsupportedProtocolVersion => {
            "unsupported protocol version".to_string()
        }
        other => format!("{other:?}"),
    }
}

fn to_rumqtt_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Build rumqttc options from a validated transport configuration
fn configure_session_options(config: &TransportConfig) -> MqttOptions {
    // Suffix the configured identity with a timestamp so a lingering broker
    // session from a previous run cannot collide with this one
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let client_id = format!("{}-{timestamp}", config.client_id());

    let mut options = MqttOptions::new(client_id, config.host(), config.port());

    let transport = match config.trust() {
        TrustMode::SystemDefault => Transport::tls_with_default_config(),
        TrustMode::PinnedCertificateFile(_) => {
            // Bundle bytes were loaded and validated at config construction
            let ca = config.ca_bundle().map(<[u8]>::to_vec).unwrap_or_default();
            Transport::Tls(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            })
        }
    };
    options.set_transport(transport);

    if let Some(creds) = config.credentials() {
        options.set_credentials(&creds.username, &creds.secret);
    }

    options.set_keep_alive(Duration::from_secs(60));
    options.set_max_packet_size(Some(256 * 1024));

    options
}
