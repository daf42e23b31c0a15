//! Coordinator behavior tests against the scripted mock session
//!
//! Cover the publish lifecycle without a broker: QoS semantics, bounded
//! waits, pre-network rejection, cancellation and cleanup.

use pubonce::testing::{MockAck, MockConnect, MockSession};
use pubonce::{
    OutcomeStatus, PublishCoordinator, PublishOptions, QosLevel, TransportConfig, TrustMode,
};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::sync::watch;

fn fast_options() -> PublishOptions {
    PublishOptions {
        connect_timeout: Duration::from_millis(500),
        ack_timeout: Duration::from_millis(500),
        disconnect_grace: Duration::from_millis(200),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_qos0_publishes_without_waiting_for_ack() {
    // A driver that never acknowledges must not hold up QoS 0
    let session = MockSession::new(
        MockConnect::AcceptAfter(Duration::from_millis(5)),
        MockAck::Never,
    );
    let published = session.published_handle();
    let coordinator = PublishCoordinator::with_driver(session, fast_options());

    let started = Instant::now();
    let outcome = coordinator
        .publish_once("sensors/temp", b"21.5".to_vec(), QosLevel::AtMostOnce)
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Published);
    assert!(
        started.elapsed() < Duration::from_millis(400),
        "QoS 0 must return on submit, not wait out the ack timeout"
    );
    assert_eq!(published.lock().await.len(), 1);
}

#[tokio::test]
async fn test_qos1_acknowledged_publish_succeeds() {
    let session = MockSession::accepting();
    let published = session.published_handle();
    let coordinator = PublishCoordinator::with_driver(session, fast_options());

    let outcome = coordinator
        .publish_once("device/device1A/firmware", b"payload".to_vec(), QosLevel::AtLeastOnce)
        .await;

    assert!(outcome.is_published(), "unexpected outcome: {outcome:?}");
    let records = published.lock().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, "device/device1A/firmware");
    assert_eq!(records[0].1, b"payload");
}

#[tokio::test]
async fn test_qos2_completes_on_acknowledgment() {
    let session = MockSession::accepting();
    let coordinator = PublishCoordinator::with_driver(session, fast_options());

    let outcome = coordinator
        .publish_once("device/device1A/firmware", b"payload".to_vec(), QosLevel::ExactlyOnce)
        .await;

    assert!(outcome.is_published());
}

#[tokio::test]
async fn test_qos1_never_acknowledged_times_out_on_schedule() {
    let session = MockSession::new(
        MockConnect::AcceptAfter(Duration::from_millis(5)),
        MockAck::Never,
    );
    let options = PublishOptions {
        ack_timeout: Duration::from_millis(200),
        disconnect_grace: Duration::from_millis(100),
        ..fast_options()
    };
    let coordinator = PublishCoordinator::with_driver(session, options);

    let started = Instant::now();
    let outcome = coordinator
        .publish_once("sensors/temp", b"21.5".to_vec(), QosLevel::AtLeastOnce)
        .await;
    let elapsed = started.elapsed();

    assert_eq!(outcome.status, OutcomeStatus::PublishTimedOut);
    assert!(
        elapsed >= Duration::from_millis(200),
        "returned before the ack timeout elapsed: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_secs(2),
        "exceeded the ack timeout by far too much: {elapsed:?}"
    );
}

#[tokio::test]
async fn test_refused_connection_never_publishes() {
    let session = MockSession::new(
        MockConnect::Refuse("bad username or password".to_string()),
        MockAck::Immediate,
    );
    let published = session.published_handle();
    let disconnects = session.disconnect_calls_handle();
    let coordinator = PublishCoordinator::with_driver(session, fast_options());

    let outcome = coordinator
        .publish_once("sensors/temp", b"21.5".to_vec(), QosLevel::AtLeastOnce)
        .await;

    assert_eq!(outcome.status, OutcomeStatus::ConnectFailed);
    assert!(outcome.detail.contains("bad username"));
    assert!(published.lock().await.is_empty(), "must not publish after refusal");
    // Cleanup runs on failure paths too
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_silent_connect_times_out() {
    let session = MockSession::new(MockConnect::Silent, MockAck::Immediate);
    let published = session.published_handle();
    let options = PublishOptions {
        connect_timeout: Duration::from_millis(100),
        ..fast_options()
    };
    let coordinator = PublishCoordinator::with_driver(session, options);

    let outcome = coordinator
        .publish_once("sensors/temp", b"21.5".to_vec(), QosLevel::AtLeastOnce)
        .await;

    assert_eq!(outcome.status, OutcomeStatus::ConnectFailed);
    assert!(outcome.detail.contains("timeout"));
    assert!(published.lock().await.is_empty());
}

#[tokio::test]
async fn test_oversized_payload_rejected_before_any_network_call() {
    let session = MockSession::accepting();
    let connects = session.connect_calls_handle();
    let options = PublishOptions {
        max_payload_bytes: 16,
        ..fast_options()
    };
    let coordinator = PublishCoordinator::with_driver(session, options);

    let outcome = coordinator
        .publish_once("sensors/temp", vec![0u8; 64], QosLevel::AtLeastOnce)
        .await;

    assert_eq!(outcome.status, OutcomeStatus::TransportRejected);
    assert_eq!(
        connects.load(Ordering::SeqCst),
        0,
        "oversized payload must be rejected without touching the driver"
    );
}

#[tokio::test]
async fn test_empty_topic_rejected_before_any_network_call() {
    let session = MockSession::accepting();
    let connects = session.connect_calls_handle();
    let coordinator = PublishCoordinator::with_driver(session, fast_options());

    let outcome = coordinator
        .publish_once("", b"payload".to_vec(), QosLevel::AtLeastOnce)
        .await;

    assert_eq!(outcome.status, OutcomeStatus::TransportRejected);
    assert_eq!(connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_wrong_message_id_ack_is_discarded() {
    let session = MockSession::new(
        MockConnect::AcceptAfter(Duration::from_millis(5)),
        MockAck::WrongId,
    );
    let options = PublishOptions {
        ack_timeout: Duration::from_millis(150),
        ..fast_options()
    };
    let coordinator = PublishCoordinator::with_driver(session, options);

    let outcome = coordinator
        .publish_once("sensors/temp", b"21.5".to_vec(), QosLevel::AtLeastOnce)
        .await;

    assert_eq!(
        outcome.status,
        OutcomeStatus::PublishTimedOut,
        "an acknowledgment for a different message id must not complete the publish"
    );
}

#[tokio::test]
async fn test_late_ack_does_not_resurrect_timed_out_publish() {
    let session = MockSession::new(
        MockConnect::AcceptAfter(Duration::from_millis(5)),
        MockAck::AfterDelay(Duration::from_millis(300)),
    );
    let options = PublishOptions {
        ack_timeout: Duration::from_millis(100),
        disconnect_grace: Duration::from_millis(400),
        ..fast_options()
    };
    let coordinator = PublishCoordinator::with_driver(session, options);

    let outcome = coordinator
        .publish_once("sensors/temp", b"21.5".to_vec(), QosLevel::AtLeastOnce)
        .await;

    assert_eq!(outcome.status, OutcomeStatus::PublishTimedOut);
}

#[tokio::test]
async fn test_cancellation_cuts_ack_wait_short() {
    let session = MockSession::new(
        MockConnect::AcceptAfter(Duration::from_millis(5)),
        MockAck::Never,
    );
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let options = PublishOptions {
        ack_timeout: Duration::from_secs(30),
        disconnect_grace: Duration::from_millis(100),
        cancel: Some(cancel_rx),
        ..PublishOptions::default()
    };
    let coordinator = PublishCoordinator::with_driver(session, options);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = cancel_tx.send(true);
    });

    let started = Instant::now();
    let outcome = coordinator
        .publish_once("sensors/temp", b"21.5".to_vec(), QosLevel::AtLeastOnce)
        .await;

    assert_eq!(outcome.status, OutcomeStatus::PublishTimedOut);
    assert!(outcome.detail.contains("cancelled"));
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "cancellation must not wait out the full ack timeout"
    );
}

#[tokio::test]
async fn test_concurrent_invocations_are_independent() {
    let mut handles = Vec::new();
    for i in 0..8u8 {
        handles.push(tokio::spawn(async move {
            let session = MockSession::accepting();
            let published = session.published_handle();
            let coordinator = PublishCoordinator::with_driver(session, fast_options());

            let payload = vec![i; 8];
            let outcome = coordinator
                .publish_once(&format!("device/{i}/firmware"), payload.clone(), QosLevel::AtLeastOnce)
                .await;

            let records = published.lock().await;
            (outcome, records.len(), records[0].1.clone(), payload)
        }));
    }

    for handle in handles {
        let (outcome, count, recorded, expected) = handle.await.unwrap();
        assert!(outcome.is_published());
        assert_eq!(count, 1, "each invocation owns exactly its own publish");
        assert_eq!(recorded, expected);
    }
}

#[tokio::test]
async fn test_end_to_end_device_firmware_scenario() {
    // Config validates against the real constructor; transport is mocked
    let config = TransportConfig::new(
        "broker.test",
        8883,
        TrustMode::SystemDefault,
        None,
        "test-publisher",
    )
    .expect("valid configuration");
    assert_eq!(config.host(), "broker.test");

    let payload = serde_json::to_vec(&serde_json::json!([
        7,
        "Mike",
        "Green",
        "mgreen@gmail.com",
        "1225 Mile street",
        "pass2"
    ]))
    .unwrap();

    let session = MockSession::accepting();
    let published = session.published_handle();
    let coordinator = PublishCoordinator::with_driver(session, fast_options());

    let outcome = coordinator
        .publish_once("device/device1A/firmware", payload.clone(), QosLevel::AtLeastOnce)
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Published);
    let records = published.lock().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, "device/device1A/firmware");
    assert_eq!(records[0].1, payload);
    assert_eq!(records[0].2, QosLevel::AtLeastOnce);
}
