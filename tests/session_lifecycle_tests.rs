//! Lifecycle and dispatch guard tests that run without a broker
//!
//! Connection attempts target `tcp://127.0.0.1:1`, which refuses
//! immediately, so failure paths are exercised deterministically.

use mqtt_session::session::ConnectionIdentity;
use mqtt_session::testing::RecordingSink;
use mqtt_session::{
    QosLevel, SessionConfig, SessionError, SessionEvent, SessionManager, SessionState,
};
use std::sync::Arc;
use std::time::Duration;

fn unreachable_config() -> SessionConfig {
    SessionConfig {
        broker_url: "tcp://127.0.0.1:1".to_string(),
        ..Default::default()
    }
}

fn manager_with_sink(config: SessionConfig) -> (SessionManager, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    (SessionManager::new(config, sink.clone()), sink)
}

#[tokio::test]
async fn test_manager_starts_disconnected() {
    let (manager, sink) = manager_with_sink(SessionConfig::default());

    assert_eq!(manager.state(), SessionState::Disconnected);
    assert!(!manager.is_connected());
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_subscribe_requires_connection() {
    let (manager, sink) = manager_with_sink(SessionConfig::default());

    let result = manager.subscribe("test/topic", QosLevel::AtLeastOnce).await;
    assert!(matches!(
        result,
        Err(SessionError::NotConnected {
            state: SessionState::Disconnected
        })
    ));

    // The rejection is also reported through the sink.
    let reported = sink
        .wait_for(
            |events| {
                events.iter().any(|e| {
                    matches!(
                        e,
                        SessionEvent::SubscribeFailed { topic, reason }
                            if topic == "test/topic" && reason.contains("not connected")
                    )
                })
            },
            Duration::from_secs(1),
        )
        .await;
    assert!(reported);
    assert!(manager.active_subscriptions().await.is_empty());
}

#[tokio::test]
async fn test_publish_requires_connection() {
    let (manager, sink) = manager_with_sink(SessionConfig::default());

    let result = manager
        .publish("test/topic", "Hello MQTT!", QosLevel::AtLeastOnce, false)
        .await;
    assert!(matches!(result, Err(SessionError::NotConnected { .. })));

    // Publish rejections surface only as errors, never as events.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_unsubscribe_requires_connection() {
    let (manager, sink) = manager_with_sink(SessionConfig::default());

    let result = manager.unsubscribe("test/topic").await;
    assert!(matches!(result, Err(SessionError::NotConnected { .. })));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_connect_failure_reports_and_resets() {
    let (manager, sink) = manager_with_sink(unreachable_config());

    manager.connect().await.unwrap();
    // A refusal from the closed port may land before this assertion runs.
    assert!(matches!(
        manager.state(),
        SessionState::Connecting | SessionState::Disconnected
    ));

    let failed = sink
        .wait_for(
            |events| {
                events
                    .iter()
                    .any(|e| matches!(e, SessionEvent::ConnectionFailed { .. }))
            },
            Duration::from_secs(5),
        )
        .await;
    assert!(failed, "closed port should produce ConnectionFailed");
    assert_eq!(manager.state(), SessionState::Disconnected);

    // Exactly one terminal event for one attempt.
    let failures = sink
        .events()
        .iter()
        .filter(|e| matches!(e, SessionEvent::ConnectionFailed { .. }))
        .count();
    assert_eq!(failures, 1);
}

#[tokio::test]
async fn test_failed_connection_allows_reconnect() {
    let (manager, sink) = manager_with_sink(unreachable_config());

    manager.connect().await.unwrap();
    sink.wait_for(
        |events| {
            events
                .iter()
                .any(|e| matches!(e, SessionEvent::ConnectionFailed { .. }))
        },
        Duration::from_secs(5),
    )
    .await;

    // A second attempt starts cleanly from Disconnected.
    manager.connect().await.unwrap();

    let twice_failed = sink
        .wait_for(
            |events| {
                events
                    .iter()
                    .filter(|e| matches!(e, SessionEvent::ConnectionFailed { .. }))
                    .count()
                    == 2
            },
            Duration::from_secs(5),
        )
        .await;
    assert!(twice_failed);
    assert_eq!(manager.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (manager, sink) = manager_with_sink(SessionConfig::default());

    manager.disconnect().await.unwrap();
    manager.disconnect().await.unwrap();
    manager.disconnect().await.unwrap();

    assert_eq!(manager.state(), SessionState::Disconnected);
    tokio::time::sleep(Duration::from_millis(50)).await;
    // A disconnect with nothing to release emits nothing.
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_disconnect_during_connect_attempt_releases() {
    let (manager, sink) = manager_with_sink(unreachable_config());

    manager.connect().await.unwrap();
    manager.disconnect().await.unwrap();

    assert_eq!(manager.state(), SessionState::Disconnected);
    // Either the explicit disconnect wins the race or the refused attempt
    // does; exactly one terminal event arrives either way.
    let settled = sink
        .wait_for(
            |events| {
                events.iter().any(|e| {
                    matches!(
                        e,
                        SessionEvent::Disconnected | SessionEvent::ConnectionFailed { .. }
                    )
                })
            },
            Duration::from_secs(5),
        )
        .await;
    assert!(settled);
}

#[tokio::test]
async fn test_invalid_broker_url_fails_fast() {
    let (manager, sink) = manager_with_sink(SessionConfig {
        broker_url: "ftp://broker.example.com".to_string(),
        ..Default::default()
    });

    let result = manager.connect().await;
    assert!(matches!(result, Err(SessionError::InvalidBrokerUrl(_))));
    assert_eq!(manager.state(), SessionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_state_watcher_sees_transitions() {
    let (manager, _sink) = manager_with_sink(unreachable_config());
    let mut state_rx = manager.watch_state();

    assert_eq!(*state_rx.borrow(), SessionState::Disconnected);

    manager.connect().await.unwrap();

    let back = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *state_rx.borrow_and_update() == SessionState::Disconnected {
                break;
            }
            state_rx.changed().await.unwrap();
        }
    })
    .await;
    assert!(back.is_ok(), "failed attempt should return to Disconnected");
}

#[test]
fn test_each_connect_attempt_gets_a_fresh_client_id() {
    let config = SessionConfig {
        client_id: "device".to_string(),
        ..Default::default()
    };

    let a = ConnectionIdentity::next(&config).unwrap();
    let b = ConnectionIdentity::next(&config).unwrap();

    assert!(a.client_id().starts_with("device-"));
    assert!(b.client_id().starts_with("device-"));
    assert_ne!(a.client_id(), b.client_id());
}
