//! Mock event sinks and transport clients for tests

use crate::events::{EventSink, SessionEvent};
use crate::session::connection::{DispatchClient, TransportResult};
use crate::session::registry::QosLevel;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;
use std::time::Duration;

/// Sink that records every event it receives, for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far, in delivery order.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Poll until `predicate` holds for the recorded events or `timeout`
    /// elapses. Returns whether the predicate was satisfied.
    pub async fn wait_for<F>(&self, predicate: F, timeout: Duration) -> bool
    where
        F: Fn(&[SessionEvent]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(&self.events()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn record(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl EventSink for RecordingSink {
    fn on_connected(&self) {
        self.record(SessionEvent::Connected);
    }

    fn on_connection_failed(&self, reason: &str) {
        self.record(SessionEvent::ConnectionFailed {
            reason: reason.to_string(),
        });
    }

    fn on_disconnected(&self) {
        self.record(SessionEvent::Disconnected);
    }

    fn on_connection_lost(&self, cause: &str) {
        self.record(SessionEvent::ConnectionLost {
            cause: cause.to_string(),
        });
    }

    fn on_message_received(&self, topic: &str, payload: &[u8]) {
        self.record(SessionEvent::MessageReceived {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload),
        });
    }

    fn on_message_published(&self, topic: &str) {
        self.record(SessionEvent::MessagePublished {
            topic: topic.to_string(),
        });
    }

    fn on_subscribe_success(&self, topic: &str) {
        self.record(SessionEvent::SubscribeSuccess {
            topic: topic.to_string(),
        });
    }

    fn on_subscribe_failed(&self, topic: &str, reason: &str) {
        self.record(SessionEvent::SubscribeFailed {
            topic: topic.to_string(),
            reason: reason.to_string(),
        });
    }
}

/// One request issued against a [`MockClient`]
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCall {
    Subscribe {
        topic: String,
        qos: QosLevel,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        qos: QosLevel,
        retain: bool,
        payload: Bytes,
    },
    Disconnect,
}

/// Transport client that records every request and reports success, for
/// driving the dispatch path without a broker.
#[derive(Debug, Default)]
pub struct MockClient {
    calls: Mutex<Vec<ClientCall>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the requests issued so far, in issue order.
    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: ClientCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DispatchClient for MockClient {
    fn subscribe(&self, topic: &str, qos: QosLevel) -> TransportResult {
        self.record(ClientCall::Subscribe {
            topic: topic.to_string(),
            qos,
        });
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> TransportResult {
        self.record(ClientCall::Unsubscribe {
            topic: topic.to_string(),
        });
        Ok(())
    }

    fn publish(&self, topic: &str, qos: QosLevel, retain: bool, payload: Bytes) -> TransportResult {
        self.record(ClientCall::Publish {
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        });
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult {
        self.record(ClientCall::Disconnect);
        Ok(())
    }
}
