//! Event sink contract and delivery context
//!
//! The manager reports every lifecycle transition and operation outcome as a
//! [`SessionEvent`]. Events are marshalled through a single dispatcher task,
//! which is the only caller of [`EventSink`] methods; consumers therefore
//! never see concurrent callbacks even though completions originate on the
//! transport's own tasks. Delivery order matches emission order.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Lifecycle and operation outcome events, one per state transition
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Broker acknowledged the connect attempt
    Connected,
    /// Connect attempt was refused, timed out, or hit a transport fault
    ConnectionFailed { reason: String },
    /// Explicit disconnect completed and resources were released
    Disconnected,
    /// An established connection dropped without being asked to
    ConnectionLost { cause: String },
    /// Inbound message on a subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// Broker acknowledged delivery of a published message
    MessagePublished { topic: String },
    /// Broker granted the subscription
    SubscribeSuccess { topic: String },
    /// Subscription was rejected, or was attempted while not connected
    SubscribeFailed { topic: String, reason: String },
}

/// Consumer-facing callback interface, one method per [`SessionEvent`]
///
/// All methods default to no-ops so a consumer only implements the events it
/// cares about. Methods are invoked from a single task; implementations do
/// not need to be re-entrant.
pub trait EventSink: Send + Sync {
    fn on_connected(&self) {}
    fn on_connection_failed(&self, _reason: &str) {}
    fn on_disconnected(&self) {}
    fn on_connection_lost(&self, _cause: &str) {}
    fn on_message_received(&self, _topic: &str, _payload: &[u8]) {}
    fn on_message_published(&self, _topic: &str) {}
    fn on_subscribe_success(&self, _topic: &str) {}
    fn on_subscribe_failed(&self, _topic: &str, _reason: &str) {}
}

/// Spawn the dispatcher task that drains events into the sink.
///
/// Returns the sender side used by the manager and the task handle. The task
/// ends when every sender is dropped.
pub(crate) fn spawn_dispatcher(
    sink: Arc<dyn EventSink>,
) -> (mpsc::UnboundedSender<SessionEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            deliver(sink.as_ref(), event);
        }
        debug!("event dispatcher stopped");
    });
    (tx, handle)
}

fn deliver(sink: &dyn EventSink, event: SessionEvent) {
    match event {
        SessionEvent::Connected => sink.on_connected(),
        SessionEvent::ConnectionFailed { reason } => sink.on_connection_failed(&reason),
        SessionEvent::Disconnected => sink.on_disconnected(),
        SessionEvent::ConnectionLost { cause } => sink.on_connection_lost(&cause),
        SessionEvent::MessageReceived { topic, payload } => {
            sink.on_message_received(&topic, &payload)
        }
        SessionEvent::MessagePublished { topic } => sink.on_message_published(&topic),
        SessionEvent::SubscribeSuccess { topic } => sink.on_subscribe_success(&topic),
        SessionEvent::SubscribeFailed { topic, reason } => {
            sink.on_subscribe_failed(&topic, &reason)
        }
    }
}
