//! Connection identity and the live connection handle
//!
//! A [`ConnectionIdentity`] is minted fresh for every connect attempt: the
//! client identifier carries a time-derived suffix plus a process-wide
//! sequence number, so a broker that rejects duplicate identifiers can never
//! block a reconnect racing a slow prior disconnect.
//!
//! A [`ConnectionHandle`] wraps one rumqttc client and its event loop task.
//! It is immutable for its lifetime and replaced, never mutated, on
//! reconnect. The handle leaves the session exactly once (`Option::take`
//! under the session lock), which makes resource release idempotent across
//! the explicit-disconnect, connect-failure and connection-lost paths.

use crate::config::{SessionConfig, KEEP_ALIVE};
use crate::error::SessionError;
use crate::session::registry::QosLevel;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{AsyncClient, MqttOptions};
use rumqttc::Transport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Result of issuing a request to the transport client
pub type TransportResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dispatch surface of the transport client
///
/// Everything the manager issues against a live connection goes through this
/// trait, so tests can substitute a recording client for the real transport.
/// The issue methods are synchronous (they only queue with the transport);
/// acknowledgements arrive later on the event loop.
#[async_trait]
pub trait DispatchClient: Send + Sync + std::fmt::Debug {
    fn subscribe(&self, topic: &str, qos: QosLevel) -> TransportResult;
    fn unsubscribe(&self, topic: &str) -> TransportResult;
    fn publish(&self, topic: &str, qos: QosLevel, retain: bool, payload: Bytes) -> TransportResult;
    async fn disconnect(&self) -> TransportResult;
}

#[async_trait]
impl DispatchClient for AsyncClient {
    fn subscribe(&self, topic: &str, qos: QosLevel) -> TransportResult {
        self.try_subscribe(topic, qos.into()).map_err(Into::into)
    }

    fn unsubscribe(&self, topic: &str) -> TransportResult {
        self.try_unsubscribe(topic).map_err(Into::into)
    }

    fn publish(&self, topic: &str, qos: QosLevel, retain: bool, payload: Bytes) -> TransportResult {
        self.try_publish(topic, qos.into(), retain, payload)
            .map_err(Into::into)
    }

    async fn disconnect(&self) -> TransportResult {
        AsyncClient::disconnect(self).await.map_err(Into::into)
    }
}

/// Process-wide attempt counter; two attempts in the same millisecond still
/// get distinct client ids.
static ATTEMPT_SEQ: AtomicU64 = AtomicU64::new(0);

const DEFAULT_CLIENT_ID_BASE: &str = "session";
const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

/// Broker address and per-attempt client identity
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionIdentity {
    host: String,
    port: u16,
    tls: bool,
    client_id: String,
}

impl ConnectionIdentity {
    /// Mint the identity for the next connect attempt.
    pub fn next(config: &SessionConfig) -> Result<Self, SessionError> {
        let url = url::Url::parse(&config.broker_url)
            .map_err(|_| SessionError::InvalidBrokerUrl(config.broker_url.clone()))?;

        let tls = match url.scheme() {
            "tcp" | "mqtt" => false,
            "ssl" | "mqtts" => true,
            _ => return Err(SessionError::InvalidBrokerUrl(config.broker_url.clone())),
        };
        let host = url
            .host_str()
            .ok_or_else(|| SessionError::InvalidBrokerUrl(config.broker_url.clone()))?
            .to_string();
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let seq = ATTEMPT_SEQ.fetch_add(1, Ordering::Relaxed);
        let base = if config.client_id.is_empty() {
            DEFAULT_CLIENT_ID_BASE
        } else {
            config.client_id.as_str()
        };
        let client_id = format!("{base}-{millis}-{seq}");

        Ok(Self {
            host,
            port,
            tls,
            client_id,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Transport options for this attempt: clean session, fixed keep-alive,
    /// no transport-level auto-reconnect (the manager owns reconnect policy).
    pub fn mqtt_options(&self, config: &SessionConfig) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), &self.host, self.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_start(true);
        if self.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        if let Some(username) = config.username() {
            options.set_credentials(username, config.password().unwrap_or_default());
        }
        options
    }
}

/// One live connection to the broker
#[derive(Debug)]
pub struct ConnectionHandle {
    identity: ConnectionIdentity,
    client: Arc<dyn DispatchClient>,
    shutdown_tx: watch::Sender<bool>,
    event_loop_task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    pub fn new(
        identity: ConnectionIdentity,
        client: Arc<dyn DispatchClient>,
        shutdown_tx: watch::Sender<bool>,
        event_loop_task: JoinHandle<()>,
    ) -> Self {
        Self {
            identity,
            client,
            shutdown_tx,
            event_loop_task: Some(event_loop_task),
        }
    }

    pub fn client(&self) -> Arc<dyn DispatchClient> {
        Arc::clone(&self.client)
    }

    /// Full teardown from outside the event loop: signal the task, issue the
    /// wire disconnect best-effort, then wait briefly for the task to stop.
    /// Resources are released whether or not the wire disconnect succeeds.
    pub async fn teardown(mut self) -> Result<(), SessionError> {
        let _ = self.shutdown_tx.send(true);

        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| SessionError::DisconnectFailed(e.to_string()));

        if let Some(task) = self.event_loop_task.take() {
            match tokio::time::timeout(TEARDOWN_GRACE, task).await {
                Ok(Ok(())) => debug!(client_id = %self.identity.client_id, "event loop stopped"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(error = %e, "event loop task ended with error")
                }
                Err(_) => warn!("event loop did not stop in time; detaching"),
                _ => {}
            }
        }

        result
    }

    /// Detach the event loop task handle. Used when release runs on the event
    /// loop task itself, which cannot wait for its own completion.
    pub fn detach_task(&mut self) {
        self.event_loop_task = None;
    }

    /// Release without waiting: signal shutdown and drop the transport client.
    pub fn release(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.event_loop_task.take() {
            drop(task);
        }
        debug!(client_id = %self.identity.client_id, "connection handle released");
    }

    /// Synchronous last-resort release for drop paths.
    pub fn abort(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}
