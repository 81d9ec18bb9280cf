//! Session manager: one logical broker connection and its event loop
//!
//! The manager owns the connection handle, drives the lifecycle state
//! machine, and correlates acknowledgements back to the operations that
//! caused them. Lifecycle operations (connect, disconnect) are serialized
//! through a single-flight lock; dispatch operations (subscribe,
//! unsubscribe, publish) only take the session data lock briefly and never
//! block on the network.
//!
//! Locking rule: teardown and task joins never run while the session lock is
//! held. The event loop task takes that same lock on every acknowledgement,
//! so waiting for it under the lock would deadlock.

use crate::config::{SessionConfig, CONNECT_TIMEOUT};
use crate::error::{SessionError, SessionResult};
use crate::events::{spawn_dispatcher, EventSink, SessionEvent};
use crate::session::connection::{ConnectionHandle, ConnectionIdentity};
use crate::session::pending::PendingOps;
use crate::session::registry::{QosLevel, SubscriptionRegistry};
use crate::session::router::{route_event, EventRoute};
use crate::session::state::{
    can_publish, can_subscribe, can_unsubscribe, next_state, LifecycleEvent, SessionState,
};
use bytes::Bytes;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Mutable session data guarded by one lock
#[derive(Debug, Default)]
struct Session {
    /// Bumped on every connect attempt; event loop tasks from a superseded
    /// attempt compare against it and drop their terminal events
    generation: u64,
    handle: Option<ConnectionHandle>,
    registry: SubscriptionRegistry,
    pending: PendingOps,
}

/// Everything the event loop task needs from the manager
struct EventLoopCtx {
    session: Arc<Mutex<Session>>,
    generation: u64,
    state_tx: watch::Sender<SessionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

/// Owner of one logical broker connection
pub struct SessionManager {
    config: SessionConfig,
    session: Arc<Mutex<Session>>,
    /// Single-flight guard for connect and disconnect
    ops: Mutex<()>,
    state_tx: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    dispatcher: JoinHandle<()>,
}

impl SessionManager {
    /// Create a manager in the `Disconnected` state. No network activity
    /// happens until [`connect`](Self::connect) is called.
    pub fn new(config: SessionConfig, sink: Arc<dyn EventSink>) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (events, dispatcher) = spawn_dispatcher(sink);
        Self {
            config,
            session: Arc::new(Mutex::new(Session::default())),
            ops: Mutex::new(()),
            state_tx,
            state_rx,
            events,
            dispatcher,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Watch lifecycle state changes without polling.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Topics the broker has acknowledged, with their delivery level.
    pub async fn active_subscriptions(&self) -> Vec<(String, QosLevel)> {
        self.session.lock().await.registry.snapshot()
    }

    /// Establish a fresh connection to the broker.
    ///
    /// Any existing connection is torn down first, in order, so the broker
    /// never sees two live sessions from this manager. Returns once the
    /// connect attempt is issued; the outcome arrives as a `Connected` or
    /// `ConnectionFailed` event (and through [`watch_state`](Self::watch_state)).
    pub async fn connect(&self) -> SessionResult<()> {
        let _flight = self.ops.lock().await;

        let prior = {
            let mut session = self.session.lock().await;
            session.registry.clear();
            session.pending.clear();
            session.handle.take()
        };
        if let Some(handle) = prior {
            self.advance(&LifecycleEvent::DisconnectRequested);
            if let Err(e) = handle.teardown().await {
                warn!(error = %e, "teardown of prior connection reported an error");
            }
            self.advance(&LifecycleEvent::TeardownComplete);
        }

        let identity = ConnectionIdentity::next(&self.config)?;
        info!(client_id = %identity.client_id(), "connecting to broker");
        let options = identity.mqtt_options(&self.config);
        let (client, event_loop) = AsyncClient::new(options, 10);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut session = self.session.lock().await;
        session.generation += 1;
        let ctx = EventLoopCtx {
            session: Arc::clone(&self.session),
            generation: session.generation,
            state_tx: self.state_tx.clone(),
            events: self.events.clone(),
        };
        // State must read Connecting before the event loop can observe the
        // broker's acknowledgement.
        self.advance(&LifecycleEvent::ConnectRequested);
        let task = tokio::spawn(run_event_loop(event_loop, ctx, shutdown_rx));
        session.handle = Some(ConnectionHandle::new(
            identity,
            Arc::new(client),
            shutdown_tx,
            task,
        ));
        Ok(())
    }

    /// Tear down the current connection and release its resources.
    ///
    /// Quiet no-op when already disconnected. A failed wire disconnect is
    /// logged, not surfaced; resources are released either way and the
    /// `Disconnected` event still fires.
    pub async fn disconnect(&self) -> SessionResult<()> {
        let _flight = self.ops.lock().await;

        let handle = {
            let mut session = self.session.lock().await;
            session.registry.clear();
            session.pending.clear();
            session.handle.take()
        };
        let Some(handle) = handle else {
            debug!("disconnect requested with no live connection");
            return Ok(());
        };

        self.advance(&LifecycleEvent::DisconnectRequested);
        if let Err(e) = handle.teardown().await {
            warn!(error = %e, "wire disconnect failed; resources released anyway");
        }
        self.advance(&LifecycleEvent::TeardownComplete);
        self.emit(SessionEvent::Disconnected);
        Ok(())
    }

    /// Replace the active subscription set with a single subscription.
    ///
    /// Previously registered topics are unsubscribed first. The new topic is
    /// registered only when the broker grants it; the outcome arrives as a
    /// `SubscribeSuccess` or `SubscribeFailed` event.
    pub async fn subscribe(&self, topic: &str, qos: QosLevel) -> SessionResult<()> {
        let mut session = self.session.lock().await;
        let state = self.state();
        let handle = session.handle.as_ref().filter(|_| can_subscribe(state));
        let Some(handle) = handle else {
            let reason = format!("not connected (current state: {state:?})");
            self.emit(SessionEvent::SubscribeFailed {
                topic: topic.to_string(),
                reason,
            });
            return Err(SessionError::NotConnected { state });
        };
        let client = handle.client();

        for old in session.registry.drain() {
            match client.unsubscribe(&old) {
                Ok(()) => session.pending.push_unsubscribe(old),
                Err(e) => warn!(topic = %old, error = %e, "failed to issue replacement unsubscribe"),
            }
        }

        match client.subscribe(topic, qos) {
            Ok(()) => {
                debug!(%topic, qos = qos.as_u8(), "subscribe issued");
                session.pending.push_subscribe(topic, qos);
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                self.emit(SessionEvent::SubscribeFailed {
                    topic: topic.to_string(),
                    reason: reason.clone(),
                });
                Err(SessionError::SubscribeFailed {
                    topic: topic.to_string(),
                    reason,
                })
            }
        }
    }

    /// Remove one topic from the active subscription set.
    ///
    /// Fire and forget: the topic leaves the registry as soon as the request
    /// is issued, and a failure to issue it is logged rather than surfaced.
    pub async fn unsubscribe(&self, topic: &str) -> SessionResult<()> {
        let mut session = self.session.lock().await;
        let state = self.state();
        let handle = session.handle.as_ref().filter(|_| can_unsubscribe(state));
        let Some(handle) = handle else {
            warn!(%topic, ?state, "unsubscribe rejected: not connected");
            return Err(SessionError::NotConnected { state });
        };
        let client = handle.client();

        session.registry.remove(topic);
        match client.unsubscribe(topic) {
            Ok(()) => session.pending.push_unsubscribe(topic.to_string()),
            Err(e) => warn!(%topic, error = %e, "failed to issue unsubscribe"),
        }
        Ok(())
    }

    /// Publish a message.
    ///
    /// Returns once the message is queued with the transport. Delivery
    /// confirmation arrives as a `MessagePublished` event when the broker
    /// acknowledges the message (immediately on queueing for QoS 0).
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QosLevel,
        retained: bool,
    ) -> SessionResult<()> {
        let mut session = self.session.lock().await;
        let state = self.state();
        let handle = session.handle.as_ref().filter(|_| can_publish(state));
        let Some(handle) = handle else {
            warn!(%topic, ?state, "publish rejected: not connected");
            return Err(SessionError::NotConnected { state });
        };
        let client = handle.client();

        client
            .publish(topic, qos, retained, payload.into())
            .map_err(|e| {
                warn!(%topic, error = %e, "failed to issue publish");
                SessionError::PublishFailed(e)
            })?;
        debug!(%topic, qos = qos.as_u8(), retained, "publish issued");
        session.pending.push_publish(topic, qos);
        Ok(())
    }

    fn advance(&self, event: &LifecycleEvent) {
        self.state_tx
            .send_modify(|state| *state = next_state(*state, event));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Ok(mut session) = self.session.try_lock() {
            if let Some(handle) = session.handle.take() {
                handle.abort();
            }
        }
        self.dispatcher.abort();
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("broker_url", &self.config.broker_url)
            .finish()
    }
}

/// Drive one connection's transport events until shutdown or a fault.
///
/// Connect attempts that receive no acknowledgement within the connect
/// timeout are declared failed here; the transport itself would keep
/// retrying forever.
async fn run_event_loop(
    mut event_loop: EventLoop,
    ctx: EventLoopCtx,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut awaiting_connack = true;
    let connack_deadline = Instant::now() + CONNECT_TIMEOUT;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    debug!("event loop shutting down");
                    break;
                }
            }
            _ = sleep_until(connack_deadline), if awaiting_connack => {
                fail_connection(&ctx, "connect timed out waiting for broker acknowledgement").await;
                break;
            }
            polled = event_loop.poll() => match polled {
                Ok(event) => match route_event(&event) {
                    EventRoute::ConnectionAccepted => {
                        awaiting_connack = false;
                        let session = ctx.session.lock().await;
                        // A missing handle means a disconnect beat the ConnAck.
                        if session.generation != ctx.generation || session.handle.is_none() {
                            break;
                        }
                        advance_state(&ctx.state_tx, &LifecycleEvent::ConnectionAccepted);
                        let _ = ctx.events.send(SessionEvent::Connected);
                    }
                    EventRoute::ConnectionRefused { reason } => {
                        fail_connection(&ctx, &reason).await;
                        break;
                    }
                    EventRoute::MessageReceived { topic, payload, retain } => {
                        // Messages racing a shutdown are dropped, not delivered
                        // after the consumer asked to disconnect.
                        if !*shutdown_rx.borrow() {
                            debug!(%topic, retain, len = payload.len(), "message received");
                            let _ = ctx.events.send(SessionEvent::MessageReceived { topic, payload });
                        }
                    }
                    EventRoute::SubscribeBound { pkid } => {
                        handle_subscribe_bound(&ctx, pkid).await;
                    }
                    EventRoute::SubscribeResult { pkid, failure } => {
                        handle_suback(&ctx, pkid, failure).await;
                    }
                    EventRoute::UnsubscribeAcked { pkid } => {
                        handle_unsuback(&ctx, pkid).await;
                    }
                    EventRoute::PublishBound { pkid } => {
                        handle_publish_bound(&ctx, pkid).await;
                    }
                    EventRoute::PublishCompleted { pkid } => {
                        handle_publish_completed(&ctx, pkid).await;
                    }
                    EventRoute::BrokerDisconnected { reason } => {
                        if awaiting_connack {
                            fail_connection(&ctx, &reason).await;
                        } else {
                            lose_connection(&ctx, &reason).await;
                        }
                        break;
                    }
                    EventRoute::Ignored => {}
                },
                Err(e) => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    let reason = e.to_string();
                    if awaiting_connack {
                        fail_connection(&ctx, &reason).await;
                    } else {
                        lose_connection(&ctx, &reason).await;
                    }
                    break;
                }
            }
        }
    }
}

async fn handle_subscribe_bound(ctx: &EventLoopCtx, pkid: u16) {
    let mut session = ctx.session.lock().await;
    if session.generation == ctx.generation {
        session.pending.bind_subscribe(pkid);
    }
}

/// Confirm or reject the subscribe bound to `pkid`.
///
/// A grant for a superseded subscribe is undone on the broker instead of
/// registered, so a newer subscribe can never inherit an older ack.
async fn handle_suback(ctx: &EventLoopCtx, pkid: u16, failure: Option<String>) {
    let mut session = ctx.session.lock().await;
    if session.generation != ctx.generation {
        return;
    }
    let Some(token) = session.pending.take_subscribe(pkid) else {
        debug!(pkid, "subscribe acknowledgement with no pending token");
        return;
    };
    if token.superseded {
        if failure.is_none() {
            debug!(topic = %token.topic, "replaced subscribe granted late; undoing");
            let client = session.handle.as_ref().map(|handle| handle.client());
            if let Some(client) = client {
                match client.unsubscribe(&token.topic) {
                    Ok(()) => session.pending.push_unsubscribe(token.topic),
                    Err(e) => warn!(error = %e, "failed to undo replaced subscription"),
                }
            }
        }
        return;
    }
    match failure {
        None => {
            session.registry.confirm(token.topic.clone(), token.qos);
            info!(topic = %token.topic, "subscription granted");
            let _ = ctx.events.send(SessionEvent::SubscribeSuccess { topic: token.topic });
        }
        Some(reason) => {
            warn!(topic = %token.topic, %reason, "subscription rejected");
            let _ = ctx.events.send(SessionEvent::SubscribeFailed {
                topic: token.topic,
                reason,
            });
        }
    }
}

async fn handle_unsuback(ctx: &EventLoopCtx, pkid: u16) {
    let mut session = ctx.session.lock().await;
    if session.generation == ctx.generation {
        if let Some(topic) = session.pending.pop_unsubscribe() {
            debug!(%topic, pkid, "unsubscribe acknowledged");
        }
    }
}

async fn handle_publish_bound(ctx: &EventLoopCtx, pkid: u16) {
    let mut session = ctx.session.lock().await;
    if session.generation == ctx.generation {
        if let Some(topic) = session.pending.bind_publish(pkid) {
            let _ = ctx.events.send(SessionEvent::MessagePublished { topic });
        }
    }
}

async fn handle_publish_completed(ctx: &EventLoopCtx, pkid: u16) {
    let mut session = ctx.session.lock().await;
    if session.generation == ctx.generation {
        if let Some(topic) = session.pending.complete_publish(pkid) {
            debug!(%topic, pkid, "publish acknowledged");
            let _ = ctx.events.send(SessionEvent::MessagePublished { topic });
        }
    }
}

/// Release this task's handle after a fault.
///
/// Returns false when a newer connect attempt has superseded this task; its
/// terminal event must then be dropped.
async fn release_after_fault(ctx: &EventLoopCtx) -> bool {
    let mut session = ctx.session.lock().await;
    if session.generation != ctx.generation {
        debug!("fault on a superseded connection; dropping");
        return false;
    }
    // An absent handle means an explicit disconnect or reconnect already
    // took ownership of the release; this task's terminal event is stale.
    let Some(mut handle) = session.handle.take() else {
        return false;
    };
    // This runs on the event loop task itself; it cannot join itself.
    handle.detach_task();
    handle.release();
    session.registry.clear();
    session.pending.clear();
    true
}

async fn fail_connection(ctx: &EventLoopCtx, reason: &str) {
    if release_after_fault(ctx).await {
        advance_state(
            &ctx.state_tx,
            &LifecycleEvent::ConnectionRefused(reason.to_string()),
        );
        let _ = ctx.events.send(SessionEvent::ConnectionFailed {
            reason: reason.to_string(),
        });
    }
}

async fn lose_connection(ctx: &EventLoopCtx, cause: &str) {
    if release_after_fault(ctx).await {
        advance_state(
            &ctx.state_tx,
            &LifecycleEvent::ConnectionLost(cause.to_string()),
        );
        let _ = ctx.events.send(SessionEvent::ConnectionLost {
            cause: cause.to_string(),
        });
    }
}

fn advance_state(state_tx: &watch::Sender<SessionState>, event: &LifecycleEvent) {
    state_tx.send_modify(|state| *state = next_state(*state, event));
}
