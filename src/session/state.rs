//! Pure session lifecycle state machine
//!
//! The four states and their transitions are the authority on what the
//! manager may do at any instant. The manager feeds every transition through
//! [`next_state`]; nothing else mutates the state.

use tracing::{info, warn};

/// Lifecycle state of the logical broker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No live connection handle; the initial and resting state
    Disconnected,
    /// Connect issued, waiting for the broker's acknowledgement
    Connecting,
    /// Broker acknowledged; subscribe/unsubscribe/publish are legal
    Connected,
    /// Explicit teardown in progress
    Disconnecting,
}

/// Events that drive lifecycle transitions
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Owner called connect; a fresh handle was created
    ConnectRequested,
    /// Broker accepted the connect attempt
    ConnectionAccepted,
    /// Connect attempt refused, timed out, or faulted
    ConnectionRefused(String),
    /// Established connection dropped by broker or transport
    ConnectionLost(String),
    /// Owner called disconnect
    DisconnectRequested,
    /// Teardown finished (whether or not the wire disconnect succeeded)
    TeardownComplete,
}

/// Compute the state that follows `event` in state `current`.
///
/// Unexpected combinations are logged and leave the session in the safest
/// state rather than panicking; the manager's single-flight guards make them
/// unreachable in practice.
pub fn next_state(current: SessionState, event: &LifecycleEvent) -> SessionState {
    let next = match event {
        LifecycleEvent::ConnectRequested => SessionState::Connecting,
        LifecycleEvent::ConnectionAccepted => match current {
            SessionState::Connecting => SessionState::Connected,
            other => {
                warn!(state = ?other, "connection accepted outside a connect attempt");
                other
            }
        },
        LifecycleEvent::ConnectionRefused(reason) => {
            warn!(%reason, "connect attempt failed");
            SessionState::Disconnected
        }
        LifecycleEvent::ConnectionLost(cause) => {
            warn!(%cause, "connection lost");
            SessionState::Disconnected
        }
        LifecycleEvent::DisconnectRequested => SessionState::Disconnecting,
        LifecycleEvent::TeardownComplete => SessionState::Disconnected,
    };
    if next != current {
        info!(from = ?current, to = ?next, "session state changed");
    }
    next
}

/// Subscriptions require an acknowledged connection.
pub fn can_subscribe(state: SessionState) -> bool {
    state == SessionState::Connected
}

/// Publishing requires an acknowledged connection.
pub fn can_publish(state: SessionState) -> bool {
    state == SessionState::Connected
}

/// Unsubscribing requires an acknowledged connection.
pub fn can_unsubscribe(state: SessionState) -> bool {
    state == SessionState::Connected
}
