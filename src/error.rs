//! Error types for session lifecycle and dispatch operations
//!
//! Every error here is terminal for the operation that produced it; the
//! manager never retries on its own. Connection-class failures return the
//! session to `Disconnected` and leave the reconnect decision to the owner.

use crate::session::SessionState;
use thiserror::Error;

/// Errors surfaced by the session manager
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("operation requires an established connection (current state: {state:?})")]
    NotConnected { state: SessionState },

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("subscribe to {topic} failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    #[error("publish failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("disconnect failed: {0}")]
    DisconnectFailed(String),

    #[error("invalid broker URL: {0}")]
    InvalidBrokerUrl(String),

    #[error("invalid QoS level {0}, expected 0, 1 or 2")]
    InvalidQos(u8),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
