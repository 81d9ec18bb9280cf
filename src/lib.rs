//! MQTT session manager
//!
//! Owns one logical broker connection and exposes the small surface a
//! messaging-backed application needs: connect, disconnect, subscribe,
//! unsubscribe, publish, plus an event sink reporting every lifecycle
//! transition and operation outcome.
//!
//! # Overview
//!
//! - A four-state lifecycle (`Disconnected`, `Connecting`, `Connected`,
//!   `Disconnecting`) gates every operation
//! - Each connect attempt gets a unique client identity, so reconnects never
//!   collide with a broker-side ghost of the previous session
//! - Subscribe replaces the active subscription set wholesale; the registry
//!   holds only broker-acknowledged subscriptions
//! - Operation outcomes arrive asynchronously through the [`EventSink`]
//!   callbacks, delivered from a single task in emission order
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqtt_session::{EventSink, QosLevel, SessionConfig, SessionManager};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl EventSink for Printer {
//!     fn on_connected(&self) {
//!         println!("connected");
//!     }
//!     fn on_message_received(&self, topic: &str, payload: &[u8]) {
//!         println!("{topic}: {}", String::from_utf8_lossy(payload));
//!     }
//! }
//!
//! # async fn demo() -> Result<(), mqtt_session::SessionError> {
//! let config = SessionConfig::default();
//! let manager = SessionManager::new(config, Arc::new(Printer));
//!
//! manager.connect().await?;
//! // ... wait for on_connected via the sink or manager.watch_state() ...
//! manager.subscribe("test/topic", QosLevel::AtLeastOnce).await?;
//! manager.publish("test/topic", "Hello MQTT!", QosLevel::AtLeastOnce, false).await?;
//! manager.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod session;
pub mod testing;

pub use config::{ConfigError, SessionConfig};
pub use error::{SessionError, SessionResult};
pub use events::{EventSink, SessionEvent};
pub use session::{QosLevel, SessionManager, SessionState};
