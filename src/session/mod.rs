//! Session layer: lifecycle state, connection ownership and dispatch
//!
//! Split pure/impure: `state`, `registry`, `pending` and `router` are pure
//! data and functions testable without a broker; `connection` and `manager`
//! own the transport and the tasks driving it.

pub mod connection;
pub mod manager;
pub mod pending;
pub mod registry;
pub mod router;
pub mod state;

pub use connection::ConnectionIdentity;
pub use manager::SessionManager;
pub use registry::QosLevel;
pub use state::{LifecycleEvent, SessionState};
