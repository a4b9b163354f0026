//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, accept, accept-error classification)
//!     → connection.rs (connection IDs, live connection count)
//!     → Hand off to HTTP layer
//!
//! Connection States:
//!     Accepted → Serving → Draining → Closed (or Aborted at deadline)
//! ```

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{Listener, ListenerError};
