//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields
//!     → logging.rs (subscriber, level filter, fmt output)
//!
//! HTTP requests additionally produce:
//!     → http/access_log.rs (one line per request)
//!     → http/traces.rs (recovered-panic traces)
//! ```

pub mod logging;

pub use logging::{init_logging, parse_level};
