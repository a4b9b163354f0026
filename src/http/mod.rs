//! HTTP serving subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper HTTP/1.1 connection, header read timeout)
//!     → recovery.rs (fault boundary: panic → 500 JSON + trace)
//!     → [write timeout]
//!     → application router (access_log.rs, request IDs, handlers)
//!     → Send to client
//!
//! Recovered panic
//!     → traces.rs (bounded channel)
//!     → drain task → diagnostic sink
//! ```

pub mod access_log;
pub mod options;
pub mod recovery;
pub mod response;
pub mod server;
pub mod traces;

pub use options::ServerOptions;
pub use recovery::{RecoveryLayer, RecoveryService};
pub use server::{HttpServer, ServerError};
pub use traces::{trace_channel, DiagnosticSink, TraceDrain, TraceDrainHandle, TraceSender, TracingSink};
