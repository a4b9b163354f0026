//! Service lifecycle and shutdown coordination library.

pub mod app;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::AppConfig;
pub use http::{HttpServer, ServerError, ServerOptions};
pub use lifecycle::{ShutdownCoordinator, ShutdownHandle, Signal};
