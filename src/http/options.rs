//! Server construction options.
//!
//! Resolved once when the server is built; the server never mutates them.

use std::sync::Arc;
use std::time::Duration;

use crate::http::traces::DiagnosticSink;

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 8080;

/// Options for [`HttpServer`](crate::http::HttpServer).
#[derive(Clone)]
pub struct ServerOptions {
    /// Port to bind on all interfaces.
    pub port: u16,
    /// Maximum time to read a request's headers; `None` disables the limit.
    pub read_timeout: Option<Duration>,
    /// Maximum time to produce a response once the request is read.
    pub write_timeout: Option<Duration>,
    /// Destination for recovered-panic traces.
    pub diagnostic_sink: Option<Arc<dyn DiagnosticSink>>,
    /// Wrap the handler in the fault boundary.
    pub recovery_enabled: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            read_timeout: None,
            write_timeout: None,
            diagnostic_sink: None,
            recovery_enabled: true,
        }
    }
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve on `port`.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Bound the time spent reading request headers.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Bound the time spent producing each response.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Send recovered-panic traces to `sink`.
    pub fn with_diagnostic_sink<S: DiagnosticSink>(mut self, sink: S) -> Self {
        let sink: Arc<dyn DiagnosticSink> = Arc::new(sink);
        self.diagnostic_sink = Some(sink);
        self
    }

    /// Disable the fault boundary; panics reach the connection task.
    pub fn without_recovery(mut self) -> Self {
        self.recovery_enabled = false;
        self
    }
}

impl std::fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerOptions")
            .field("port", &self.port)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("diagnostic_sink", &self.diagnostic_sink.is_some())
            .field("recovery_enabled", &self.recovery_enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::traces::TracingSink;

    #[test]
    fn defaults() {
        let options = ServerOptions::default();
        assert_eq!(options.port, 8080);
        assert!(options.recovery_enabled);
        assert!(options.read_timeout.is_none());
        assert!(options.write_timeout.is_none());
        assert!(options.diagnostic_sink.is_none());
    }

    #[test]
    fn builder_overrides() {
        let options = ServerOptions::new()
            .with_port(9000)
            .with_read_timeout(Duration::from_secs(1))
            .with_write_timeout(Duration::from_secs(2))
            .with_diagnostic_sink(TracingSink)
            .without_recovery();

        assert_eq!(options.port, 9000);
        assert_eq!(options.read_timeout, Some(Duration::from_secs(1)));
        assert_eq!(options.write_timeout, Some(Duration::from_secs(2)));
        assert!(options.diagnostic_sink.is_some());
        assert!(!options.recovery_enabled);
    }
}
