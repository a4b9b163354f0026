//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Every field has a default so an empty file is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::options::{ServerOptions, DEFAULT_PORT};
use crate::http::traces::TracingSink;
use crate::lifecycle::signals::{effective_signals, Signal, TERMINATE_SIGNALS};

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,

    /// Shutdown settings.
    pub lifecycle: LifecycleConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Port bound on all interfaces.
    pub port: u16,

    /// Header read timeout in milliseconds.
    pub read_timeout_ms: Option<u64>,

    /// Per-request handling timeout in milliseconds.
    pub write_timeout_ms: Option<u64>,

    /// Convert handler panics into 500 responses.
    pub recovery_enabled: bool,

    /// Log recovered-panic traces at error level.
    pub log_diagnostics: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            read_timeout_ms: None,
            write_timeout_ms: None,
            recovery_enabled: true,
            log_diagnostics: true,
        }
    }
}

impl ServerConfig {
    /// Resolve into options for [`HttpServer`](crate::http::HttpServer).
    pub fn to_options(&self) -> ServerOptions {
        let mut options = ServerOptions::new().with_port(self.port);
        if let Some(ms) = self.read_timeout_ms {
            options = options.with_read_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.write_timeout_ms {
            options = options.with_write_timeout(Duration::from_millis(ms));
        }
        if self.log_diagnostics {
            options = options.with_diagnostic_sink(TracingSink);
        }
        if !self.recovery_enabled {
            options = options.without_recovery();
        }
        options
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Deadline for draining in-flight requests, in seconds.
    pub shutdown_timeout_secs: u64,

    /// Signals that start shutdown.
    pub signals: Vec<Signal>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 5,
            signals: TERMINATE_SIGNALS.to_vec(),
        }
    }
}

impl LifecycleConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Configured signals with defaults applied and duplicates removed.
    pub fn signals(&self) -> Vec<Signal> {
        effective_signals(&self.signals)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.lifecycle.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(config.lifecycle.signals(), vec![Signal::Terminate, Signal::Interrupt]);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn parses_full_file() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9001
            read_timeout_ms = 1500
            write_timeout_ms = 3000
            recovery_enabled = false
            log_diagnostics = false

            [lifecycle]
            shutdown_timeout_secs = 12
            signals = ["hangup", "user1"]

            [observability]
            log_level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9001);
        assert_eq!(config.lifecycle.signals, vec![Signal::Hangup, Signal::User1]);
        assert_eq!(config.lifecycle.shutdown_timeout(), Duration::from_secs(12));

        let options = config.server.to_options();
        assert_eq!(options.port, 9001);
        assert_eq!(options.read_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(options.write_timeout, Some(Duration::from_millis(3000)));
        assert!(!options.recovery_enabled);
        assert!(options.diagnostic_sink.is_none());
    }

    #[test]
    fn default_options_log_diagnostics() {
        let options = ServerConfig::default().to_options();
        assert!(options.diagnostic_sink.is_some());
        assert!(options.recovery_enabled);
    }

    #[test]
    fn empty_signal_list_uses_defaults() {
        let config = LifecycleConfig {
            signals: Vec::new(),
            ..LifecycleConfig::default()
        };
        assert_eq!(config.signals(), TERMINATE_SIGNALS.to_vec());
    }
}
