//! Service lifecycle demo server.
//!
//! Serves a health endpoint and shuts down cleanly on SIGTERM/SIGINT:
//! new connections are refused, in-flight requests get the configured
//! deadline, then the process exits.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use service_lifecycle::app;
use service_lifecycle::config::load_config;
use service_lifecycle::observability::init_logging;

#[derive(Parser)]
#[command(name = "service-lifecycle")]
#[command(about = "HTTP service with coordinated graceful shutdown", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        shutdown_timeout_secs = config.lifecycle.shutdown_timeout_secs,
        "service-lifecycle starting"
    );

    match app::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Exiting with failure");
            ExitCode::FAILURE
        }
    }
}
