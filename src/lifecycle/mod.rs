//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Arming (shutdown.rs + signals.rs):
//!     observe_signals → register OS handlers → spawn watcher
//!
//! Trigger (first of):
//!     SIGTERM/SIGINT (or configured set) | parent completes | trigger()
//!         → one-shot latch (Armed → Triggered)
//!         → hooks.rs snapshot, run newest-first, one at a time
//!         → ShutdownHandle completes
//! ```
//!
//! # Design Decisions
//! - No process-global state; the application root owns the coordinator
//! - Exactly one shutdown pass per coordinator, however many triggers race
//! - No timeout on hooks; a hook that needs a deadline enforces its own

pub mod hooks;
pub mod shutdown;
pub mod signals;

pub use hooks::HookRegistry;
pub use shutdown::{Phase, ShutdownCause, ShutdownCoordinator, ShutdownHandle};
pub use signals::{Signal, SignalListener, TERMINATE_SIGNALS};

/// Errors raised while arming the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The OS refused to install a signal handler.
    #[error("failed to register handler for {signal}: {source}")]
    SignalSetup {
        signal: Signal,
        #[source]
        source: std::io::Error,
    },

    /// The signal cannot be observed on this platform.
    #[error("signal {0} is not supported on this platform")]
    Unsupported(Signal),
}
