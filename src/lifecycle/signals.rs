//! OS signal handling.
//!
//! # Responsibilities
//! - Name the termination signals the service reacts to
//! - Register handlers for a chosen set of signals
//! - Wait for the first of them to arrive
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Handlers are registered eagerly so a signal delivered right after
//!   arming is never lost
//! - Non-Unix targets only understand Ctrl+C

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::lifecycle::LifecycleError;

/// Signals used when the caller does not name any.
pub const TERMINATE_SIGNALS: [Signal; 2] = [Signal::Terminate, Signal::Interrupt];

/// A process signal that can request shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    /// SIGINT (Ctrl+C).
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// SIGHUP.
    Hangup,
    /// SIGQUIT.
    Quit,
    /// SIGUSR1.
    User1,
    /// SIGUSR2.
    User2,
}

impl Signal {
    /// Lowercase name, as used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Interrupt => "interrupt",
            Signal::Terminate => "terminate",
            Signal::Hangup => "hangup",
            Signal::Quit => "quit",
            Signal::User1 => "user1",
            Signal::User2 => "user2",
        }
    }

    #[cfg(unix)]
    fn kind(self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;

        match self {
            Signal::Interrupt => SignalKind::interrupt(),
            Signal::Terminate => SignalKind::terminate(),
            Signal::Hangup => SignalKind::hangup(),
            Signal::Quit => SignalKind::quit(),
            Signal::User1 => SignalKind::user_defined1(),
            Signal::User2 => SignalKind::user_defined2(),
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interrupt" | "int" | "sigint" => Ok(Signal::Interrupt),
            "terminate" | "term" | "sigterm" => Ok(Signal::Terminate),
            "hangup" | "hup" | "sighup" => Ok(Signal::Hangup),
            "quit" | "sigquit" => Ok(Signal::Quit),
            "user1" | "usr1" | "sigusr1" => Ok(Signal::User1),
            "user2" | "usr2" | "sigusr2" => Ok(Signal::User2),
            other => Err(format!("unknown signal: {}", other)),
        }
    }
}

/// Resolve the effective signal set; an empty request means the defaults.
pub fn effective_signals(signals: &[Signal]) -> Vec<Signal> {
    if signals.is_empty() {
        return TERMINATE_SIGNALS.to_vec();
    }
    let mut resolved: Vec<Signal> = Vec::with_capacity(signals.len());
    for signal in signals {
        if !resolved.contains(signal) {
            resolved.push(*signal);
        }
    }
    resolved
}

/// Armed handlers for a set of signals.
#[cfg(unix)]
pub struct SignalListener {
    streams: Vec<(Signal, tokio::signal::unix::Signal)>,
}

#[cfg(unix)]
impl SignalListener {
    /// Register handlers for `signals` (defaults when empty).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(signals: &[Signal]) -> Result<Self, LifecycleError> {
        let mut streams = Vec::new();
        for signal in effective_signals(signals) {
            let stream = tokio::signal::unix::signal(signal.kind())
                .map_err(|source| LifecycleError::SignalSetup { signal, source })?;
            streams.push((signal, stream));
        }
        tracing::debug!(signals = ?streams.iter().map(|(s, _)| *s).collect::<Vec<_>>(), "Signal handlers registered");
        Ok(Self { streams })
    }

    /// Wait for the first registered signal to arrive.
    pub async fn recv(&mut self) -> Signal {
        let waits = self.streams.iter_mut().map(|(signal, stream)| {
            let signal = *signal;
            Box::pin(async move {
                if stream.recv().await.is_none() {
                    // Stream can no longer deliver; never resolve this arm.
                    std::future::pending::<()>().await;
                }
                signal
            })
        });
        let (signal, _, _) = futures_util::future::select_all(waits).await;
        signal
    }
}

/// Armed handlers for a set of signals.
#[cfg(not(unix))]
pub struct SignalListener {
    signal: Signal,
}

#[cfg(not(unix))]
impl SignalListener {
    /// Register handlers for `signals` (defaults when empty).
    pub fn new(signals: &[Signal]) -> Result<Self, LifecycleError> {
        let resolved = effective_signals(signals);
        if let Some(signal) = resolved
            .iter()
            .find(|s| !matches!(s, Signal::Interrupt | Signal::Terminate))
        {
            return Err(LifecycleError::Unsupported(*signal));
        }
        Ok(Self { signal: resolved[0] })
    }

    /// Wait for Ctrl+C.
    pub async fn recv(&mut self) -> Signal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        self.signal
    }
}

impl std::fmt::Debug for SignalListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalListener").finish_non_exhaustive()
    }
}
