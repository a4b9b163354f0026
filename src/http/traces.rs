//! Diagnostic trace channel and drain.
//!
//! # Data Flow
//! ```text
//! recovery.rs (request task)
//!     → TraceSender::send (bounded, waits when full)
//!     → TraceDrain (background task)
//!     → DiagnosticSink ("recovered from panic: \n <trace>")
//! ```
//!
//! # Design Decisions
//! - Capacity scales with available parallelism
//! - Closing stops new sends but buffered traces are still delivered
//! - A send after close is dropped, never a panic

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

/// Channel capacity per unit of available parallelism.
const CAPACITY_PER_CORE: usize = 2;

/// Destination for recovered-panic diagnostics.
pub trait DiagnosticSink: Send + Sync + 'static {
    /// Write one formatted diagnostic line.
    fn write_trace(&self, line: &str);
}

impl<F> DiagnosticSink for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn write_trace(&self, line: &str) {
        self(line)
    }
}

/// Sink that forwards diagnostics to `tracing` at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn write_trace(&self, line: &str) {
        tracing::error!(target: "service_lifecycle::diagnostics", "{}", line);
    }
}

/// Format a trace the way the drain writes it.
pub fn format_trace(trace: &str) -> String {
    format!("recovered from panic: \n {}", trace)
}

/// Default capacity: a small multiple of available parallelism.
pub fn default_capacity() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores * CAPACITY_PER_CORE
}

/// Producer side of the trace channel.
#[derive(Debug, Clone)]
pub struct TraceSender {
    tx: mpsc::Sender<String>,
}

impl TraceSender {
    /// Send a trace, waiting for capacity when the channel is full.
    pub async fn send(&self, trace: String) {
        if self.tx.send(trace).await.is_err() {
            tracing::debug!("Trace channel closed, dropping diagnostic trace");
        }
    }
}

/// Consumer side of the trace channel, not yet running.
#[derive(Debug)]
pub struct TraceDrain {
    rx: mpsc::Receiver<String>,
    close: watch::Receiver<bool>,
    finished: watch::Sender<bool>,
}

/// Control over a trace channel's lifetime.
#[derive(Debug, Clone)]
pub struct TraceDrainHandle {
    close: Arc<watch::Sender<bool>>,
    finished: watch::Receiver<bool>,
}

/// Create a bounded trace channel.
pub fn trace_channel(capacity: usize) -> (TraceSender, TraceDrain, TraceDrainHandle) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (close_tx, close_rx) = watch::channel(false);
    let (finished_tx, finished_rx) = watch::channel(false);

    (
        TraceSender { tx },
        TraceDrain {
            rx,
            close: close_rx,
            finished: finished_tx,
        },
        TraceDrainHandle {
            close: Arc::new(close_tx),
            finished: finished_rx,
        },
    )
}

impl TraceDrain {
    /// Spawn the drain on the current runtime.
    pub fn spawn(self, sink: Option<Arc<dyn DiagnosticSink>>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(sink))
    }

    /// Forward traces to `sink` until the channel is closed and empty.
    pub async fn run(self, sink: Option<Arc<dyn DiagnosticSink>>) {
        let TraceDrain {
            mut rx,
            mut close,
            finished,
        } = self;
        let mut closing = false;

        loop {
            tokio::select! {
                biased;
                trace = rx.recv() => match trace {
                    Some(trace) => {
                        if let Some(sink) = &sink {
                            sink.write_trace(&format_trace(&trace));
                        }
                    }
                    None => break,
                },
                _ = async { let _ = close.wait_for(|c| *c).await; }, if !closing => {
                    closing = true;
                    rx.close();
                }
            }
        }

        tracing::debug!("Trace drain finished");
        finished.send_replace(true);
    }
}

impl TraceDrainHandle {
    /// Close the channel. Idempotent.
    pub fn close(&self) {
        self.close.send_replace(true);
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        *self.close.borrow()
    }

    /// Wait for the drain to deliver every buffered trace and exit.
    pub async fn finished(&self) {
        let mut finished = self.finished.clone();
        let _ = finished.wait_for(|f| *f).await;
    }
}
