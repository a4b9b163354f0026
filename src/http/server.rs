//! HTTP server supervision.
//!
//! # Responsibilities
//! - Bind the configured port and serve HTTP/1.1 connections
//! - Compose the fault boundary and write timeout around the handler
//! - Start the diagnostic trace drain
//! - Stop: refuse new connections, drain in-flight ones until the
//!   deadline, then abort what is left and close the trace channel
//!
//! # Design Decisions
//! - Each connection is a task in a `JoinSet`, so a forced stop can abort
//!   every remaining connection
//! - `stop` does not wait for the trace drain to finish
//! - The server is a cheap handle; the stop hook and the serving task each
//!   hold a clone

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::{body::Body, extract::Request, Router};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::timeout::TimeoutLayer;

use crate::http::options::ServerOptions;
use crate::http::recovery::RecoveryLayer;
use crate::http::traces::{default_capacity, trace_channel, TraceDrain, TraceDrainHandle, TraceSender};
use crate::net::listener::{Listener, ListenerError, ACCEPT_BACKOFF};
use crate::net::ConnectionTracker;

/// Errors reported by [`HttpServer`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not acquire its port.
    #[error("listener failed to start: {0}")]
    Bind(#[source] ListenerError),

    /// In-flight requests did not finish before the stop deadline.
    #[error("graceful shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),

    /// `start` was called on a server that already started or stopped.
    #[error("server already started or stopped")]
    Closed,
}

/// Upper bound on waiting for the serving task once connections are aborted.
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Serving phase, observed by `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServePhase {
    Idle,
    Serving,
    Stopped,
}

/// What the serving task has been asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopMode {
    Running,
    Graceful,
    Force,
}

/// HTTP server supervising one listener.
#[derive(Clone)]
pub struct HttpServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    options: ServerOptions,
    router: Mutex<Option<Router>>,
    traces: TraceSender,
    drain: Mutex<Option<TraceDrain>>,
    drain_handle: TraceDrainHandle,
    phase: watch::Sender<ServePhase>,
    stop: watch::Sender<StopMode>,
    connections: ConnectionTracker,
}

impl HttpServer {
    /// Create a server for `router`; nothing is bound until [`start`](Self::start).
    pub fn new(router: Router, options: ServerOptions) -> Self {
        let (traces, drain, drain_handle) = trace_channel(default_capacity());
        let (phase, _) = watch::channel(ServePhase::Idle);
        let (stop, _) = watch::channel(StopMode::Running);

        Self {
            inner: Arc::new(ServerInner {
                options,
                router: Mutex::new(Some(router)),
                traces,
                drain: Mutex::new(Some(drain)),
                drain_handle,
                phase,
                stop,
                connections: ConnectionTracker::new(),
            }),
        }
    }

    /// Bind and serve until stopped.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the port cannot be bound, [`ServerError::Closed`]
    /// if this server was already started or stopped.
    pub async fn start(&self) -> Result<(), ServerError> {
        let claimed = self.inner.phase.send_if_modified(|phase| {
            if *phase == ServePhase::Idle {
                *phase = ServePhase::Serving;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ServerError::Closed);
        }
        // Marks the server stopped even if this future is dropped mid-serve.
        let _stopped = StoppedOnDrop(&self.inner.phase);

        let router = self
            .inner
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ServerError::Closed)?;

        self.spawn_drain();

        let listener = match Listener::bind(self.inner.options.port).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(port = self.inner.options.port, error = %e, "Failed to bind listener");
                return Err(ServerError::Bind(e));
            }
        };

        tracing::info!(
            address = %listener.local_addr(),
            recovery = self.inner.options.recovery_enabled,
            "HTTP server starting"
        );

        self.serve(listener, router).await;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Stop serving, allowing in-flight requests up to `deadline`.
    ///
    /// # Errors
    ///
    /// [`ServerError::ShutdownTimeout`] if connections had to be aborted.
    pub async fn stop(&self, deadline: Duration) -> Result<(), ServerError> {
        self.inner.stop.send_if_modified(|mode| {
            if *mode == StopMode::Running {
                *mode = StopMode::Graceful;
                true
            } else {
                false
            }
        });

        let never_started = self.inner.phase.send_if_modified(|phase| {
            if *phase == ServePhase::Idle {
                *phase = ServePhase::Stopped;
                true
            } else {
                false
            }
        });

        if never_started {
            self.spawn_drain();
        }

        let mut phase = self.inner.phase.subscribe();
        let result = if never_started || *phase.borrow() == ServePhase::Stopped {
            Ok(())
        } else {
            tracing::info!(deadline = ?deadline, "Stopping HTTP server");
            let drained = !deadline.is_zero()
                && tokio::time::timeout(deadline, wait_for_phase(&mut phase, ServePhase::Stopped))
                    .await
                    .is_ok();

            if drained {
                Ok(())
            } else {
                tracing::warn!(
                    deadline = ?deadline,
                    active_connections = self.inner.connections.active_count(),
                    "Graceful shutdown deadline exceeded, aborting connections"
                );
                self.inner.stop.send_replace(StopMode::Force);
                if tokio::time::timeout(FORCE_CLOSE_GRACE, wait_for_phase(&mut phase, ServePhase::Stopped))
                    .await
                    .is_err()
                {
                    tracing::error!(grace = ?FORCE_CLOSE_GRACE, "Serving task did not finish after aborting connections");
                }
                Err(ServerError::ShutdownTimeout(deadline))
            }
        };

        self.inner.drain_handle.close();
        result
    }

    /// Wait until the trace drain has delivered every buffered trace.
    ///
    /// Completes only after [`stop`](Self::stop) has closed the channel.
    pub async fn diagnostics_drained(&self) {
        self.inner.drain_handle.finished().await;
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> u64 {
        self.inner.connections.active_count()
    }

    /// The options this server was built with.
    pub fn options(&self) -> &ServerOptions {
        &self.inner.options
    }

    fn spawn_drain(&self) {
        let drain = self
            .inner
            .drain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(drain) = drain {
            drain.spawn(self.inner.options.diagnostic_sink.clone());
        }
    }

    async fn serve(&self, listener: Listener, router: Router) {
        let options = &self.inner.options;
        let recovery = options
            .recovery_enabled
            .then(|| RecoveryLayer::new(Some(self.inner.traces.clone())));
        #[allow(deprecated)]
        let write_timeout = options.write_timeout.map(TimeoutLayer::new);
        let app = ServiceBuilder::new()
            .option_layer(recovery)
            .option_layer(write_timeout)
            .service(router);

        let mut builder = http1::Builder::new();
        // hyper defaults to a 30s header read timeout once a timer is set.
        builder
            .timer(TokioTimer::new())
            .header_read_timeout(options.read_timeout);

        let mut stop = self.inner.stop.subscribe();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = wait_for_stop(&mut stop, |mode| *mode != StopMode::Running) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let app = app.clone();
                        let builder = builder.clone();
                        let guard = self.inner.connections.track();
                        let mut stop = self.inner.stop.subscribe();

                        connections.spawn(async move {
                            let service = hyper::service::service_fn(move |request: Request<Incoming>| {
                                app.clone().oneshot(request.map(Body::new))
                            });
                            let connection = builder.serve_connection(TokioIo::new(stream), service);
                            tokio::pin!(connection);

                            tokio::select! {
                                result = connection.as_mut() => {
                                    if let Err(e) = result {
                                        tracing::debug!(connection_id = %guard.id(), peer_addr = %peer, error = %e, "Connection error");
                                    }
                                    return;
                                }
                                _ = wait_for_stop(&mut stop, |mode| *mode != StopMode::Running) => {
                                    connection.as_mut().graceful_shutdown();
                                }
                            }

                            if let Err(e) = connection.as_mut().await {
                                tracing::debug!(connection_id = %guard.id(), peer_addr = %peer, error = %e, "Connection error while draining");
                            }
                        });
                    }
                    Err(e) if e.is_transient() => {
                        tracing::debug!(error = %e, "Transient accept error");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed, backing off");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    log_connection_exit(joined);
                }
            }
        }

        drop(listener);
        tracing::info!(in_flight = connections.len(), "Listener closed, draining connections");

        loop {
            tokio::select! {
                joined = connections.join_next() => match joined {
                    Some(joined) => log_connection_exit(joined),
                    None => break,
                },
                _ = wait_for_stop(&mut stop, |mode| *mode == StopMode::Force) => {
                    tracing::warn!(remaining = connections.len(), "Aborting remaining connections");
                    connections.abort_all();
                    while let Some(joined) = connections.join_next().await {
                        log_connection_exit(joined);
                    }
                    break;
                }
            }
        }
    }
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("options", &self.inner.options)
            .field("phase", &*self.inner.phase.borrow())
            .finish()
    }
}

/// Sets the phase to `Stopped` when `start` returns or is dropped.
struct StoppedOnDrop<'a>(&'a watch::Sender<ServePhase>);

impl Drop for StoppedOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(ServePhase::Stopped);
    }
}

async fn wait_for_stop<F>(stop: &mut watch::Receiver<StopMode>, predicate: F)
where
    F: FnMut(&StopMode) -> bool,
{
    let _ = stop.wait_for(predicate).await;
}

async fn wait_for_phase(phase: &mut watch::Receiver<ServePhase>, target: ServePhase) {
    let _ = phase.wait_for(|current| *current == target).await;
}

fn log_connection_exit(joined: Result<(), tokio::task::JoinError>) {
    match joined {
        Ok(()) => {}
        Err(e) if e.is_panic() => {
            tracing::error!(error = %e, "Connection task panicked");
        }
        Err(e) if e.is_cancelled() => {
            tracing::debug!("Connection aborted");
        }
        Err(e) => {
            tracing::warn!(error = %e, "Connection task failed");
        }
    }
}
