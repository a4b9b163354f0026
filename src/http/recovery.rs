//! Per-request fault boundary.
//!
//! # Responsibilities
//! - Catch panics raised while a request is being handled
//! - Answer the request with a structured 500 JSON body
//! - Forward the fault's trace to the diagnostic channel
//!
//! # Design Decisions
//! - The backtrace is captured by a panic hook at the panic site, while the
//!   faulting frames still exist; the boundary picks it up after unwinding
//! - Panics outside any boundary keep the previously installed hook
//! - The trace send is awaited, so a full channel delays the response
//!   instead of losing the trace

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

use axum::{http::StatusCode, response::Response};
use futures_util::future::BoxFuture;
use tower::{Layer, Service};

use crate::http::response::{json_response, ErrorResponse};
use crate::http::traces::TraceSender;

thread_local! {
    /// Number of boundaries currently polling on this thread.
    static BOUNDARY_DEPTH: Cell<usize> = const { Cell::new(0) };
    /// Backtrace captured by the hook for the most recent contained panic.
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

/// Install the panic hook that captures backtraces inside boundaries.
///
/// Idempotent; the previous hook still handles panics outside boundaries.
pub fn install_panic_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if BOUNDARY_DEPTH.with(Cell::get) > 0 {
                let backtrace = Backtrace::force_capture().to_string();
                LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            } else {
                previous(info);
            }
        }));
    });
}

/// Render a panic payload as text.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// A contained panic.
#[derive(Debug, Clone)]
pub struct Fault {
    /// The panic payload rendered as text.
    pub value: String,
    /// Call stack captured at the panic site.
    pub stack: String,
}

impl Fault {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let stack = LAST_BACKTRACE
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or_else(|| Backtrace::force_capture().to_string());
        Self {
            value: panic_message(payload.as_ref()),
            stack,
        }
    }

    /// `"<fault value>, <stack text>"`.
    pub fn trace(&self) -> String {
        format!("{}, {}", self.value, self.stack)
    }
}

/// Marks the current thread as inside a boundary for the scope's lifetime.
struct BoundaryScope;

impl BoundaryScope {
    fn enter() -> Self {
        BOUNDARY_DEPTH.with(|depth| depth.set(depth.get() + 1));
        BoundaryScope
    }
}

impl Drop for BoundaryScope {
    fn drop(&mut self) {
        BOUNDARY_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Polls a future, turning a panic into a [`Fault`].
pub struct CatchFault<F> {
    inner: Pin<Box<F>>,
}

impl<F> CatchFault<F> {
    pub fn new(future: F) -> Self {
        Self {
            inner: Box::pin(future),
        }
    }
}

impl<F: Future> Future for CatchFault<F> {
    type Output = Result<F::Output, Fault>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.inner.as_mut();
        let result = {
            let _scope = BoundaryScope::enter();
            panic::catch_unwind(AssertUnwindSafe(|| inner.poll(cx)))
        };
        match result {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(v)) => Poll::Ready(Ok(v)),
            Err(payload) => Poll::Ready(Err(Fault::from_payload(payload))),
        }
    }
}

/// Layer that wraps a service in a fault boundary.
#[derive(Debug, Clone)]
pub struct RecoveryLayer {
    traces: Option<TraceSender>,
}

impl RecoveryLayer {
    /// Create the layer; `traces` receives the trace of every contained fault.
    pub fn new(traces: Option<TraceSender>) -> Self {
        install_panic_hook();
        Self { traces }
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = RecoveryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoveryService {
            inner,
            traces: self.traces.clone(),
        }
    }
}

/// Service produced by [`RecoveryLayer`].
#[derive(Debug, Clone)]
pub struct RecoveryService<S> {
    inner: S,
    traces: Option<TraceSender>,
}

impl<S, ReqBody> Service<axum::http::Request<ReqBody>> for RecoveryService<S>
where
    S: Service<axum::http::Request<ReqBody>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: axum::http::Request<ReqBody>) -> Self::Future {
        // Keep the service that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let traces = self.traces.clone();
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        Box::pin(async move {
            match CatchFault::new(async move { inner.call(request).await }).await {
                Ok(result) => result,
                Err(fault) => {
                    tracing::warn!(
                        method = %method,
                        path = %path,
                        fault = %fault.value,
                        "Recovered from handler panic"
                    );
                    let trace = fault.trace();
                    let response = json_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &ErrorResponse::recovered(trace.clone()),
                    );
                    if let Some(traces) = traces {
                        traces.send(trace).await;
                    }
                    Ok(response)
                }
            }
        })
    }
}
