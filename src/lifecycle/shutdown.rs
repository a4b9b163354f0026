//! Shutdown coordination for the service.
//!
//! # Responsibilities
//! - Arm watchers for OS signals, a parent future and manual triggers
//! - Decide, exactly once, that shutdown has started
//! - Run registered hooks newest-first, one at a time
//! - Complete the shutdown handle only after every hook returned
//!
//! # Design Decisions
//! - The one-shot latch is a compare-and-swap on the phase; losers do nothing
//! - A manual trigger before arming is remembered and fires on arming
//! - Hook panics are contained and logged; the pass continues

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::watch;

use crate::lifecycle::hooks::HookRegistry;
use crate::lifecycle::signals::{Signal, SignalListener};
use crate::lifecycle::LifecycleError;

/// Coordinator phase.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No watcher armed yet.
    Idle = 0,
    /// Watching for a trigger; hooks may be registered.
    Armed = 1,
    /// Terminal: the shutdown pass has started (or finished).
    Triggered = 2,
}

impl From<u8> for Phase {
    fn from(val: u8) -> Self {
        match val {
            1 => Phase::Armed,
            2 => Phase::Triggered,
            _ => Phase::Idle,
        }
    }
}

/// What started the shutdown pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// An observed OS signal arrived.
    Signal(Signal),
    /// The parent future passed to the watcher completed.
    Parent,
    /// [`ShutdownCoordinator::trigger`] was called.
    Manual,
}

impl std::fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownCause::Signal(signal) => write!(f, "signal {}", signal),
            ShutdownCause::Parent => f.write_str("parent cancelled"),
            ShutdownCause::Manual => f.write_str("manual trigger"),
        }
    }
}

/// Coordinator for graceful shutdown.
///
/// Cheap to clone; clones share the same latch, hooks and handle.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    hooks: HookRegistry,
    phase: AtomicU8,
    /// Set by `trigger()`; observed by every watcher.
    requested: watch::Sender<bool>,
    /// Set once, after all hooks ran.
    done: watch::Sender<Option<ShutdownCause>>,
}

impl ShutdownCoordinator {
    /// Create a new, unarmed coordinator.
    pub fn new() -> Self {
        let (requested, _) = watch::channel(false);
        let (done, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                hooks: HookRegistry::new(),
                phase: AtomicU8::new(Phase::Idle as u8),
                requested,
                done,
            }),
        }
    }

    /// Register an async cleanup hook.
    ///
    /// Hooks run in reverse registration order. Hooks registered after the
    /// shutdown pass took its snapshot are not run.
    pub fn register_hook<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.hooks.register(hook);
    }

    /// Register a synchronous cleanup hook.
    pub fn register_blocking_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.hooks.register_blocking(hook);
    }

    /// Arm the coordinator on the given OS signals (defaults when empty).
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] if a signal handler cannot be installed.
    pub fn observe_signals(&self, signals: &[Signal]) -> Result<ShutdownHandle, LifecycleError> {
        self.observe_signals_with(std::future::pending::<()>(), signals)
    }

    /// Arm the coordinator on OS signals and on completion of `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] if a signal handler cannot be installed.
    pub fn observe_signals_with<P>(
        &self,
        parent: P,
        signals: &[Signal],
    ) -> Result<ShutdownHandle, LifecycleError>
    where
        P: Future<Output = ()> + Send + 'static,
    {
        let mut listener = SignalListener::new(signals)?;
        tracing::info!(signals = ?crate::lifecycle::signals::effective_signals(signals), "Observing shutdown signals");
        Ok(self.arm(async move { ShutdownCause::Signal(listener.recv().await) }, parent))
    }

    /// Arm the coordinator without OS signals; `parent` completing triggers shutdown.
    pub fn observe<P>(&self, parent: P) -> ShutdownHandle
    where
        P: Future<Output = ()> + Send + 'static,
    {
        self.arm(std::future::pending::<ShutdownCause>(), parent)
    }

    /// Request shutdown. Safe to call any number of times from any task.
    pub fn trigger(&self) {
        let first = self.inner.requested.send_if_modified(|requested| {
            let first = !*requested;
            *requested = true;
            first
        });
        if first {
            tracing::info!("Shutdown requested");
        } else {
            tracing::debug!("Duplicate shutdown request ignored");
        }
    }

    /// Handle that completes once the shutdown pass finished.
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            rx: self.inner.done.subscribe(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        Phase::from(self.inner.phase.load(Ordering::SeqCst))
    }

    /// Returns true once the one-shot latch has been claimed.
    pub fn is_triggered(&self) -> bool {
        self.phase() == Phase::Triggered
    }

    /// Number of registered hooks.
    pub fn hook_count(&self) -> usize {
        self.inner.hooks.len()
    }

    fn arm<S, P>(&self, source: S, parent: P) -> ShutdownHandle
    where
        S: Future<Output = ShutdownCause> + Send + 'static,
        P: Future<Output = ()> + Send + 'static,
    {
        let _ = self.inner.phase.compare_exchange(
            Phase::Idle as u8,
            Phase::Armed as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        let inner = Arc::clone(&self.inner);
        let mut requested = self.inner.requested.subscribe();
        let mut finished = self.inner.done.subscribe();

        tokio::spawn(async move {
            let cause = tokio::select! {
                cause = source => cause,
                _ = parent => ShutdownCause::Parent,
                _ = async { let _ = requested.wait_for(|r| *r).await; } => ShutdownCause::Manual,
                // Another watcher already ran the pass.
                _ = async { let _ = finished.wait_for(Option::is_some).await; } => return,
            };
            inner.fire(cause).await;
        });

        self.handle()
    }
}

impl Inner {
    async fn fire(&self, cause: ShutdownCause) {
        if self
            .phase
            .compare_exchange(
                Phase::Armed as u8,
                Phase::Triggered as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            tracing::debug!(cause = %cause, "Shutdown already triggered");
            return;
        }

        let hooks = self.hooks.snapshot();
        tracing::info!(cause = %cause, hooks = hooks.len(), "Shutdown triggered, running hooks");

        for (index, hook) in hooks.iter().enumerate().rev() {
            tracing::debug!(hook = index, "Running shutdown hook");
            let outcome = AssertUnwindSafe(async { hook().await }).catch_unwind().await;
            if let Err(payload) = outcome {
                tracing::error!(
                    hook = index,
                    panic = %crate::http::recovery::panic_message(payload.as_ref()),
                    "Shutdown hook panicked"
                );
            }
        }

        self.done.send_replace(Some(cause));
        tracing::info!(cause = %cause, "Shutdown hooks complete");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("phase", &self.phase())
            .field("hooks", &self.hook_count())
            .finish()
    }
}

/// Cancellation handle: completes exactly once, after the shutdown hooks ran.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    rx: watch::Receiver<Option<ShutdownCause>>,
}

impl ShutdownHandle {
    /// Wait for shutdown to complete.
    ///
    /// Returns `None` only if the coordinator was dropped without triggering.
    pub async fn done(&mut self) -> Option<ShutdownCause> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(cause) => *cause,
            Err(_) => None,
        }
    }

    /// Returns true if shutdown has completed.
    pub fn is_done(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Cause of the completed shutdown, if any.
    pub fn cause(&self) -> Option<ShutdownCause> {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn hooks_run_in_reverse_order() {
        let coordinator = ShutdownCoordinator::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["a", "b", "c"] {
            let order = order.clone();
            coordinator.register_blocking_hook(move || order.lock().unwrap().push(name));
        }

        let mut handle = coordinator.observe(std::future::pending());
        coordinator.trigger();

        assert_eq!(handle.done().await, Some(ShutdownCause::Manual));
        assert_eq!(*order.lock().unwrap(), vec!["c", "b", "a"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_triggers_run_hooks_once() {
        let coordinator = ShutdownCoordinator::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        coordinator.register_blocking_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut handle = coordinator.observe(std::future::pending());

        let mut tasks = Vec::new();
        for _ in 0..64 {
            let coordinator = coordinator.clone();
            tasks.push(tokio::spawn(async move { coordinator.trigger() }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        handle.done().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(coordinator.is_triggered());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_watchers_fire_once() {
        let coordinator = ShutdownCoordinator::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        coordinator.register_blocking_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Several independently armed watchers, each with its own parent.
        let mut senders = Vec::new();
        for _ in 0..8 {
            let (tx, rx) = oneshot::channel::<()>();
            coordinator.observe(async move {
                let _ = rx.await;
            });
            senders.push(tx);
        }

        let mut handle = coordinator.handle();
        for tx in senders {
            let _ = tx.send(());
        }
        coordinator.trigger();

        handle.done().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn parent_completion_triggers_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        let (tx, rx) = oneshot::channel::<()>();
        let mut handle = coordinator.observe(async move {
            let _ = rx.await;
        });

        assert!(!handle.is_done());
        tx.send(()).unwrap();

        assert_eq!(handle.done().await, Some(ShutdownCause::Parent));
        assert_eq!(handle.cause(), Some(ShutdownCause::Parent));
    }

    #[tokio::test]
    async fn trigger_before_arming_fires_on_arm() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger();
        assert_eq!(coordinator.phase(), Phase::Idle);

        let mut handle = coordinator.observe(std::future::pending());
        assert_eq!(handle.done().await, Some(ShutdownCause::Manual));
        assert_eq!(coordinator.phase(), Phase::Triggered);
    }

    #[tokio::test]
    async fn handle_completes_after_slow_hook() {
        let coordinator = ShutdownCoordinator::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = finished.clone();
        coordinator.register_hook(move || {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                flag.store(1, Ordering::SeqCst);
            }
        });

        let mut handle = coordinator.observe(std::future::pending());
        coordinator.trigger();
        handle.done().await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hooks_run_sequentially() {
        let coordinator = ShutdownCoordinator::new();
        let events = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let events = events.clone();
            coordinator.register_hook(move || {
                let events = events.clone();
                async move {
                    events.lock().unwrap().push(format!("{name}:start"));
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    events.lock().unwrap().push(format!("{name}:end"));
                }
            });
        }

        let mut handle = coordinator.observe(std::future::pending());
        coordinator.trigger();
        handle.done().await;

        assert_eq!(
            *events.lock().unwrap(),
            vec!["second:start", "second:end", "first:start", "first:end"]
        );
    }

    #[tokio::test]
    async fn hook_registered_during_pass_is_excluded() {
        let coordinator = ShutdownCoordinator::new();
        let late_runs = Arc::new(AtomicUsize::new(0));

        let registrar = coordinator.clone();
        let counter = late_runs.clone();
        coordinator.register_blocking_hook(move || {
            let counter = counter.clone();
            registrar.register_blocking_hook(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        let mut handle = coordinator.observe(std::future::pending());
        coordinator.trigger();
        handle.done().await;

        assert_eq!(coordinator.hook_count(), 2);
        assert_eq!(late_runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panicking_hook_does_not_stall_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();

        coordinator.register_blocking_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        coordinator.register_blocking_hook(|| panic!("hook failure"));

        let mut handle = coordinator.observe(std::future::pending());
        coordinator.trigger();

        assert_eq!(handle.done().await, Some(ShutdownCause::Manual));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handle_reports_none_when_coordinator_dropped() {
        let coordinator = ShutdownCoordinator::new();
        let mut handle = coordinator.handle();
        drop(coordinator);
        assert_eq!(handle.done().await, None);
    }
}
