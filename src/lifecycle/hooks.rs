//! Ordered registry of shutdown hooks.
//!
//! # Responsibilities
//! - Append cleanup actions in registration order
//! - Hand out a point-in-time snapshot for the shutdown pass
//!
//! # Design Decisions
//! - Append-only; entries are never removed
//! - Snapshot is a copy, so no lock is held while hooks run and a hook may
//!   register another hook without deadlocking
//! - Hooks appended after a snapshot is taken are not part of that pass

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::BoxFuture;

/// A registered cleanup action.
pub type Hook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Thread-safe, append-only list of shutdown hooks.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<Hook>>,
}

impl HookRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an async hook.
    pub fn register<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: Hook = Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(hook()) });
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    /// Append a synchronous hook.
    ///
    /// The closure runs on the shutdown task, so it should be short.
    pub fn register_blocking<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let hook = Arc::new(hook);
        self.register(move || {
            let hook = Arc::clone(&hook);
            async move { hook() }
        });
    }

    /// Copy of the hooks registered so far, in registration order.
    pub fn snapshot(&self) -> Vec<Hook> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if no hooks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn snapshot_preserves_registration_order() {
        let registry = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["a", "b", "c"] {
            let log = log.clone();
            registry.register_blocking(move || log.lock().unwrap().push(name));
        }

        for hook in registry.snapshot() {
            hook().await;
        }
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn snapshot_excludes_later_registrations() {
        let registry = HookRegistry::new();
        registry.register_blocking(|| {});

        let snapshot = registry.snapshot();
        registry.register_blocking(|| {});

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn hook_can_register_another_hook() {
        let registry = Arc::new(HookRegistry::new());
        let inner = registry.clone();
        registry.register_blocking(move || inner.register_blocking(|| {}));

        for hook in registry.snapshot() {
            hook().await;
        }
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn empty_registry() {
        let registry = HookRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }
}
