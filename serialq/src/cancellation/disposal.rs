//! Disposal registry: run-once cleanup hooks in insertion order.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// A queued cleanup hook.
enum DisposeHook {
    /// A plain cleanup closure.
    Action(Box<dyn FnOnce() + Send>),
    /// A nested registry disposed along with this one.
    Nested(Arc<DisposalRegistry>),
}

struct RegistryInner {
    disposed: bool,
    hooks: Vec<DisposeHook>,
}

/// Registry for cleanup hooks executed exactly once, in insertion order.
///
/// Hooks added after disposal run immediately and synchronously instead of
/// being queued. Nested registries are disposed in their queued position;
/// adding a registry to itself, or adding one that is already disposed, is a
/// no-op.
pub struct DisposalRegistry {
    inner: Mutex<RegistryInner>,
}

impl DisposalRegistry {
    /// Creates a new, undisposed registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner { disposed: false, hooks: Vec::new() }),
        }
    }

    /// Registers a cleanup closure.
    ///
    /// If the registry is already disposed, the closure runs immediately.
    pub fn add_action<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut inner = self.inner.lock();
            if !inner.disposed {
                inner.hooks.push(DisposeHook::Action(Box::new(action)));
                return;
            }
        }
        Self::run(DisposeHook::Action(Box::new(action)));
    }

    /// Registers a nested registry to be disposed along with this one.
    ///
    /// No-op if `child` is this registry or is already disposed. If this
    /// registry is already disposed, `child` is disposed immediately.
    pub fn add_registry(self: &Arc<Self>, child: &Arc<Self>) {
        if Arc::ptr_eq(self, child) || child.disposed() {
            return;
        }
        {
            let mut inner = self.inner.lock();
            if !inner.disposed {
                inner.hooks.push(DisposeHook::Nested(child.clone()));
                return;
            }
        }
        child.dispose();
    }

    /// Disposes the registry, running every queued hook in insertion order.
    ///
    /// Idempotent: subsequent calls are no-ops. A panicking hook is logged
    /// and does not stop the remaining hooks.
    pub fn dispose(&self) {
        let hooks = {
            let mut inner = self.inner.lock();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            std::mem::take(&mut inner.hooks)
        };

        for hook in hooks {
            Self::run(hook);
        }
    }

    fn run(hook: DisposeHook) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| match hook {
            DisposeHook::Action(action) => action(),
            DisposeHook::Nested(registry) => registry.dispose(),
        }));
        if let Err(e) = result {
            warn!("Disposal hook panicked: {:?}", e);
        }
    }

    /// Returns whether the registry has been disposed.
    #[must_use]
    pub fn disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    /// Returns the number of queued hooks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.lock().hooks.len()
    }
}

impl Default for DisposalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DisposalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposalRegistry")
            .field("disposed", &self.disposed())
            .field("pending_count", &self.pending_count())
            .finish()
    }
}
